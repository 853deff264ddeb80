//! Top-level section dispatch (spec §5/§6): matches an incoming section's
//! PID/table id against what this filter is registered for, then routes it
//! to the EIT or TDT processor. Errors from either processor are logged and
//! swallowed here — nothing above this layer sees a `Result`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use log::warn;

use crate::config::Config;
use crate::eit_processor::EitProcessor;
use crate::error::ProcessError;
use crate::handlers::ClockControl;
use crate::psi::section::{is_eit_table_id, EventInformationSection};
use crate::psi::tdt::{TimeAndDateSection, TABLE_ID as TDT_TABLE_ID};
use crate::tdt_processor::TdtProcessor;

pub struct Filter {
    config: Config,
    eit_processor: EitProcessor,
    tdt_processor: Mutex<TdtProcessor>,
    clock: Arc<dyn ClockControl>,
    /// When set, sections are dropped until this time: set after a run of
    /// unresolvable channels so a missing channel scan doesn't spin the CPU
    /// re-parsing the same sections every cycle.
    disable_until: Mutex<Option<DateTime<Utc>>>,
}

impl Filter {
    pub fn new(config: Config, eit_processor: EitProcessor, clock: Arc<dyn ClockControl>) -> Self {
        Filter {
            config,
            eit_processor,
            tdt_processor: Mutex::new(TdtProcessor::new()),
            clock,
            disable_until: Mutex::new(None),
        }
    }

    /// Whether this filter is registered for sections on `pid` carrying
    /// `table_id`.
    pub fn wants(&self, pid: u16, table_id: u8) -> bool {
        (pid == self.config.eit_pid && is_eit_table_id(table_id))
            || (pid == self.config.tdt_pid && table_id == TDT_TABLE_ID)
    }

    fn disabled(&self, now: DateTime<Utc>) -> bool {
        match *self.disable_until.lock().unwrap_or_else(|p| p.into_inner()) {
            Some(until) => now < until,
            None => false,
        }
    }

    fn disable_for(&self, duration: chrono::Duration, now: DateTime<Utc>) {
        *self.disable_until.lock().unwrap_or_else(|p| p.into_inner()) = Some(now + duration);
    }

    /// Feeds one raw section, already demultiplexed from `pid`, into the
    /// appropriate processor. No-op if this filter doesn't want `pid`/`table_id`
    /// or is currently disabled.
    pub fn process_section(&self, now: DateTime<Utc>, pid: u16, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let table_id = bytes[0];
        if !self.wants(pid, table_id) || self.disabled(now) {
            return;
        }

        if pid == self.config.tdt_pid {
            self.process_tdt(now, bytes);
        } else {
            self.process_eit(now, bytes);
        }
    }

    fn process_eit(&self, now: DateTime<Utc>, bytes: &[u8]) {
        let section = match EventInformationSection::parse(bytes) {
            Ok(section) => section,
            Err(e) => {
                warn!("failed to parse EIT section: {}", e);
                return;
            }
        };
        match self.eit_processor.process(now, &section) {
            Ok(_) => {}
            Err(ProcessError::ChannelNotFound { .. }) => {
                self.disable_for(chrono::Duration::seconds(30), now);
            }
            Err(e) => warn!("EIT section rejected: {}", e),
        }
    }

    fn process_tdt(&self, now: DateTime<Utc>, bytes: &[u8]) {
        if !self.config.clock_control_enabled {
            return;
        }
        let section = match TimeAndDateSection::parse(bytes) {
            Ok(section) => section,
            Err(e) => {
                warn!("failed to parse TDT section: {}", e);
                return;
            }
        };
        let mut tdt_processor = self.tdt_processor.lock().unwrap_or_else(|p| p.into_inner());
        tdt_processor.process(now, section.utc_time, self.clock.as_ref());
        drop(tdt_processor);

        if let chrono::LocalResult::Single(utc_time) = Utc.timestamp_opt(section.utc_time, 0) {
            for handler in self.eit_processor.handlers() {
                handler.handle_tdt(utc_time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{ChannelStore, ScheduleStore};
    use std::cell::RefCell;
    use std::sync::Arc;

    #[derive(Default)]
    struct NoopClock {
        sets: RefCell<usize>,
    }

    impl ClockControl for NoopClock {
        fn set_time(&self, _utc: DateTime<Utc>) {
            *self.sets.borrow_mut() += 1;
        }
        fn adjust_time(&self, _delta: chrono::Duration) {}
    }

    fn filter() -> Filter {
        let channels = Arc::new(ChannelStore::new());
        let schedules = Arc::new(ScheduleStore::new());
        let eit_processor = EitProcessor::new(channels, schedules, Vec::new(), Config::default());
        Filter::new(Config::default(), eit_processor, Arc::new(NoopClock::default()))
    }

    #[test]
    fn wants_matches_configured_pids_and_table_ids() {
        let f = filter();
        assert!(f.wants(0x12, 0x4e));
        assert!(f.wants(0x14, TDT_TABLE_ID));
        assert!(!f.wants(0x12, TDT_TABLE_ID));
        assert!(!f.wants(0x20, 0x4e));
    }

    #[test]
    fn ignores_sections_it_does_not_want() {
        let f = filter();
        // Malformed bytes would normally fail to parse; since this PID isn't
        // registered, process_section must return before even trying.
        f.process_section(Utc::now(), 0x99, &[0x4e]);
    }

    #[test]
    fn tdt_reading_is_fanned_out_to_handlers() {
        use crate::handlers::EpgHandler;
        use crate::model::{ChannelId, Event};
        use chrono::Datelike;
        use std::sync::Mutex;

        struct RecordingHandler(Arc<Mutex<Vec<DateTime<Utc>>>>);
        impl EpgHandler for RecordingHandler {
            fn handle_eit_event(&self, _channel: &ChannelId, _event: &Event) -> bool {
                false
            }
            fn handle_tdt(&self, utc_time: DateTime<Utc>) {
                self.0.lock().unwrap().push(utc_time);
            }
        }

        let channels = Arc::new(ChannelStore::new());
        let schedules = Arc::new(ScheduleStore::new());
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let eit_processor = EitProcessor::new(
            channels,
            schedules,
            vec![Box::new(RecordingHandler(recorded.clone()))],
            Config::default(),
        );
        let f = Filter::new(Config::default(), eit_processor, Arc::new(NoopClock::default()));

        let mut section = vec![TDT_TABLE_ID, 0x70, 0x05];
        section.extend_from_slice(&[0xE5, 0xE1, 0x00, 0x00, 0x00]); // 2020-01-01 00:00:00 UTC

        f.process_section(Utc::now(), Config::default().tdt_pid, &section);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!((recorded[0].year(), recorded[0].month(), recorded[0].day()), (2020, 1, 1));
    }

    #[test]
    fn disables_after_unresolved_channel() {
        let f = filter();
        let now = crate::time::valid_time_threshold();
        let mut section = vec![0x4e, 0x80, 0x0f];
        section.extend_from_slice(&[0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x03, 0x00, 0x4e]);
        let crc = crate::crc32::crc32(&section);
        section.extend_from_slice(&crc.to_be_bytes());

        f.process_section(now, 0x12, &section);
        assert!(f.disabled(now));
        assert!(!f.disabled(now + chrono::Duration::seconds(31)));
    }
}
