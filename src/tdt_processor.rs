//! Wall-clock discipline driven by TDT sections (spec §4.5). A single
//! disagreeing reading is never enough to act on — broadcast TDT streams
//! occasionally glitch by a few seconds — so this keeps the previous reading
//! and only acts once a second reading reports the exact same drift. Once
//! acting, smooth adjustments (but not hard sets) are further rate-limited so
//! a string of agreeing small-drift readings doesn't keep nudging the clock
//! every section cycle.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::handlers::ClockControl;

/// Drift this small is considered "clock is fine", no action taken.
const MAX_TIME_DIFF: i64 = 1;
/// Drift at or above this magnitude gets a hard set instead of a smooth adjust.
const MAX_ADJ_DIFF: i64 = 10;
/// Minimum seconds between two smooth adjustments.
const ADJ_DELTA: i64 = 300;

pub struct TdtProcessor {
    old_time: Option<i64>,
    old_diff: Option<i64>,
    last_adj: Option<DateTime<Utc>>,
}

impl Default for TdtProcessor {
    fn default() -> Self {
        TdtProcessor {
            old_time: None,
            old_diff: None,
            last_adj: None,
        }
    }
}

impl TdtProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `system_now` is the local wall clock at receipt time; `tdt_utc` is the
    /// broadcast UTC time just decoded from the section.
    pub fn process(&mut self, system_now: DateTime<Utc>, tdt_utc: i64, clock: &dyn ClockControl) {
        let diff = tdt_utc - system_now.timestamp();

        if diff.abs() > MAX_TIME_DIFF {
            let agrees = self.old_time != Some(tdt_utc) && self.old_diff == Some(diff);
            if agrees {
                if diff.abs() > MAX_ADJ_DIFF {
                    if let Some(target) = Utc.timestamp_opt(tdt_utc, 0).single() {
                        clock.set_time(target);
                    }
                    self.last_adj = Some(system_now);
                } else {
                    let due = self.last_adj.map_or(true, |last| (system_now - last).num_seconds() >= ADJ_DELTA);
                    if due {
                        clock.adjust_time(Duration::seconds(diff));
                        self.last_adj = Some(system_now);
                    }
                }
            }
        }

        self.old_time = Some(tdt_utc);
        self.old_diff = Some(diff);
    }
}
