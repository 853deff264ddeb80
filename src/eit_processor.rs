//! The core EIT reconciliation loop (spec §4.4). Takes one parsed
//! [`EventInformationSection`] at a time, decides whether it's worth acting
//! on, resolves it to a channel and schedule, and merges its events into the
//! schedule store while dispatching to the handler chain.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{trace, warn};

use crate::config::Config;
use crate::descriptor::{Descriptor, LinkageDescriptor};
use crate::eit_tables::{EitTablesHash, FIRST_EIT_TABLE_ID};
use crate::error::ProcessError;
use crate::handlers::{ChannelStore, EpgHandler, ScheduleStore};
use crate::model::{ChannelId, Component, Event, ParentalRating, RunningStatus};
use crate::psi::section::{is_eit_table_id, EventInformationSection};
use crate::time;

fn parental_rating_to_age(raw: u8) -> u8 {
    match raw {
        0x01..=0x0f => raw + 3,
        0x11 => 10,
        0x12 => 12,
        0x13 => 16,
        _ => 0,
    }
}

/// Lower is better; `prefs.len()` means "not in the preference list at all",
/// the worst possible rank (spec §4.4 "prefer matching language").
fn language_rank(prefs: &[[u8; 3]], code: [u8; 3]) -> usize {
    prefs.iter().position(|p| *p == code).unwrap_or(prefs.len())
}

/// Broadcasters occasionally flicker `running_status` for a single section
/// cycle. Section 0 of a present/following pair keeps `Pausing` rather than
/// accepting a `NotRunning` regression; section 1 has no such protection and
/// instead falls all the way back to `Undefined` on the same regression
/// (spec §4.4 "Present/following specifics").
fn resolve_running_status(old: RunningStatus, new: RunningStatus, section_number: u8) -> RunningStatus {
    if new != old && new == RunningStatus::NotRunning {
        match section_number {
            0 => {
                if old == RunningStatus::Pausing {
                    return old;
                }
            }
            1 => return RunningStatus::Undefined,
            _ => {}
        }
    }
    new
}

pub struct EitProcessor {
    tables: Mutex<EitTablesHash>,
    channels: Arc<ChannelStore>,
    schedules: Arc<ScheduleStore>,
    handlers: Vec<Box<dyn EpgHandler>>,
    config: Config,
}

impl EitProcessor {
    pub fn new(
        channels: Arc<ChannelStore>,
        schedules: Arc<ScheduleStore>,
        handlers: Vec<Box<dyn EpgHandler>>,
        config: Config,
    ) -> Self {
        EitProcessor {
            tables: Mutex::new(EitTablesHash::new()),
            channels,
            schedules,
            handlers,
            config,
        }
    }

    /// The handler chain, exposed so [`crate::filter::Filter`] can fan TDT
    /// readings out to the same handlers without this crate needing a
    /// separately shared handler list.
    pub(crate) fn handlers(&self) -> &[Box<dyn EpgHandler>] {
        &self.handlers
    }

    /// Applies one section. Returns `Ok(false)` for sections a policy gate
    /// chose to drop or that left nothing changed, and `Ok(true)` once at
    /// least one event in it was actually modified.
    pub fn process(&self, now: DateTime<Utc>, section: &EventInformationSection) -> Result<bool, ProcessError> {
        if !is_eit_table_id(section.table_id) {
            return Err(ProcessError::UntrackedTable(section.table_id));
        }
        // 0x4F ("present/following, other transponder schedule") is tracked
        // by the syncer array for index arithmetic but never processed.
        if section.table_id == 0x4f {
            return Ok(false);
        }
        if now < time::valid_time_threshold() {
            return Err(ProcessError::ClockNotSet);
        }

        let channel = self
            .channels
            .resolve(section.original_network_id, section.transport_stream_id, section.service_id)
            .ok_or(ProcessError::ChannelNotFound {
                original_network_id: section.original_network_id,
                transport_stream_id: section.transport_stream_id,
                service_id: section.service_id,
            })?;

        if self.handlers.iter().any(|h| h.ignore_channel(&channel)) {
            return Ok(false);
        }

        // Once the "actual transponder" (0x5X) schedule for this low nibble
        // has completed, a later "other transponder" (0x6X) section for the
        // same nibble is dropped outright rather than re-merged.
        if (section.table_id & 0xf0) == 0x60 && self.schedules.on_actual_tp(&channel, section.table_id) {
            return Ok(false);
        }

        if !self.handlers.iter().all(|h| h.begin_segment_transfer(&channel)) {
            return Ok(false);
        }

        let already_seen = {
            let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
            tables
                .entry(section.service_id)
                .syncer(section.table_id)
                .expect("table id already validated by is_eit_table_id")
                .already_processed(section.version_number, section.section_number)
        };

        // Every table but present/following skips a repeated section outright.
        // Present/following (0x4E) still runs through the event loop even when
        // already seen, since running_status/seen bookkeeping must update on
        // every cycle; it just skips re-deriving descriptor-driven fields.
        if section.table_id != FIRST_EIT_TABLE_ID && already_seen {
            trace!(
                "section already processed: service={} table={:#x} version={} section={}",
                section.service_id, section.table_id, section.version_number, section.section_number
            );
            for handler in &self.handlers {
                handler.end_segment_transfer(&channel, false);
            }
            return Ok(false);
        }
        let process_descriptors = !already_seen;

        let linger = self.config.epg_linger_time;
        let mut segment_start: Option<i64> = None;
        let mut segment_end: i64 = 0;
        let mut modified = false;

        for raw_event in &section.events {
            if raw_event.start_time == 0 {
                continue;
            }
            let is_nvod = raw_event.start_time == time::NVOD_REFERENCE_START_TIME;
            if !is_nvod && raw_event.duration == 0 {
                continue;
            }
            let end_time = if is_nvod { raw_event.start_time } else { raw_event.start_time + raw_event.duration };
            if !is_nvod && end_time < now.timestamp() - linger {
                continue;
            }
            segment_start = Some(segment_start.map_or(raw_event.start_time, |s| s.min(raw_event.start_time)));
            segment_end = segment_end.max(end_time);
            if self.apply_event(now, &channel, section.table_id, section.section_number, section.version_number, raw_event, process_descriptors) {
                modified = true;
            }
        }

        if section.table_id == FIRST_EIT_TABLE_ID {
            {
                let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
                let eit_tables = tables.entry(section.service_id);
                if section.section_number == 0 {
                    eit_tables.set_table_start(segment_start.unwrap_or(0));
                } else {
                    eit_tables.set_table_end(segment_end);
                }
            }
            if section.events.is_empty() && section.section_number == 0 {
                self.schedules.clear_running_status(&channel);
            }
            self.schedules.set_present_seen(&channel);
        }

        let table_complete = {
            let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
            let syncer = tables
                .entry(section.service_id)
                .syncer_mut(section.table_id)
                .expect("table id already validated by is_eit_table_id");
            syncer.mark_processed(section.version_number, section.section_number, section.last_section_number);
            syncer.complete()
        };

        if table_complete {
            for handler in &self.handlers {
                handler.handle_eit_table_complete(&channel, section.table_id);
            }
            if (0x50..=0x5f).contains(&section.table_id) {
                self.schedules.mark_actual_tp(&channel, section.table_id);
            }
        }

        if modified && table_complete && (section.table_id >= 0x50 || section.table_id == FIRST_EIT_TABLE_ID) {
            let (final_start, final_end) = if section.table_id == FIRST_EIT_TABLE_ID {
                let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
                let eit_tables = tables.get(section.service_id);
                (
                    eit_tables.and_then(|t| t.table_start()).unwrap_or_else(|| segment_start.unwrap_or(0)),
                    eit_tables.and_then(|t| t.table_end()).unwrap_or(segment_end),
                )
            } else {
                (segment_start.unwrap_or(0), segment_end)
            };
            for handler in &self.handlers {
                handler.sort_schedule(&channel);
            }
            for handler in &self.handlers {
                handler.drop_outdated(&channel, final_start, final_end, section.table_id, section.version_number);
            }
        }

        for handler in &self.handlers {
            handler.end_segment_transfer(&channel, modified);
        }

        Ok(modified)
    }

    fn apply_event(
        &self,
        now: DateTime<Utc>,
        channel: &ChannelId,
        tid: u8,
        section_number: u8,
        version: u8,
        raw: &crate::psi::section::Event<'_>,
        process_descriptors: bool,
    ) -> bool {
        let new_status = RunningStatus::from_wire(raw.running_status);
        let handled_externally = self.handlers.iter().any(|h| h.handled_externally(channel));

        // Resolved before taking the schedule lock: the referenced event can
        // legitimately live on the same channel, and the store's lock isn't
        // reentrant.
        let shifted_fields = if process_descriptors {
            raw.descriptors.iter().find_map(|d| match d {
                Descriptor::TimeShiftedEvent(ts) => {
                    let ref_channel = self
                        .channels
                        .resolve(channel.original_network_id, channel.transport_stream_id, ts.reference_service_id)
                        .unwrap_or(ChannelId {
                            service_id: ts.reference_service_id,
                            ..*channel
                        });
                    self.schedules
                        .get_event_by_id(&ref_channel, ts.reference_event_id)
                        .map(|e| (e.title.clone(), e.short_text.clone(), e.description.clone()))
                }
                _ => None,
            })
        } else {
            None
        };

        let channels = self.channels.as_ref();
        let config = &self.config;
        let handlers = &self.handlers;

        let result = self.schedules.with_events(channel, |events| {
            let lookup_by_time = (tid & 0xf0) == 0x60;
            let existing_key = if lookup_by_time {
                events.values().find(|e| e.start_time == raw.start_time).map(|e| e.event_id)
            } else {
                events.contains_key(&raw.event_id).then_some(raw.event_id)
            };

            let event_key = match existing_key {
                Some(k) => k,
                None => {
                    if handled_externally && !handlers.iter().any(|h| h.is_update(channel, raw.event_id)) {
                        return None;
                    }
                    raw.event_id
                }
            };

            let is_new = !events.contains_key(&event_key);
            let event = events.entry(event_key).or_insert_with(|| {
                let mut e = Event::new(event_key, raw.start_time, raw.duration);
                e.table_id = tid;
                e
            });

            if !is_new {
                event.seen = true;
                // A present/following-owned event is never overwritten by a
                // schedule table (spec §4.4 "0x4E events never overwritten").
                let floor_prev = event.table_id.max(FIRST_EIT_TABLE_ID);
                if floor_prev == FIRST_EIT_TABLE_ID && tid != FIRST_EIT_TABLE_ID {
                    return None;
                }
            }

            let old_start = event.start_time;
            let old_duration = event.duration;
            let old_status = event.running_status;

            event.start_time = raw.start_time;
            event.duration = raw.duration;
            event.table_id = tid;
            event.version = version;

            if tid == FIRST_EIT_TABLE_ID {
                event.running_status = resolve_running_status(old_status, new_status, section_number);
            }

            let mut changed =
                is_new || event.start_time != old_start || event.duration != old_duration || event.running_status != old_status;

            if process_descriptors {
                changed = true;
                if let Some((title, short_text, description)) = shifted_fields.clone() {
                    event.title = title;
                    event.short_text = short_text;
                    event.description = description;
                } else {
                    event.title = None;
                    event.short_text = None;
                    event.description = None;
                }
                event.contents.clear();
                event.components.clear();
                event.parental_rating = None;
                event.vps = None;
                event.link_channels.clear();

                let mut description_buf = Vec::new();
                let mut short_best: Option<usize> = None;
                let mut extended_best: Option<usize> = None;
                let mut parental_best: Option<usize> = None;
                let suppress_text = shifted_fields.is_some();

                for descriptor in &raw.descriptors {
                    Self::apply_descriptor(
                        now,
                        event,
                        &mut description_buf,
                        descriptor,
                        channels,
                        config,
                        channel,
                        suppress_text,
                        &mut short_best,
                        &mut extended_best,
                        &mut parental_best,
                    );
                }
                if event.description.is_none() && !description_buf.is_empty() {
                    event.description = Some(description_buf);
                }
            }

            Some((event.clone(), changed))
        });

        let (finalized, changed) = match result.flatten() {
            Some(pair) => pair,
            None => return false,
        };

        for handler in handlers {
            handler.set_title(channel, finalized.event_id, finalized.title.as_deref());
            handler.set_short_text(channel, finalized.event_id, finalized.short_text.as_deref());
            handler.set_description(channel, finalized.event_id, finalized.description.as_deref());
            handler.set_contents(channel, finalized.event_id, &finalized.contents);
            handler.set_parental_rating(channel, finalized.event_id, finalized.parental_rating);
            handler.set_vps(channel, finalized.event_id, finalized.vps);
            handler.set_components(channel, finalized.event_id, &finalized.components);
            handler.fix_epg_bugs(channel, finalized.event_id);
        }

        for handler in handlers {
            if handler.handle_eit_event(channel, &finalized) {
                break;
            }
        }

        changed
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_descriptor(
        now: DateTime<Utc>,
        event: &mut Event,
        description: &mut Vec<u8>,
        descriptor: &Descriptor<'_>,
        channels: &ChannelStore,
        config: &Config,
        channel: &ChannelId,
        suppress_text: bool,
        short_best: &mut Option<usize>,
        extended_best: &mut Option<usize>,
        parental_best: &mut Option<usize>,
    ) {
        match descriptor {
            Descriptor::ShortEvent(d) => {
                if suppress_text {
                    return;
                }
                let rank = language_rank(&config.epg_languages, d.language_code);
                if short_best.map_or(true, |best| rank < best) {
                    *short_best = Some(rank);
                    event.title = Some(d.event_name.to_vec());
                    event.short_text = Some(d.text.to_vec());
                }
            }
            Descriptor::ExtendedEvent(d) => {
                if suppress_text {
                    return;
                }
                let rank = language_rank(&config.epg_languages, d.language_code);
                let is_best = match *extended_best {
                    None => true,
                    Some(best) => rank <= best,
                };
                if !is_best {
                    return;
                }
                if *extended_best != Some(rank) {
                    *extended_best = Some(rank);
                    description.clear();
                }
                for item in &d.items {
                    description.extend_from_slice(item.item_description);
                    description.extend_from_slice(item.item);
                }
                description.extend_from_slice(d.text);
            }
            Descriptor::Content(d) => {
                for item in &d.items {
                    if event.contents.len() >= config.max_event_contents {
                        break;
                    }
                    event.contents.push(item.packed());
                }
            }
            Descriptor::ParentalRating(d) => {
                for item in &d.items {
                    let rank = language_rank(&config.epg_languages, item.country_code);
                    if parental_best.map_or(true, |best| rank < best) {
                        *parental_best = Some(rank);
                        event.parental_rating = Some(ParentalRating {
                            country_code: item.country_code,
                            minimum_age: parental_rating_to_age(item.rating),
                        });
                    }
                }
            }
            Descriptor::Pdc(d) => match time::pdc_anchor(now, d.month, d.day, d.hour, d.minute) {
                Ok(dt) => event.vps = Some(dt.timestamp()),
                Err(e) => warn!("invalid PDC label on event {}: {}", event.event_id, e),
            },
            // Resolved ahead of the descriptor loop, see apply_event.
            Descriptor::TimeShiftedEvent(_) => {}
            Descriptor::Linkage(d) => {
                Self::apply_linkage(now, event, d, channels, config, channel);
            }
            Descriptor::Component(d) => {
                let (stream_content, stream_content_ext) = if d.stream_content == 0x9 {
                    (d.stream_content, d.stream_content_ext)
                } else {
                    (d.stream_content, 0)
                };
                event.components.push(Component {
                    stream_content,
                    stream_content_ext,
                    component_type: d.component_type,
                    component_tag: d.component_tag,
                    language_code: d.language_code,
                    description: d.text.to_vec(),
                });
            }
            Descriptor::StreamIdentifier(_) | Descriptor::Unsupported(_) => {}
        }
    }

    /// A linkage (Premiere) descriptor only takes effect while `now` falls
    /// inside the event's own window (spec §4.4 "Linkage"). It either renames
    /// an already-known linked channel, records a portal name when the
    /// linkage points back at this same channel, or — when `UpdateChannels`
    /// allows it — synthesizes a channel entry for a linked service this
    /// crate hasn't seen yet.
    fn apply_linkage(now: DateTime<Utc>, event: &mut Event, d: &LinkageDescriptor<'_>, channels: &ChannelStore, config: &Config, channel: &ChannelId) {
        let now_ts = now.timestamp();
        if now_ts < event.start_time || now_ts >= event.end_time() {
            return;
        }
        match channels.resolve(d.original_network_id, d.transport_stream_id, d.service_id) {
            Some(linked) if linked != *channel => {
                if config.update_channels >= 1 && config.update_channels != 2 {
                    channels.rename(linked, d.private_data);
                }
                event.link_channels.insert(linked);
            }
            Some(linked) => {
                channels.set_portal_name(linked, d.private_data);
                event.link_channels.insert(linked);
            }
            None if config.update_channels >= 4 => {
                let synthesized = channels.synthesize(d.original_network_id, d.transport_stream_id, d.service_id, channel.source);
                channels.rename(synthesized, d.private_data);
                event.link_channels.insert(synthesized);
            }
            None => {}
        }
    }
}
