//! The handler chain (spec §6) and the bounded-wait locking helper (spec §5)
//! used to reach the external channel/schedule stores. Grounded on the
//! `Arc<Mutex<..>>` shared-state idiom in `ts::demuxer`, generalized from a
//! blocking `.lock()` to a timeout-bounded `try_lock`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::model::{ChannelId, Component, Event, EventId, ParentalRating, Source};

/// Polls `mutex.try_lock()` until it succeeds or `timeout` elapses, sleeping
/// briefly between attempts instead of blocking indefinitely. A poisoned
/// mutex is treated the same as a timeout: the caller gets `None` and moves
/// on rather than propagating a panic from an unrelated thread.
pub fn try_lock_for<T>(mutex: &Mutex<T>, timeout: Duration) -> Option<MutexGuard<'_, T>> {
    let deadline = Instant::now() + timeout;
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(_)) => return None,
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return None;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// How long [`ChannelStore`]/[`ScheduleStore`] lock acquisition waits before
/// giving up on a section (spec §5 expansion).
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// A plugin in the handler chain (spec §6). `handle_eit_event` is
/// first-match-wins: the processor stops offering an event to later handlers
/// once one returns `true`. Every other callback accumulates — every handler
/// in the chain sees every call, in registration order. All but
/// `handle_eit_event` default to a no-op/permissive implementation so a
/// handler only needs to override what it actually cares about.
pub trait EpgHandler: Send + Sync {
    fn handle_eit_event(&self, channel: &ChannelId, event: &Event) -> bool;

    fn handle_eit_table_complete(&self, _channel: &ChannelId, _table_id: u8) {}

    fn handle_tdt(&self, _utc_time: DateTime<Utc>) {}

    /// Whether this channel's EIT data should be dropped outright before
    /// anything else runs.
    fn ignore_channel(&self, _channel: &ChannelId) -> bool {
        false
    }

    /// Called once per section, before any event in it is touched. Returning
    /// `false` aborts processing of the whole section.
    fn begin_segment_transfer(&self, _channel: &ChannelId) -> bool {
        true
    }

    /// Called once per section, after every event has been resolved.
    /// `modified` is whether any event actually changed.
    fn end_segment_transfer(&self, _channel: &ChannelId, _modified: bool) {}

    /// Whether an event not found by primary key should still be treated as
    /// an update (rather than a fresh insert) when the channel is handled
    /// externally.
    fn is_update(&self, _channel: &ChannelId, _event_id: EventId) -> bool {
        false
    }

    /// Whether this channel's schedule is owned by an external system: newly
    /// discovered events are only added to the local store when a handler
    /// confirms the id via `is_update`.
    fn handled_externally(&self, _channel: &ChannelId) -> bool {
        false
    }

    fn set_title(&self, _channel: &ChannelId, _event_id: EventId, _title: Option<&[u8]>) {}
    fn set_short_text(&self, _channel: &ChannelId, _event_id: EventId, _text: Option<&[u8]>) {}
    fn set_description(&self, _channel: &ChannelId, _event_id: EventId, _description: Option<&[u8]>) {}
    fn set_contents(&self, _channel: &ChannelId, _event_id: EventId, _contents: &[u8]) {}
    fn set_parental_rating(&self, _channel: &ChannelId, _event_id: EventId, _rating: Option<ParentalRating>) {}
    fn set_vps(&self, _channel: &ChannelId, _event_id: EventId, _vps: Option<i64>) {}
    fn set_components(&self, _channel: &ChannelId, _event_id: EventId, _components: &[Component]) {}

    /// Called once per event, after every field has been set, to let a
    /// handler correct known-broadcaster quirks before `handle_eit_event`.
    fn fix_epg_bugs(&self, _channel: &ChannelId, _event_id: EventId) {}

    /// Called once per completed section, before `drop_outdated`.
    fn sort_schedule(&self, _channel: &ChannelId) {}

    /// Called once per completed section: `table_id`/`version` identify which
    /// table just finished, `segment_start`/`segment_end` bound the window of
    /// events it covered, so stale entries inside that window (not touched by
    /// this pass) can be pruned.
    fn drop_outdated(&self, _channel: &ChannelId, _segment_start: i64, _segment_end: i64, _table_id: u8, _version: u8) {}
}

/// Per-name/per-portal channel label, populated by the linkage (Premiere)
/// descriptor handling in [`crate::eit_processor`] (spec §4.4 "Linkage").
#[derive(Default)]
struct ChannelMeta {
    name: Option<Vec<u8>>,
}

/// Resolves the (original_network_id, transport_stream_id, service_id) triple
/// carried on the wire to the channel identity the rest of the system uses.
/// Lives behind a lock because it's populated by a separate channel-scan
/// component outside this crate (spec §1).
pub struct ChannelStore {
    channels: Mutex<HashMap<(u16, u16, u16), ChannelId>>,
    meta: Mutex<HashMap<ChannelId, ChannelMeta>>,
}

impl Default for ChannelStore {
    fn default() -> Self {
        ChannelStore {
            channels: Mutex::new(HashMap::new()),
            meta: Mutex::new(HashMap::new()),
        }
    }
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, original_network_id: u16, transport_stream_id: u16, service_id: u16, channel: ChannelId) {
        if let Some(mut guard) = try_lock_for(&self.channels, LOCK_TIMEOUT) {
            guard.insert((original_network_id, transport_stream_id, service_id), channel);
        }
    }

    pub fn resolve(&self, original_network_id: u16, transport_stream_id: u16, service_id: u16) -> Option<ChannelId> {
        let guard = try_lock_for(&self.channels, LOCK_TIMEOUT)?;
        guard.get(&(original_network_id, transport_stream_id, service_id)).copied()
    }

    /// Registers a previously-unseen (onid, tsid, sid) triple as a channel of
    /// its own, used by the linkage descriptor's channel-synthesis path
    /// (spec §4.4, `UpdateChannels` policy >= 4) when the linked service
    /// hasn't otherwise been discovered.
    pub fn synthesize(&self, original_network_id: u16, transport_stream_id: u16, service_id: u16, source: Source) -> ChannelId {
        let channel = ChannelId::new(source, original_network_id, transport_stream_id, service_id);
        self.insert(original_network_id, transport_stream_id, service_id, channel);
        channel
    }

    /// Sets a channel's display name, driven by the linkage descriptor's
    /// rename path (spec §4.4).
    pub fn rename(&self, channel: ChannelId, name: &[u8]) {
        if let Some(mut guard) = try_lock_for(&self.meta, LOCK_TIMEOUT) {
            guard.entry(channel).or_default().name = Some(name.to_vec());
        }
    }

    /// Same storage as [`ChannelStore::rename`]: a linkage descriptor that
    /// points back at its own channel carries a "portal name" rather than a
    /// rename of some other channel, but both live in the same name slot.
    pub fn set_portal_name(&self, channel: ChannelId, name: &[u8]) {
        self.rename(channel, name);
    }

    pub fn name(&self, channel: &ChannelId) -> Option<Vec<u8>> {
        try_lock_for(&self.meta, LOCK_TIMEOUT)?.get(channel).and_then(|m| m.name.clone())
    }
}

/// Per-channel state tracked alongside the event map itself: whether a
/// present/following section has ever landed (spec §4.4 "SetPresentSeen")
/// and, per low nibble of a schedule table id, whether the "actual
/// transponder" (0x5X) twin has completed (spec §4.4/§6 "OnActualTp").
#[derive(Default)]
struct ChannelSchedule {
    events: HashMap<EventId, Event>,
    present_seen: bool,
    actual_tp: [bool; 16],
}

/// The schedule the processor reconciles events into, one event map per
/// channel. Like [`ChannelStore`], the real store lives outside this crate;
/// this is the reference shape the bundled handlers and tests use.
pub struct ScheduleStore {
    schedules: Mutex<HashMap<ChannelId, ChannelSchedule>>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        ScheduleStore {
            schedules: Mutex::new(HashMap::new()),
        }
    }
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the event map for `channel` under the store's lock,
    /// creating an empty map on first use. Returns `None` if the lock
    /// couldn't be acquired within [`LOCK_TIMEOUT`] — the caller drops the
    /// section rather than stalling.
    pub fn with_events<F, R>(&self, channel: &ChannelId, f: F) -> Option<R>
    where
        F: FnOnce(&mut HashMap<EventId, Event>) -> R,
    {
        let mut guard = try_lock_for(&self.schedules, LOCK_TIMEOUT)?;
        let schedule = guard.entry(*channel).or_default();
        Some(f(&mut schedule.events))
    }

    pub fn event_count(&self, channel: &ChannelId) -> usize {
        try_lock_for(&self.schedules, LOCK_TIMEOUT)
            .and_then(|guard| guard.get(channel).map(|s| s.events.len()))
            .unwrap_or(0)
    }

    pub fn add_event(&self, channel: &ChannelId, event: Event) {
        if let Some(mut guard) = try_lock_for(&self.schedules, LOCK_TIMEOUT) {
            guard.entry(*channel).or_default().events.insert(event.event_id, event);
        }
    }

    pub fn get_event_by_id(&self, channel: &ChannelId, event_id: EventId) -> Option<Event> {
        let guard = try_lock_for(&self.schedules, LOCK_TIMEOUT)?;
        guard.get(channel)?.events.get(&event_id).cloned()
    }

    pub fn get_event_by_time(&self, channel: &ChannelId, start_time: i64) -> Option<Event> {
        let guard = try_lock_for(&self.schedules, LOCK_TIMEOUT)?;
        guard.get(channel)?.events.values().find(|e| e.start_time == start_time).cloned()
    }

    /// Sets a single event's running status (spec §6 "SetRunningStatus").
    pub fn set_running_status(&self, channel: &ChannelId, event_id: EventId, status: crate::model::RunningStatus) {
        if let Some(mut guard) = try_lock_for(&self.schedules, LOCK_TIMEOUT) {
            if let Some(event) = guard.entry(*channel).or_default().events.get_mut(&event_id) {
                event.running_status = status;
            }
        }
    }

    /// Resets every event on a channel's schedule back to `Undefined`,
    /// used when an empty present/following section 0 arrives (ETR 211;
    /// spec §4.4/§8 scenario #1).
    pub fn clear_running_status(&self, channel: &ChannelId) {
        if let Some(mut guard) = try_lock_for(&self.schedules, LOCK_TIMEOUT) {
            for event in guard.entry(*channel).or_default().events.values_mut() {
                event.running_status = crate::model::RunningStatus::Undefined;
            }
        }
    }

    /// Marks that a present/following section has been seen for this
    /// channel at least once (spec §4.4/§8 scenario #1).
    pub fn set_present_seen(&self, channel: &ChannelId) {
        if let Some(mut guard) = try_lock_for(&self.schedules, LOCK_TIMEOUT) {
            guard.entry(*channel).or_default().present_seen = true;
        }
    }

    pub fn present_seen(&self, channel: &ChannelId) -> bool {
        try_lock_for(&self.schedules, LOCK_TIMEOUT)
            .and_then(|guard| guard.get(channel).map(|s| s.present_seen))
            .unwrap_or(false)
    }

    /// True once the "actual transponder" (0x5X) twin of `table_id` has
    /// completed for this channel's schedule (spec §4.4 step 6, §8
    /// scenario #3): subsequent 0x6X ("other transponder") sections for the
    /// same low nibble are dropped outright.
    pub fn on_actual_tp(&self, channel: &ChannelId, table_id: u8) -> bool {
        try_lock_for(&self.schedules, LOCK_TIMEOUT)
            .and_then(|guard| guard.get(channel).map(|s| s.actual_tp[(table_id & 0xf) as usize]))
            .unwrap_or(false)
    }

    /// Records that the 0x5X table sharing `table_id`'s low nibble has
    /// completed for this channel.
    pub fn mark_actual_tp(&self, channel: &ChannelId, table_id: u8) {
        if let Some(mut guard) = try_lock_for(&self.schedules, LOCK_TIMEOUT) {
            guard.entry(*channel).or_default().actual_tp[(table_id & 0xf) as usize] = true;
        }
    }
}

/// The wall-clock discipline sink the [`crate::tdt_processor::TdtProcessor`]
/// drives (spec §4.5 expansion).
pub trait ClockControl: Send + Sync {
    fn set_time(&self, utc: DateTime<Utc>);
    fn adjust_time(&self, delta: chrono::Duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn bounded_wait_times_out_when_lock_is_held() {
        let mutex = Arc::new(Mutex::new(0));
        let guard = mutex.lock().unwrap();
        let result = try_lock_for(&mutex, Duration::from_millis(5));
        assert!(result.is_none());
        drop(guard);
    }

    #[test]
    fn bounded_wait_succeeds_once_released() {
        let mutex = Arc::new(Mutex::new(0));
        let mutex2 = mutex.clone();
        let handle = thread::spawn(move || {
            let _guard = mutex2.lock().unwrap();
            thread::sleep(Duration::from_millis(5));
        });
        thread::sleep(Duration::from_millis(1));
        let result = try_lock_for(&mutex, Duration::from_millis(200));
        assert!(result.is_some());
        handle.join().unwrap();
    }

    #[test]
    fn channel_store_round_trips() {
        let store = ChannelStore::new();
        let channel = ChannelId::new(Source::Satellite, 1, 2, 3);
        store.insert(1, 2, 3, channel);
        assert_eq!(store.resolve(1, 2, 3), Some(channel));
        assert_eq!(store.resolve(9, 9, 9), None);
    }

    #[test]
    fn channel_store_rename_and_synthesize() {
        let store = ChannelStore::new();
        let channel = ChannelId::new(Source::Satellite, 1, 2, 3);
        store.insert(1, 2, 3, channel);
        store.rename(channel, b"Portal One");
        assert_eq!(store.name(&channel), Some(b"Portal One".to_vec()));

        let synthesized = store.synthesize(1, 2, 9, Source::Satellite);
        assert_eq!(store.resolve(1, 2, 9), Some(synthesized));
    }

    #[test]
    fn schedule_store_creates_map_on_first_use() {
        let store = ScheduleStore::new();
        let channel = ChannelId::new(Source::Terrestrial, 1, 1, 1);
        store.with_events(&channel, |events| {
            events.insert(1, Event::new(1, 1000, 60));
        });
        assert_eq!(store.event_count(&channel), 1);
    }

    #[test]
    fn schedule_store_looks_up_by_id_and_time() {
        let store = ScheduleStore::new();
        let channel = ChannelId::new(Source::Terrestrial, 1, 1, 1);
        store.add_event(&channel, Event::new(5, 1_000, 60));
        assert_eq!(store.get_event_by_id(&channel, 5).unwrap().event_id, 5);
        assert_eq!(store.get_event_by_time(&channel, 1_000).unwrap().event_id, 5);
        assert!(store.get_event_by_time(&channel, 2_000).is_none());
    }

    #[test]
    fn clear_running_status_resets_every_event() {
        let store = ScheduleStore::new();
        let channel = ChannelId::new(Source::Terrestrial, 1, 1, 1);
        store.add_event(&channel, Event::new(1, 1_000, 60));
        store.set_running_status(&channel, 1, crate::model::RunningStatus::Running);
        store.clear_running_status(&channel);
        assert_eq!(
            store.get_event_by_id(&channel, 1).unwrap().running_status,
            crate::model::RunningStatus::Undefined
        );
    }

    #[test]
    fn present_seen_and_actual_tp_latch() {
        let store = ScheduleStore::new();
        let channel = ChannelId::new(Source::Terrestrial, 1, 1, 1);
        assert!(!store.present_seen(&channel));
        store.set_present_seen(&channel);
        assert!(store.present_seen(&channel));

        assert!(!store.on_actual_tp(&channel, 0x60));
        store.mark_actual_tp(&channel, 0x50);
        assert!(store.on_actual_tp(&channel, 0x60));
        assert!(!store.on_actual_tp(&channel, 0x61));
    }
}
