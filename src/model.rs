//! The data shapes the core reads and writes through the handler chain (spec §3).
//! These are not "the" schedule/channel store — that store lives outside this
//! crate (spec §1) — but a reference shape used by the [`crate::handlers`] traits
//! and the in-memory test/demo implementations.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub type EventId = u16;
pub type ServiceId = u16;
pub type TransportStreamId = u16;
pub type OriginalNetworkId = u16;

/// Where a transponder's signal physically originates. Carried alongside
/// network/transport-stream/service ids to build a full channel key, since the
/// same (onid, tsid, sid) triple can legitimately appear on more than one
/// delivery system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Satellite,
    Cable,
    Terrestrial,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    pub source: Source,
    pub original_network_id: OriginalNetworkId,
    pub transport_stream_id: TransportStreamId,
    pub service_id: ServiceId,
}

impl ChannelId {
    pub fn new(
        source: Source,
        original_network_id: OriginalNetworkId,
        transport_stream_id: TransportStreamId,
        service_id: ServiceId,
    ) -> Self {
        ChannelId {
            source,
            original_network_id,
            transport_stream_id,
            service_id,
        }
    }
}

/// DVB `running_status` (EN 300 468 table 6), in ascending numeric order so
/// derived `PartialOrd`/`Ord` match the wire values the glitch-correction logic
/// in spec §4.4 compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunningStatus {
    Undefined,
    NotRunning,
    StartsInFewSeconds,
    Pausing,
    Running,
    ServiceOffAir,
}

impl RunningStatus {
    pub fn from_wire(value: u8) -> RunningStatus {
        match value {
            1 => RunningStatus::NotRunning,
            2 => RunningStatus::StartsInFewSeconds,
            3 => RunningStatus::Pausing,
            4 => RunningStatus::Running,
            5 => RunningStatus::ServiceOffAir,
            _ => RunningStatus::Undefined,
        }
    }
}

/// A component_descriptor row (spec §4.4 "Component").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub stream_content: u8,
    pub stream_content_ext: u8,
    pub component_type: u8,
    pub component_tag: u8,
    pub language_code: [u8; 3],
    pub description: Vec<u8>,
}

/// The minimum-age rating produced by the §4.4 parental-rating mapping table,
/// plus the country the rating applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentalRating {
    pub country_code: [u8; 3],
    pub minimum_age: u8,
}

/// The external schedule's view of one event (spec §3 "Event"). This crate's
/// [`crate::handlers::ScheduleStore`] reference implementation stores these;
/// a real VDR-like deployment's schedule store would have its own richer type,
/// reached only through the trait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    /// Unix seconds, or [`crate::time::NVOD_REFERENCE_START_TIME`] for NVOD reference rows.
    pub start_time: i64,
    pub duration: i64,
    pub table_id: u8,
    pub running_status: RunningStatus,
    pub version: u8,
    pub seen: bool,
    pub has_timer: bool,
    pub title: Option<Vec<u8>>,
    pub short_text: Option<Vec<u8>>,
    pub description: Option<Vec<u8>>,
    pub components: Vec<Component>,
    pub parental_rating: Option<ParentalRating>,
    pub vps: Option<i64>,
    pub link_channels: HashSet<ChannelId>,
    pub contents: Vec<u8>,
}

impl Event {
    pub fn new(event_id: EventId, start_time: i64, duration: i64) -> Self {
        Event {
            event_id,
            start_time,
            duration,
            table_id: 0,
            running_status: RunningStatus::Undefined,
            version: 0,
            seen: false,
            has_timer: false,
            title: None,
            short_text: None,
            description: None,
            components: Vec::new(),
            parental_rating: None,
            vps: None,
            link_channels: HashSet::new(),
            contents: Vec::new(),
        }
    }

    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration
    }
}
