//! Per-service EIT table state (spec §4.2/§4.3): one [`SectionSyncer`] per
//! table id in the present/following + schedule range, held per service id.

use std::collections::HashMap;

use crate::model::ServiceId;
use crate::syncer::SectionSyncer;

pub const FIRST_EIT_TABLE_ID: u8 = 0x4e;
pub const LAST_EIT_TABLE_ID: u8 = 0x6f;
const TABLE_COUNT: usize = (LAST_EIT_TABLE_ID - FIRST_EIT_TABLE_ID + 1) as usize;

/// `table_id - 0x4E`, or `None` outside the present/following + schedule range.
pub fn table_index(table_id: u8) -> Option<usize> {
    if (FIRST_EIT_TABLE_ID..=LAST_EIT_TABLE_ID).contains(&table_id) {
        Some((table_id - FIRST_EIT_TABLE_ID) as usize)
    } else {
        None
    }
}

/// Per-service table state: one syncer per table id, plus the 0x4E segment's
/// time span accumulated across its sections (spec §4.2 "table start/end").
pub struct EitTables {
    syncers: [SectionSyncer; TABLE_COUNT],
    table_start: Option<i64>,
    table_end: Option<i64>,
}

impl Default for EitTables {
    fn default() -> Self {
        EitTables {
            syncers: std::array::from_fn(|_| SectionSyncer::new()),
            table_start: None,
            table_end: None,
        }
    }
}

impl EitTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn syncer(&self, table_id: u8) -> Option<&SectionSyncer> {
        table_index(table_id).map(|i| &self.syncers[i])
    }

    pub fn syncer_mut(&mut self, table_id: u8) -> Option<&mut SectionSyncer> {
        table_index(table_id).map(|i| &mut self.syncers[i])
    }

    /// Records the start of the 0x4E segment, set from section_number 0.
    pub fn set_table_start(&mut self, start: i64) {
        self.table_start = Some(start);
    }

    /// Records the end of the 0x4E segment, set from whichever section holds
    /// the latest event end time seen this pass.
    pub fn set_table_end(&mut self, end: i64) {
        self.table_end = Some(end);
    }

    pub fn table_start(&self) -> Option<i64> {
        self.table_start
    }

    pub fn table_end(&self) -> Option<i64> {
        self.table_end
    }
}

#[derive(Default)]
pub struct EitTablesHash {
    services: HashMap<ServiceId, EitTables>,
}

impl EitTablesHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, service_id: ServiceId) -> &mut EitTables {
        self.services.entry(service_id).or_insert_with(EitTables::new)
    }

    pub fn get(&self, service_id: ServiceId) -> Option<&EitTables> {
        self.services.get(&service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_index_covers_present_following_and_schedule_range() {
        assert_eq!(table_index(0x4e), Some(0));
        assert_eq!(table_index(0x4f), Some(1));
        assert_eq!(table_index(0x6f), Some(TABLE_COUNT - 1));
        assert_eq!(table_index(0x70), None);
        assert_eq!(table_index(0x4d), None);
    }

    #[test]
    fn hash_creates_entries_on_demand() {
        let mut hash = EitTablesHash::new();
        assert!(hash.get(1).is_none());
        hash.entry(1).syncer_mut(0x4e).unwrap().mark_processed(0, 0, 0);
        assert!(hash.get(1).is_some());
    }

    #[test]
    fn table_start_and_end_round_trip() {
        let mut tables = EitTables::new();
        assert_eq!(tables.table_start(), None);
        tables.set_table_start(1_000);
        tables.set_table_end(5_000);
        assert_eq!(tables.table_start(), Some(1_000));
        assert_eq!(tables.table_end(), Some(5_000));
    }
}
