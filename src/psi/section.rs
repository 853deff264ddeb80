//! Event Information Section parsing (ETSI EN 300 468 §5.2.4), generalized
//! from the teacher's `psi::eit` to the full present/following and schedule
//! table-id range (0x4E..=0x6F) and UTC (not JST) time fields.

use anyhow::{Error, Result};

use crate::check_len;
use crate::descriptor::Descriptor;
use crate::time;
use crate::util;

#[derive(Debug)]
pub struct Event<'a> {
    pub event_id: u16,
    /// Unix seconds, or [`time::NVOD_REFERENCE_START_TIME`] for NVOD reference rows.
    pub start_time: i64,
    /// Seconds; zero means "unspecified" (all-ones wire field).
    pub duration: i64,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor<'a>>,
}

impl<'a> Event<'a> {
    fn parse(bytes: &[u8]) -> Result<(Event<'_>, usize), Error> {
        check_len!(bytes.len(), 12);
        let event_id = (u16::from(bytes[0]) << 8) | u16::from(bytes[1]);
        let start_time = time::decode_mjd_bcd_time(&bytes[2..7])?;
        let duration = time::decode_bcd_duration(&bytes[7..10])?;
        let running_status = bytes[10] >> 5;
        let free_ca_mode = (bytes[10] >> 4) & 1 > 0;
        let descriptors_loop_length = (usize::from(bytes[10] & 0xf) << 8) | usize::from(bytes[11]);
        check_len!(bytes.len() - 12, descriptors_loop_length);
        let mut bytes = &bytes[12..descriptors_loop_length + 12];
        let mut descriptors = Vec::new();
        while !bytes.is_empty() {
            let (desc, n) = Descriptor::parse(bytes)?;
            descriptors.push(desc);
            bytes = &bytes[n..];
        }
        Ok((
            Event {
                event_id,
                start_time,
                duration,
                running_status,
                free_ca_mode,
                descriptors,
            },
            descriptors_loop_length + 12,
        ))
    }
}

/// True for table ids carrying "present/following" or "schedule" EIT data
/// (0x4E..=0x6F); table id 0x4F is valid wire-wise but per spec §4.4 is
/// ignored outright ("broadcaster chaos").
pub fn is_eit_table_id(table_id: u8) -> bool {
    (0x4e..=0x6f).contains(&table_id)
}

#[derive(Debug)]
pub struct EventInformationSection<'a> {
    pub table_id: u8,
    pub service_id: u16,
    pub version_number: u8,
    pub current_next_indicator: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub events: Vec<Event<'a>>,
    pub crc_32: u32,
}

impl<'a> EventInformationSection<'a> {
    pub fn parse(bytes: &[u8]) -> Result<EventInformationSection<'_>, Error> {
        check_len!(bytes.len(), 14);
        let table_id = bytes[0];
        let section_length = (usize::from(bytes[1] & 0xf) << 8) | usize::from(bytes[2]);
        check_len!(bytes.len(), 3 + section_length);
        let service_id = (u16::from(bytes[3]) << 8) | u16::from(bytes[4]);
        let version_number = (bytes[5] >> 1) & 0x1f;
        let current_next_indicator = bytes[5] & 0x1;
        let section_number = bytes[6];
        let last_section_number = bytes[7];
        let transport_stream_id = (u16::from(bytes[8]) << 8) | u16::from(bytes[9]);
        let original_network_id = (u16::from(bytes[10]) << 8) | u16::from(bytes[11]);
        let segment_last_section_number = bytes[12];
        let last_table_id = bytes[13];
        let mut events = Vec::new();
        {
            let mut bytes = &bytes[14..3 + section_length - 4];
            while !bytes.is_empty() {
                let (event, n) = Event::parse(bytes)?;
                events.push(event);
                bytes = &bytes[n..];
            }
        }
        let crc_32 = util::read_u32(&bytes[3 + section_length - 4..3 + section_length])?;
        Ok(EventInformationSection {
            table_id,
            service_id,
            version_number,
            current_next_indicator,
            section_number,
            last_section_number,
            transport_stream_id,
            original_network_id,
            segment_last_section_number,
            last_table_id,
            events,
            crc_32,
        })
    }
}
