//! Time and Date Section parsing (ETSI EN 300 468 §5.2.5): table id 0x70,
//! a fixed 5-byte MJD+BCD UTC time field and no CRC.

use anyhow::{Error, Result};

use crate::check_len;
use crate::time;

pub const TABLE_ID: u8 = 0x70;

#[derive(Debug)]
pub struct TimeAndDateSection {
    pub table_id: u8,
    /// Unix seconds. TDT never carries the NVOD all-ones sentinel in practice,
    /// but [`time::decode_mjd_bcd_time`] is shared with EIT so the same rule applies.
    pub utc_time: i64,
}

impl TimeAndDateSection {
    pub fn parse(bytes: &[u8]) -> Result<TimeAndDateSection, Error> {
        check_len!(bytes.len(), 8);
        let table_id = bytes[0];
        let utc_time = time::decode_mjd_bcd_time(&bytes[3..8])?;
        Ok(TimeAndDateSection { table_id, utc_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Utc};

    #[test]
    fn parses_tdt_section() {
        let mut bytes = vec![TABLE_ID, 0x70, 0x05];
        bytes.extend_from_slice(&[0xE5, 0xE1, 0x00, 0x00, 0x00]); // 2020-01-01 00:00:00 UTC
        let section = TimeAndDateSection::parse(&bytes).unwrap();
        assert_eq!(section.table_id, TABLE_ID);
        let dt = Utc.timestamp_opt(section.utc_time, 0).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2020, 1, 1));
    }
}
