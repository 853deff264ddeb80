//! DVB time decoding: Modified Julian Date + BCD time fields (ETSI EN 300 468 §4.3),
//! and the VPS/PDC anchor computation used by the extended-event descriptor handling.

use anyhow::ensure;
use chrono::{Datelike, TimeZone, Utc};

/// 5-byte MJD+BCD field with every bit set to 1: used by NVOD reference events to
/// mark "no real start time, this is a reference row" (see spec §4.4). We preserve
/// this as a literal `-1` rather than folding it into the same "unspecified" bucket
/// as an all-ones duration, so callers can distinguish the two.
pub const NVOD_REFERENCE_START_TIME: i64 = -1;

/// Roughly two years after the Unix epoch; sections parsed while the wall clock
/// reads earlier than this are treated as "clock not set yet" (spec §4.4 step 2).
pub fn valid_time_threshold() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2007, 1, 1, 0, 0, 0).unwrap()
}

fn bcd_digit_pair(byte: u8) -> u32 {
    u32::from((byte >> 4) * 10 + (byte & 0xf))
}

/// Decodes a DVB `MJD_hour_minute_second` 5-byte field (EIT start_time / TDT
/// UTC_time) into Unix seconds. The field is unsigned and represents UTC directly
/// (no zone offset, unlike some ARIB profiles that fix JST).
///
/// The literal all-ones pattern is decoded specially, returning
/// [`NVOD_REFERENCE_START_TIME`], matching the "interpreted as a negative number"
/// rule from spec §4.4; callers that don't care about NVOD rows can ignore this.
pub fn decode_mjd_bcd_time(bytes: &[u8]) -> anyhow::Result<i64> {
    ensure!(bytes.len() >= 5, "mjd/bcd time field too short: {}", bytes.len());
    if bytes.iter().all(|b| *b == 0xff) {
        return Ok(NVOD_REFERENCE_START_TIME);
    }
    let mjd = (u32::from(bytes[0]) << 8) | u32::from(bytes[1]);
    let (y, m, d) = mjd_to_gregorian(mjd);
    let hh = bcd_digit_pair(bytes[2]);
    let mm = bcd_digit_pair(bytes[3]);
    let ss = bcd_digit_pair(bytes[4]);
    let dt = Utc
        .with_ymd_and_hms(y as i32, m, d, hh, mm, ss)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid broadcast date/time {}-{}-{} {}:{}:{}", y, m, d, hh, mm, ss))?;
    Ok(dt.timestamp())
}

/// Decodes a DVB 3-byte BCD `hour_minute_second` duration field into seconds.
/// All bits set means "unspecified"; per spec §4.4 this collapses to zero so the
/// `startTime > 0 && duration == 0` drop rule can see it.
pub fn decode_bcd_duration(bytes: &[u8]) -> anyhow::Result<i64> {
    ensure!(bytes.len() >= 3, "bcd duration field too short: {}", bytes.len());
    if bytes[0] == 0xff && bytes[1] == 0xff && bytes[2] == 0xff {
        return Ok(0);
    }
    let h = i64::from(bcd_digit_pair(bytes[0]));
    let m = i64::from(bcd_digit_pair(bytes[1]));
    let s = i64::from(bcd_digit_pair(bytes[2]));
    Ok(h * 3600 + m * 60 + s)
}

/// Converts a Modified Julian Date to a Gregorian (year, month, day), per the
/// algorithm in ETSI EN 300 468 annex C.
fn mjd_to_gregorian(mjd: u32) -> (u32, u32, u32) {
    let yp = ((f64::from(mjd) - 15078.2) / 365.25) as u32;
    let mp = ((f64::from(mjd) - 14956.1 - (f64::from(yp) * 365.25) as u32 as f64) / 30.6001) as u32;
    let day_frac = mjd - 14956 - (f64::from(yp) * 365.25) as u32 - (f64::from(mp) * 30.6001) as u32;
    let k = if mp == 14 || mp == 15 { 1 } else { 0 };
    let year = yp + k + 1900;
    let month = mp - 1 - k * 12;
    (year, month, day_frac)
}

/// Computes the Programme Delivery Control (VPS) anchor for an event: a
/// broadcaster-supplied month/day/hour/minute, resolved against a year taken
/// from `now` and bumped by one in either direction if the PDC month and the
/// current month straddle a year boundary (e.g. broadcast in December
/// announcing a January VPS time belongs to next year).
pub fn pdc_anchor(now: chrono::DateTime<Utc>, month: u32, day: u32, hour: u32, minute: u32) -> anyhow::Result<chrono::DateTime<Utc>> {
    let diff = month as i32 - now.month() as i32;
    let year = if diff > 6 {
        now.year() - 1
    } else if diff < -6 {
        now.year() + 1
    } else {
        now.year()
    };
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .ok_or_else(|| anyhow::anyhow!("invalid PDC date {}-{}-{} {}:{}", year, month, day, hour, minute))
}
