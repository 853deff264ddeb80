//! Transport stream packet parsing and section reassembly, synchronous
//! rewrite of the teacher's `ts::packet` (which built on a `tokio_util`
//! `Decoder`); this crate's processing model has no async runtime (spec §5),
//! so packets are parsed and fed to a per-PID reassembler one at a time.

use anyhow::{bail, Result};

use crate::check_len;

pub const TS_PACKET_LENGTH: usize = 188;
const SYNC_BYTE: u8 = 0x47;

#[derive(Debug, Clone)]
pub struct TsPacket<'a> {
    pub transport_error_indicator: bool,
    pub payload_unit_start_indicator: bool,
    pub pid: u16,
    pub continuity_counter: u8,
    pub payload: Option<&'a [u8]>,
}

impl<'a> TsPacket<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<TsPacket<'a>> {
        check_len!(bytes.len(), TS_PACKET_LENGTH);
        if bytes[0] != SYNC_BYTE {
            bail!("sync byte mismatch: {:#x}", bytes[0]);
        }
        let transport_error_indicator = bytes[1] & 0x80 > 0;
        let payload_unit_start_indicator = bytes[1] & 0x40 > 0;
        let pid = (u16::from(bytes[1] & 0x1f) << 8) | u16::from(bytes[2]);
        let adaptation_field_control = (bytes[3] & 0x30) >> 4;
        let continuity_counter = bytes[3] & 0xf;

        if transport_error_indicator {
            return Ok(TsPacket {
                transport_error_indicator,
                payload_unit_start_indicator,
                pid,
                continuity_counter,
                payload: None,
            });
        }

        let mut offset = 4;
        if adaptation_field_control == 0b10 || adaptation_field_control == 0b11 {
            check_len!(bytes.len(), offset + 1);
            let adaptation_field_length = usize::from(bytes[offset]);
            offset += 1 + adaptation_field_length;
        }
        let payload = if adaptation_field_control == 0b01 || adaptation_field_control == 0b11 {
            check_len!(bytes.len(), offset);
            Some(&bytes[offset..])
        } else {
            None
        };

        Ok(TsPacket {
            transport_error_indicator,
            payload_unit_start_indicator,
            pid,
            continuity_counter,
            payload,
        })
    }
}

/// Reassembles PSI sections (one `pointer_field`-prefixed payload per PUSI
/// packet, continued across later packets on the same PID) into complete
/// section byte runs.
#[derive(Default)]
pub struct SectionReassembler {
    buffer: Vec<u8>,
    expected_len: Option<usize>,
    last_continuity: Option<u8>,
}

impl SectionReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn section_len(buf: &[u8]) -> Option<usize> {
        if buf.len() < 3 {
            return None;
        }
        let len = (usize::from(buf[1] & 0xf) << 8) | usize::from(buf[2]);
        Some(3 + len)
    }

    /// Feeds one packet's worth of payload. Returns a complete section's
    /// bytes once the run is fully buffered; otherwise `None`.
    pub fn feed(&mut self, packet: &TsPacket<'_>) -> Option<Vec<u8>> {
        let payload = packet.payload?;

        if let Some(prev) = self.last_continuity {
            if !packet.payload_unit_start_indicator && prev == packet.continuity_counter {
                // Duplicate packet (retransmitted under the same continuity
                // counter); do not append it twice.
                return None;
            }
        }
        self.last_continuity = Some(packet.continuity_counter);

        if packet.payload_unit_start_indicator {
            if payload.is_empty() {
                return None;
            }
            let pointer = usize::from(payload[0]);
            let tail = &payload[1 + pointer..];
            self.buffer.clear();
            self.buffer.extend_from_slice(tail);
            self.expected_len = Self::section_len(&self.buffer);
        } else if self.expected_len.is_some() {
            self.buffer.extend_from_slice(payload);
        }

        match self.expected_len {
            Some(len) if self.buffer.len() >= len => {
                let section = self.buffer[..len].to_vec();
                self.buffer.drain(..len);
                self.expected_len = Self::section_len(&self.buffer);
                Some(section)
            }
            _ => None,
        }
    }
}
