//! Frame codec
//!
//! Stateless translation between 8-byte payloads and typed records. All
//! multi-byte fields on this link are 16-bit little endian.

use thiserror::Error;

use super::ids::{CanId, FrameId, FRAME_LEN};
use super::types::{
    BatteryInfo, BmsStatus, ChargeDischargeInfo, DecodedRecord, WarningFlags, WarningKind,
};

/// Per-frame decode failure. Never fatal to a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Payload shorter than the fields of the frame require
    #[error("frame 0x{id:03X} too short: need {expected} bytes, got {actual}")]
    TooShort {
        id: CanId,
        expected: usize,
        actual: usize,
    },

    /// Not one of the inbound telemetry frames
    #[error("unrecognized frame id 0x{id:03X}")]
    Unrecognized { id: CanId },
}

/// Identification bytes sent in 0x307: a fixed serial followed by "VIC" and a reserved zero
const IDENTIFICATION: [u8; FRAME_LEN] = [0x12, 0x34, 0x56, 0x78, b'V', b'I', b'C', 0x00];

/// 0x305 payload: all zero
pub fn encode_keepalive() -> [u8; FRAME_LEN] {
    [0u8; FRAME_LEN]
}

/// 0x307 payload: `12 34 56 78 56 49 43 00`
pub fn encode_identification() -> [u8; FRAME_LEN] {
    IDENTIFICATION
}

/// Payload for an outbound frame, `None` for inbound IDs
pub fn encode(id: FrameId) -> Option<[u8; FRAME_LEN]> {
    match id {
        FrameId::Keepalive => Some(encode_keepalive()),
        FrameId::Identification => Some(encode_identification()),
        _ => None,
    }
}

/// Decode an inbound payload.
///
/// Bytes past the 8th are ignored. A short payload is rejected as a whole,
/// so a record is either fully populated or not produced at all.
pub fn decode(id: CanId, payload: &[u8]) -> Result<DecodedRecord, CodecError> {
    let frame = match FrameId::from_raw(id) {
        Some(frame) if FrameId::INBOUND.contains(&frame) => frame,
        _ => return Err(CodecError::Unrecognized { id }),
    };

    let expected = frame.min_payload_len();
    if payload.len() < expected {
        return Err(CodecError::TooShort {
            id,
            expected,
            actual: payload.len(),
        });
    }

    let record = match frame {
        FrameId::ChargeDischarge => DecodedRecord::ChargeDischarge(ChargeDischargeInfo {
            charge_voltage_limit: f64::from(read_u16_le(payload, 0)) / 10.0,
            max_charge_current: f64::from(read_u16_le(payload, 2)) / 10.0,
            max_discharge_current: f64::from(read_u16_le(payload, 4)) / 10.0,
            discharge_voltage: f64::from(read_u16_le(payload, 6)) / 10.0,
        }),
        FrameId::BmsStatus => DecodedRecord::BmsStatus(BmsStatus {
            soc_value: read_u16_le(payload, 0),
            soh_value: read_u16_le(payload, 2),
            high_res_soc: f64::from(read_u16_le(payload, 4)) / 100.0,
        }),
        FrameId::BatteryInfo => DecodedRecord::BatteryInfo(BatteryInfo {
            battery_voltage: f64::from(read_i16_le(payload, 0)) / 100.0,
            battery_current: f64::from(read_i16_le(payload, 2)) / 10.0,
            battery_temperature: f64::from(read_i16_le(payload, 4)) / 10.0,
        }),
        FrameId::Warnings => DecodedRecord::Warnings(decode_warnings(payload)),
        // Filtered by the INBOUND check above
        FrameId::Keepalive | FrameId::Identification => {
            return Err(CodecError::Unrecognized { id })
        },
    };

    Ok(record)
}

fn decode_warnings(payload: &[u8]) -> WarningFlags {
    let mut flags = WarningFlags::default();
    for kind in WarningKind::ALL {
        let (byte, mask) = kind.location();
        flags.set(kind, payload[byte] & mask != 0);
    }
    flags
}

/// Unsigned 16-bit little endian read; caller guarantees `offset + 1 < data.len()`
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Signed 16-bit little endian read: raw values above 32767 wrap to negative
fn read_i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}
