//! Frame identifiers of the BMS ⇄ inverter link

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw 11-bit CAN arbitration identifier as it appears on the bus
pub type CanId = u32;

/// Every payload on this link is a classic 8-byte CAN frame
pub const FRAME_LEN: usize = 8;

/// Direction of a frame relative to this monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Transmitted by the monitor towards the BMS
    Outbound,
    /// Transmitted by the BMS
    Inbound,
}

/// Known frames of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum FrameId {
    /// 0x305 inverter keepalive
    Keepalive = 0x305,
    /// 0x307 inverter identification
    Identification = 0x307,
    /// 0x351 charge/discharge limits; its arrival is also the BMS heartbeat
    ChargeDischarge = 0x351,
    /// 0x355 SOC/SOH
    BmsStatus = 0x355,
    /// 0x356 pack voltage, current and temperature
    BatteryInfo = 0x356,
    /// 0x35A warning bits
    Warnings = 0x35A,
}

impl FrameId {
    /// Frames the monitor transmits, in the order they go out each period
    pub const OUTBOUND: [FrameId; 2] = [FrameId::Keepalive, FrameId::Identification];

    /// Frames the monitor decodes
    pub const INBOUND: [FrameId; 4] = [
        FrameId::ChargeDischarge,
        FrameId::BmsStatus,
        FrameId::BatteryInfo,
        FrameId::Warnings,
    ];

    /// The frame whose arrival proves the BMS is alive
    pub const HEARTBEAT: FrameId = FrameId::ChargeDischarge;

    pub fn from_raw(id: CanId) -> Option<Self> {
        match id {
            0x305 => Some(FrameId::Keepalive),
            0x307 => Some(FrameId::Identification),
            0x351 => Some(FrameId::ChargeDischarge),
            0x355 => Some(FrameId::BmsStatus),
            0x356 => Some(FrameId::BatteryInfo),
            0x35A => Some(FrameId::Warnings),
            _ => None,
        }
    }

    pub fn raw(self) -> CanId {
        self as CanId
    }

    pub fn direction(self) -> Direction {
        match self {
            FrameId::Keepalive | FrameId::Identification => Direction::Outbound,
            _ => Direction::Inbound,
        }
    }

    /// Minimum payload needed to decode every field of this frame
    pub fn min_payload_len(self) -> usize {
        FRAME_LEN
    }

    /// Human readable name used in logs and tables
    pub fn name(self) -> &'static str {
        match self {
            FrameId::Keepalive => "Inverter keepalive",
            FrameId::Identification => "Inverter identification",
            FrameId::ChargeDischarge => "BMS charge/discharge info (heartbeat)",
            FrameId::BmsStatus => "BMS status",
            FrameId::BatteryInfo => "Battery info",
            FrameId::Warnings => "BMS warnings",
        }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}", self.raw())
    }
}

impl From<FrameId> for CanId {
    fn from(id: FrameId) -> Self {
        id.raw()
    }
}
