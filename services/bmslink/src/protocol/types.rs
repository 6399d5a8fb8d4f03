//! Typed telemetry records decoded from BMS frames

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CanId, FrameId};

/// A frame as handed over by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub id: CanId,
    /// Always 8 bytes on a conformant bus; shorter payloads are malformed
    pub data: Vec<u8>,
    /// Host wall-clock time at which the frame was taken off the transport
    pub timestamp: DateTime<Utc>,
    /// Driver tick counter, when the adapter provides one
    pub device_timestamp: Option<u32>,
}

impl RawFrame {
    pub fn new(id: impl Into<CanId>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            timestamp: Utc::now(),
            device_timestamp: None,
        }
    }

    pub fn with_device_timestamp(mut self, ticks: u32) -> Self {
        self.device_timestamp = Some(ticks);
        self
    }

    pub fn frame_id(&self) -> Option<FrameId> {
        FrameId::from_raw(self.id)
    }
}

/// 0x351 charge and discharge limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargeDischargeInfo {
    /// V
    pub charge_voltage_limit: f64,
    /// A
    pub max_charge_current: f64,
    /// A
    pub max_discharge_current: f64,
    /// V
    pub discharge_voltage: f64,
}

/// 0x355 state of charge / state of health
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BmsStatus {
    /// %
    pub soc_value: u16,
    /// %
    pub soh_value: u16,
    /// %, 0.01 resolution
    pub high_res_soc: f64,
}

/// 0x356 pack measurements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryInfo {
    /// V, signed
    pub battery_voltage: f64,
    /// A, signed (negative while discharging)
    pub battery_current: f64,
    /// °C, signed
    pub battery_temperature: f64,
}

/// One named condition reported in the 0x35A warning bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    GeneralWarning,
    BatteryHighVoltage,
    BatteryLowVoltage,
    BatteryHighTemp,
    BatteryLowTemp,
    BatteryHighTempCharge,
    BatteryLowTempCharge,
    BatteryHighCurrent,
    BatteryHighChargeCurrent,
    ContactorWarning,
    ShortCircuitWarning,
    BmsInternal,
    CellImbalance,
}

impl WarningKind {
    /// Table order: byte 4 bits 0-1 first, byte 7 bits 0-1 last
    pub const ALL: [WarningKind; 13] = [
        WarningKind::GeneralWarning,
        WarningKind::BatteryHighVoltage,
        WarningKind::BatteryLowVoltage,
        WarningKind::BatteryHighTemp,
        WarningKind::BatteryLowTemp,
        WarningKind::BatteryHighTempCharge,
        WarningKind::BatteryLowTempCharge,
        WarningKind::BatteryHighCurrent,
        WarningKind::BatteryHighChargeCurrent,
        WarningKind::ContactorWarning,
        WarningKind::ShortCircuitWarning,
        WarningKind::BmsInternal,
        WarningKind::CellImbalance,
    ];

    /// Payload byte and 2-bit mask carrying this condition
    pub fn location(self) -> (usize, u8) {
        match self {
            WarningKind::GeneralWarning => (4, 0x03),
            WarningKind::BatteryHighVoltage => (4, 0x0C),
            WarningKind::BatteryLowVoltage => (4, 0x30),
            WarningKind::BatteryHighTemp => (4, 0xC0),
            WarningKind::BatteryLowTemp => (5, 0x03),
            WarningKind::BatteryHighTempCharge => (5, 0x0C),
            WarningKind::BatteryLowTempCharge => (5, 0x30),
            WarningKind::BatteryHighCurrent => (5, 0xC0),
            WarningKind::BatteryHighChargeCurrent => (6, 0x03),
            WarningKind::ContactorWarning => (6, 0x0C),
            WarningKind::ShortCircuitWarning => (6, 0x30),
            WarningKind::BmsInternal => (6, 0xC0),
            WarningKind::CellImbalance => (7, 0x03),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WarningKind::GeneralWarning => "general_warning",
            WarningKind::BatteryHighVoltage => "battery_high_voltage",
            WarningKind::BatteryLowVoltage => "battery_low_voltage",
            WarningKind::BatteryHighTemp => "battery_high_temp",
            WarningKind::BatteryLowTemp => "battery_low_temp",
            WarningKind::BatteryHighTempCharge => "battery_high_temp_charge",
            WarningKind::BatteryLowTempCharge => "battery_low_temp_charge",
            WarningKind::BatteryHighCurrent => "battery_high_current",
            WarningKind::BatteryHighChargeCurrent => "battery_high_charge_current",
            WarningKind::ContactorWarning => "contactor_warning",
            WarningKind::ShortCircuitWarning => "short_circuit_warning",
            WarningKind::BmsInternal => "bms_internal",
            WarningKind::CellImbalance => "cell_imbalance",
        }
    }
}

/// 0x35A warning flags
///
/// A flag is active when any bit of its 2-bit group is set; the group is not
/// interpreted as a severity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningFlags {
    pub general_warning: bool,
    pub battery_high_voltage: bool,
    pub battery_low_voltage: bool,
    pub battery_high_temp: bool,
    pub battery_low_temp: bool,
    pub battery_high_temp_charge: bool,
    pub battery_low_temp_charge: bool,
    pub battery_high_current: bool,
    pub battery_high_charge_current: bool,
    pub contactor_warning: bool,
    pub short_circuit_warning: bool,
    pub bms_internal: bool,
    pub cell_imbalance: bool,
}

impl WarningFlags {
    pub fn get(&self, kind: WarningKind) -> bool {
        match kind {
            WarningKind::GeneralWarning => self.general_warning,
            WarningKind::BatteryHighVoltage => self.battery_high_voltage,
            WarningKind::BatteryLowVoltage => self.battery_low_voltage,
            WarningKind::BatteryHighTemp => self.battery_high_temp,
            WarningKind::BatteryLowTemp => self.battery_low_temp,
            WarningKind::BatteryHighTempCharge => self.battery_high_temp_charge,
            WarningKind::BatteryLowTempCharge => self.battery_low_temp_charge,
            WarningKind::BatteryHighCurrent => self.battery_high_current,
            WarningKind::BatteryHighChargeCurrent => self.battery_high_charge_current,
            WarningKind::ContactorWarning => self.contactor_warning,
            WarningKind::ShortCircuitWarning => self.short_circuit_warning,
            WarningKind::BmsInternal => self.bms_internal,
            WarningKind::CellImbalance => self.cell_imbalance,
        }
    }

    pub fn set(&mut self, kind: WarningKind, active: bool) {
        let slot = match kind {
            WarningKind::GeneralWarning => &mut self.general_warning,
            WarningKind::BatteryHighVoltage => &mut self.battery_high_voltage,
            WarningKind::BatteryLowVoltage => &mut self.battery_low_voltage,
            WarningKind::BatteryHighTemp => &mut self.battery_high_temp,
            WarningKind::BatteryLowTemp => &mut self.battery_low_temp,
            WarningKind::BatteryHighTempCharge => &mut self.battery_high_temp_charge,
            WarningKind::BatteryLowTempCharge => &mut self.battery_low_temp_charge,
            WarningKind::BatteryHighCurrent => &mut self.battery_high_current,
            WarningKind::BatteryHighChargeCurrent => &mut self.battery_high_charge_current,
            WarningKind::ContactorWarning => &mut self.contactor_warning,
            WarningKind::ShortCircuitWarning => &mut self.short_circuit_warning,
            WarningKind::BmsInternal => &mut self.bms_internal,
            WarningKind::CellImbalance => &mut self.cell_imbalance,
        };
        *slot = active;
    }

    /// Active conditions in table order
    pub fn active(&self) -> Vec<WarningKind> {
        WarningKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind))
            .collect()
    }

    pub fn any(&self) -> bool {
        WarningKind::ALL.into_iter().any(|kind| self.get(kind))
    }
}

/// Result of decoding one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DecodedRecord {
    ChargeDischarge(ChargeDischargeInfo),
    BmsStatus(BmsStatus),
    BatteryInfo(BatteryInfo),
    Warnings(WarningFlags),
}

impl DecodedRecord {
    pub fn frame_id(&self) -> FrameId {
        match self {
            DecodedRecord::ChargeDischarge(_) => FrameId::ChargeDischarge,
            DecodedRecord::BmsStatus(_) => FrameId::BmsStatus,
            DecodedRecord::BatteryInfo(_) => FrameId::BatteryInfo,
            DecodedRecord::Warnings(_) => FrameId::Warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_layout_covers_bytes_4_to_7_without_overlap() {
        let mut seen = std::collections::HashSet::new();
        for kind in WarningKind::ALL {
            let (byte, mask) = kind.location();
            assert!((4..=7).contains(&byte));
            assert_eq!(mask.count_ones(), 2);
            assert!(seen.insert((byte, mask)), "{:?} overlaps", kind);
        }
    }

    #[test]
    fn test_warning_set_get_and_active_order() {
        let mut flags = WarningFlags::default();
        assert!(!flags.any());

        flags.set(WarningKind::CellImbalance, true);
        flags.set(WarningKind::GeneralWarning, true);
        assert!(flags.any());
        assert_eq!(
            flags.active(),
            vec![WarningKind::GeneralWarning, WarningKind::CellImbalance]
        );
        assert_eq!(WarningKind::CellImbalance.name(), "cell_imbalance");
    }

    #[test]
    fn test_raw_frame_lookup() {
        let frame = RawFrame::new(0x356u32, vec![0; 8]).with_device_timestamp(42);
        assert_eq!(frame.frame_id(), Some(FrameId::BatteryInfo));
        assert_eq!(frame.device_timestamp, Some(42));
        assert_eq!(RawFrame::new(0x7FFu32, vec![]).frame_id(), None);
    }
}
