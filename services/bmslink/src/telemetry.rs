//! Latest decoded telemetry
//!
//! Keeps the most recent value of each record type for table rendering.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::heartbeat::HeartbeatSnapshot;
use crate::protocol::{BatteryInfo, BmsStatus, ChargeDischargeInfo, DecodedRecord, WarningFlags};
use crate::stats::StatsSnapshot;

/// Everything a status view needs, read in one go
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub connected: bool,
    pub sending: bool,
    pub receiving: bool,
    pub channel: u32,
    pub bitrate: u32,
    pub stats: StatsSnapshot,
    pub heartbeat: HeartbeatSnapshot,
    pub telemetry: TelemetrySnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timestamped<T> {
    pub value: T,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub charge_discharge: Option<Timestamped<ChargeDischargeInfo>>,
    pub bms_status: Option<Timestamped<BmsStatus>>,
    pub battery_info: Option<Timestamped<BatteryInfo>>,
    pub warnings: Option<Timestamped<WarningFlags>>,
}

impl TelemetrySnapshot {
    pub fn apply(&mut self, record: DecodedRecord, updated_at: DateTime<Utc>) {
        match record {
            DecodedRecord::ChargeDischarge(value) => {
                self.charge_discharge = Some(Timestamped { value, updated_at })
            },
            DecodedRecord::BmsStatus(value) => {
                self.bms_status = Some(Timestamped { value, updated_at })
            },
            DecodedRecord::BatteryInfo(value) => {
                self.battery_info = Some(Timestamped { value, updated_at })
            },
            DecodedRecord::Warnings(value) => {
                self.warnings = Some(Timestamped { value, updated_at })
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.charge_discharge.is_none()
            && self.bms_status.is_none()
            && self.battery_info.is_none()
            && self.warnings.is_none()
    }
}

/// Shared, lock-protected [`TelemetrySnapshot`]
#[derive(Debug, Default)]
pub struct LiveTelemetry {
    inner: RwLock<TelemetrySnapshot>,
}

impl LiveTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, record: DecodedRecord, updated_at: DateTime<Utc>) {
        self.inner.write().apply(record, updated_at);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner.read().clone()
    }

    pub fn reset(&self) {
        *self.inner.write() = TelemetrySnapshot::default();
    }
}
