//! Link configuration
//!
//! Loaded in layers: built-in defaults, then an optional YAML/TOML/JSON file,
//! then `BMSLINK_` environment variables (`BMSLINK_DEVICE__CHANNEL=1`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BmsLinkError, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "BMSLINK_";

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub device: DeviceConfig,
    pub timing: TimingConfig,
    pub heartbeat: HeartbeatConfig,
    pub simulator: SimulatorConfig,
    pub logging: LoggingConfig,
}

/// Which transport backs the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process simulated BMS
    Sim,
    /// Linux SocketCAN interface
    Socketcan,
}

/// CAN adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub kind: TransportKind,
    /// SocketCAN interface; `{channel}` is replaced by the channel index
    pub interface: String,
    /// Adapter type code of USB-CAN boxes (4 = USBCAN-2)
    pub device_type: u32,
    pub device_index: u32,
    /// Adapter channel, 0 or 1
    pub channel: u32,
    /// Bus bitrate in bit/s
    pub bitrate: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Sim,
            interface: "can{channel}".to_string(),
            device_type: 4,
            device_index: 0,
            channel: 0,
            bitrate: 500_000,
        }
    }
}

impl DeviceConfig {
    /// Interface name with the channel placeholder filled in
    pub fn resolved_interface(&self) -> String {
        self.interface
            .replace("{channel}", &self.channel.to_string())
    }

    /// SJA1000 bus timing registers (Timing0, Timing1) for the bitrate
    pub fn bit_timing(&self) -> Option<(u8, u8)> {
        bit_timing(self.bitrate)
    }
}

/// Timing register pair for a supported bitrate
pub fn bit_timing(bitrate: u32) -> Option<(u8, u8)> {
    match bitrate {
        250_000 => Some((0x03, 0x1C)),
        500_000 => Some((0x00, 0x1C)),
        _ => None,
    }
}

/// Loop periods and deadlines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Keepalive/identification period
    pub transmit_period_ms: u64,
    /// Upper bound of a single receive poll
    pub poll_timeout_ms: u64,
    /// Maximum silence after a heartbeat before it is declared lost
    pub heartbeat_deadline_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            transmit_period_ms: 1000,
            poll_timeout_ms: 50,
            heartbeat_deadline_ms: 3000,
        }
    }
}

impl TimingConfig {
    pub fn transmit_period(&self) -> Duration {
        Duration::from_millis(self.transmit_period_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.heartbeat_deadline_ms)
    }
}

/// Reaction to a lost heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Disconnect the session when the heartbeat times out
    pub disconnect_on_timeout: bool,
}

/// Behaviour of the simulated BMS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Interval between telemetry bursts (0x351, 0x355, 0x356, 0x35A)
    pub frame_period_ms: u64,
    /// Only talk while keepalives from the inverter side arrive
    pub require_keepalive: bool,
    /// Go silent this many seconds after opening
    pub silence_after_secs: Option<u64>,
    /// Length of the silent window
    pub silence_duration_secs: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            frame_period_ms: 1000,
            require_keepalive: false,
            silence_after_secs: None,
            silence_duration_secs: 5,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for the daily log file
    pub dir: String,
    pub enable_file: bool,
    /// JSON lines in the log file
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            enable_file: false,
            json: false,
        }
    }
}

impl LinkConfig {
    /// Load defaults, then `file`, then environment overrides, and validate
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: LinkConfig = common::config_loader::load_config(file, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session loops cannot run with
    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        if timing.transmit_period_ms == 0 {
            return Err(BmsLinkError::config("timing.transmit_period_ms must be > 0"));
        }
        if timing.poll_timeout_ms == 0 {
            return Err(BmsLinkError::config("timing.poll_timeout_ms must be > 0"));
        }
        if timing.heartbeat_deadline_ms == 0 {
            return Err(BmsLinkError::config(
                "timing.heartbeat_deadline_ms must be > 0",
            ));
        }
        if timing.poll_timeout_ms >= timing.heartbeat_deadline_ms {
            return Err(BmsLinkError::config(format!(
                "timing.poll_timeout_ms ({}) must be shorter than timing.heartbeat_deadline_ms ({})",
                timing.poll_timeout_ms, timing.heartbeat_deadline_ms
            )));
        }

        if self.device.bit_timing().is_none() {
            return Err(BmsLinkError::config(format!(
                "Unsupported bitrate {}: expected 250000 or 500000",
                self.device.bitrate
            )));
        }
        if self.device.channel > 1 {
            return Err(BmsLinkError::config(format!(
                "device.channel must be 0 or 1, got {}",
                self.device.channel
            )));
        }
        if self.device.kind == TransportKind::Socketcan && self.device.interface.trim().is_empty() {
            return Err(BmsLinkError::config("device.interface must not be empty"));
        }

        if self.simulator.frame_period_ms == 0 {
            return Err(BmsLinkError::config("simulator.frame_period_ms must be > 0"));
        }

        Ok(())
    }
}
