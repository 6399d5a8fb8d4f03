//! Transport factory
//!
//! Chooses the transport for a device configuration. This is the connector
//! the binary hands to the session controller.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::simulator::SimulatedBms;
use super::traits::{CanConnector, CanTransport, TransportError};
use crate::config::{DeviceConfig, SimulatorConfig, TransportKind};

/// Connector for the configured transport kind
#[derive(Debug, Clone)]
pub struct TransportFactory {
    simulator: SimulatorConfig,
}

impl TransportFactory {
    pub fn new(simulator: SimulatorConfig) -> Self {
        Self { simulator }
    }
}

#[async_trait]
impl CanConnector for TransportFactory {
    async fn connect(
        &self,
        config: &DeviceConfig,
    ) -> Result<Arc<dyn CanTransport>, TransportError> {
        if config.bit_timing().is_none() {
            return Err(TransportError::ConfigError(format!(
                "unsupported bitrate {}",
                config.bitrate
            )));
        }

        match config.kind {
            TransportKind::Sim => {
                let name = format!("sim:{}:{}", config.device_index, config.channel);
                info!("Opening simulated BMS on channel {}", config.channel);
                let transport: Arc<dyn CanTransport> =
                    Arc::new(SimulatedBms::open(name, self.simulator.clone()));
                Ok(transport)
            },
            TransportKind::Socketcan => open_socketcan(config),
        }
    }
}

#[cfg(all(target_os = "linux", feature = "socketcan"))]
fn open_socketcan(config: &DeviceConfig) -> Result<Arc<dyn CanTransport>, TransportError> {
    let transport = super::socketcan::SocketCanTransport::open(config)?;
    Ok(Arc::new(transport))
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
fn open_socketcan(_config: &DeviceConfig) -> Result<Arc<dyn CanTransport>, TransportError> {
    Err(TransportError::ConfigError(
        "SocketCAN support not compiled in (enable the `socketcan` feature on Linux)".to_string(),
    ))
}
