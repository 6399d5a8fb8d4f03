//! Transport Layer Traits
//!
//! The CAN adapter sits behind these traits so the protocol loops can run
//! against real hardware, the simulated BMS or a scripted mock alike.
//!
//! Methods take `&self`: the session controller lends one
//! `Arc<dyn CanTransport>` to the transmit and receive loops at the same time,
//! so implementations synchronize internally.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::protocol::{CanId, RawFrame};

/// Transport layer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport was closed or never opened
    #[error("Not connected")]
    NotConnected,

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::IoError(err.to_string())
    }
}

/// An open CAN channel
#[async_trait]
pub trait CanTransport: Send + Sync + fmt::Debug {
    /// Get transport type identifier
    fn transport_type(&self) -> &str;

    /// Get human-readable transport name
    fn name(&self) -> &str;

    /// Whether the channel is still open
    fn is_open(&self) -> bool;

    /// Transmit one standard-ID data frame
    async fn send(&self, id: CanId, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for inbound frames.
    ///
    /// Returns an empty vector when nothing arrived in time. Frames are
    /// returned in bus order.
    async fn receive(&self, timeout: Duration) -> Result<Vec<RawFrame>, TransportError>;

    /// Close the channel. Closing twice is not an error.
    async fn close(&self) -> Result<(), TransportError>;

    /// Get transport-specific diagnostic information
    async fn diagnostics(&self) -> HashMap<String, String> {
        let mut diag = HashMap::new();
        diag.insert("type".to_string(), self.transport_type().to_string());
        diag.insert("name".to_string(), self.name().to_string());
        diag.insert("open".to_string(), self.is_open().to_string());
        diag
    }
}

/// Opens a [`CanTransport`] for a device configuration
#[async_trait]
pub trait CanConnector: Send + Sync {
    async fn connect(&self, config: &DeviceConfig)
        -> Result<Arc<dyn CanTransport>, TransportError>;
}
