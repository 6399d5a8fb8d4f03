//! Error handling for the BMS link service
//!
//! Per-frame codec failures and per-poll receive failures never reach this
//! type from the loops; they are published as events and the loop goes on.
//! `BmsLinkError` is what the session controller returns to its callers.

use thiserror::Error;

use crate::protocol::{CanId, CodecError};
use crate::transport::TransportError;

/// BMS link error type
#[derive(Error, Debug, Clone)]
pub enum BmsLinkError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Opening the transport failed; the session stays disconnected
    #[error("Connect failed: {0}")]
    ConnectError(#[source] TransportError),

    /// Sending a frame failed; only the transmit loop stops
    #[error("Transmit of 0x{id:03X} failed: {source}")]
    TransmitError {
        id: CanId,
        #[source]
        source: TransportError,
    },

    /// Payload could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Operation needs an open transport
    #[error("Not connected")]
    NotConnected,

    /// Operation conflicts with a running loop
    #[error("Busy: {0}")]
    Busy(String),

    /// Task join or other internal failures
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the BMS link service
pub type Result<T> = std::result::Result<T, BmsLinkError>;

impl BmsLinkError {
    pub fn config(msg: impl Into<String>) -> Self {
        BmsLinkError::ConfigError(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        BmsLinkError::Busy(msg.into())
    }

    pub fn transmit(id: CanId, source: TransportError) -> Self {
        BmsLinkError::TransmitError { id, source }
    }
}

impl From<common::Error> for BmsLinkError {
    fn from(err: common::Error) -> Self {
        BmsLinkError::ConfigError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BmsLinkError {
    fn from(err: tokio::task::JoinError) -> Self {
        BmsLinkError::InternalError(format!("Task join failed: {}", err))
    }
}
