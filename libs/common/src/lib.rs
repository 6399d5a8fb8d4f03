//! Basic library shared by the BMS link services
//!
//! Provides the ambient pieces every binary in the workspace needs:
//! - logging bootstrap (console + rolling file)
//! - layered configuration loading
//! - graceful shutdown signalling
//! - hex formatting for frame payloads

pub mod config_loader;
pub mod error;
pub mod hex;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};
