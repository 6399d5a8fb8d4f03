//! BMS Link Monitor Library
//!
//! Protocol core of a battery management system ⇄ inverter CAN link monitor.
//! The monitor plays the inverter side of the link: it transmits the 0x305
//! keepalive and 0x307 identification frames once per period, decodes the
//! BMS telemetry frames (0x351, 0x355, 0x356, 0x35A) and watches 0x351 as the
//! BMS heartbeat.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │ SessionController│──►│ TransmitScheduler│──►│                 │
//! │ (connect/stop)  │    │ (0x305, 0x307)  │    │  CanTransport   │
//! │                 │──►│ ReceiveDispatcher│◄──│ (sim/socketcan) │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │
//!                 codec ◄─────────┼─────────► HeartbeatSupervisor
//!                                 ▼
//!                    EventBus ──► event log / status table
//! ```
//!
//! - **`protocol`**: frame IDs, typed records, stateless codec
//! - **`transport`**: the CAN capability and its implementations
//! - **`session`**: lifecycle owner of one connect → disconnect session
//! - **`events`**: broadcast bus carrying everything the session does

pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod event_log;
pub mod events;
pub mod heartbeat;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod telemetry;
pub mod transport;

pub use config::LinkConfig;
pub use error::{BmsLinkError, Result};
pub use events::{EventBus, LinkEvent, SessionPhase, StopReason};
pub use heartbeat::{HeartbeatStatus, HeartbeatSupervisor};
pub use session::SessionController;
pub use telemetry::LinkSnapshot;
