//! CAN transports
//!
//! - `traits`: the transport capability and its error type
//! - `simulator`: in-process simulated BMS
//! - `socketcan`: Linux SocketCAN (feature `socketcan`)
//! - `mock`: scripted transport for tests
//! - `factory`: picks a transport from the device configuration

pub mod factory;
pub mod mock;
pub mod simulator;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;
pub mod traits;

pub use factory::TransportFactory;
pub use mock::{MockConnector, MockTransport};
pub use simulator::SimulatedBms;
pub use traits::{CanConnector, CanTransport, TransportError};
