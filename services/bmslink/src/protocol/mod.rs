//! BMS link protocol
//!
//! Frame identifiers, typed records and the stateless codec. Nothing in this
//! module performs I/O or keeps state.

pub mod codec;
pub mod ids;
pub mod types;

// Re-export commonly used types
pub use codec::{decode, encode, encode_identification, encode_keepalive, CodecError};
pub use ids::{CanId, Direction, FrameId, FRAME_LEN};
pub use types::{
    BatteryInfo, BmsStatus, ChargeDischargeInfo, DecodedRecord, RawFrame, WarningFlags,
    WarningKind,
};
