//! SocketCAN transport (Linux)
//!
//! The interface must already be up at the configured bitrate
//! (`ip link set can0 up type can bitrate 500000`); this transport only
//! opens a raw socket on it. Blocking socket calls run on the blocking pool.

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ::socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, StandardId};
use tracing::{debug, info};

use super::traits::{CanTransport, TransportError};
use crate::config::DeviceConfig;
use crate::protocol::{CanId, RawFrame};

/// Upper bound of frames returned by one receive call
const MAX_BATCH: usize = 64;

/// Wait used to drain frames already queued behind the first one
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Raw CAN socket bound to one interface
pub struct SocketCanTransport {
    interface: String,
    socket: Mutex<Option<Arc<CanSocket>>>,
}

impl fmt::Debug for SocketCanTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketCanTransport")
            .field("interface", &self.interface)
            .field("open", &self.is_open())
            .finish()
    }
}

impl SocketCanTransport {
    /// Open the interface named by the device configuration
    pub fn open(device: &DeviceConfig) -> Result<Self, TransportError> {
        let interface = device.resolved_interface();
        let socket = CanSocket::open(&interface).map_err(|e| {
            TransportError::ConnectionFailed(format!("{}: {}", interface, e))
        })?;

        info!(
            "SocketCAN interface {} opened (expected bitrate {} bit/s)",
            interface, device.bitrate
        );

        Ok(Self {
            interface,
            socket: Mutex::new(Some(Arc::new(socket))),
        })
    }

    fn socket(&self) -> Result<Arc<CanSocket>, TransportError> {
        self.socket
            .lock()
            .as_ref()
            .cloned()
            .ok_or(TransportError::NotConnected)
    }
}

fn to_raw_frame(frame: CanFrame) -> Option<RawFrame> {
    match frame {
        CanFrame::Data(data) => Some(RawFrame::new(data.raw_id(), data.data().to_vec())),
        CanFrame::Remote(_) | CanFrame::Error(_) => None,
    }
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[async_trait]
impl CanTransport for SocketCanTransport {
    fn transport_type(&self) -> &str {
        "socketcan"
    }

    fn name(&self) -> &str {
        &self.interface
    }

    fn is_open(&self) -> bool {
        self.socket.lock().is_some()
    }

    async fn send(&self, id: CanId, payload: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket()?;

        let std_id = u16::try_from(id)
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(|| TransportError::SendFailed(format!("0x{:X} is not a standard id", id)))?;
        let frame = CanFrame::new(std_id, payload).ok_or_else(|| {
            TransportError::SendFailed(format!("invalid payload of {} bytes", payload.len()))
        })?;

        tokio::task::spawn_blocking(move || socket.write_frame(&frame))
            .await
            .map_err(|e| TransportError::SendFailed(format!("send task failed: {}", e)))?
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn receive(&self, timeout: Duration) -> Result<Vec<RawFrame>, TransportError> {
        let socket = self.socket()?;

        tokio::task::spawn_blocking(move || {
            let mut frames = Vec::new();

            match socket.read_frame_timeout(timeout) {
                Ok(frame) => frames.extend(to_raw_frame(frame)),
                Err(e) if is_timeout(e.kind()) => return Ok(frames),
                Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }

            while frames.len() < MAX_BATCH {
                match socket.read_frame_timeout(DRAIN_TIMEOUT) {
                    Ok(frame) => frames.extend(to_raw_frame(frame)),
                    Err(_) => break,
                }
            }

            Ok(frames)
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(format!("receive task failed: {}", e)))?
    }

    async fn close(&self) -> Result<(), TransportError> {
        // The socket is released once in-flight blocking calls drop their clone
        if self.socket.lock().take().is_some() {
            debug!("SocketCAN interface {} closed", self.interface);
        }
        Ok(())
    }
}
