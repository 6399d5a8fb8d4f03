//! Mock Transport for Testing
//!
//! Scripted CAN channel used to exercise the session loops without hardware:
//! inbound frames are queued in batches (one batch per receive poll), every
//! sent frame is recorded, and connect/send/receive failures can be injected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::traits::{CanConnector, CanTransport, TransportError};
use crate::config::DeviceConfig;
use crate::protocol::{CanId, RawFrame};

/// Mock transport state
#[derive(Debug)]
struct MockTransportState {
    open: bool,
    /// Each entry is returned by one `receive` call
    receive_queue: VecDeque<Vec<RawFrame>>,
    /// History of sent frames
    sent: Vec<(CanId, Vec<u8>)>,
    should_fail_send: bool,
    /// Sends never complete while set, like a bus-off adapter
    stall_sends: bool,
    /// Allow this many sends in total, then fail every further one
    fail_send_after: Option<usize>,
    /// Number of upcoming receive polls that fail
    pending_receive_failures: usize,
    close_count: usize,
}

/// Mock transport implementation
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    state: Mutex<MockTransportState>,
}

impl MockTransport {
    /// Create an open mock transport
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MockTransportState {
                open: true,
                receive_queue: VecDeque::new(),
                sent: Vec::new(),
                should_fail_send: false,
                stall_sends: false,
                fail_send_after: None,
                pending_receive_failures: 0,
                close_count: 0,
            }),
        }
    }

    /// Queue a batch returned by a single receive poll
    pub fn push_frames(&self, frames: Vec<RawFrame>) {
        self.state.lock().receive_queue.push_back(frames);
    }

    /// Queue a single frame as its own batch
    pub fn push_frame(&self, id: CanId, data: impl Into<Vec<u8>>) {
        self.push_frames(vec![RawFrame::new(id, data)]);
    }

    /// All frames sent so far, in order
    pub fn sent_frames(&self) -> Vec<(CanId, Vec<u8>)> {
        self.state.lock().sent.clone()
    }

    /// Make every send fail (or succeed again)
    pub fn set_send_failure(&self, should_fail: bool) {
        self.state.lock().should_fail_send = should_fail;
    }

    /// Sends started while set never complete
    pub fn stall_sends(&self, stall: bool) {
        self.state.lock().stall_sends = stall;
    }

    /// Let `count` sends succeed in total, fail the rest
    pub fn fail_send_after(&self, count: usize) {
        self.state.lock().fail_send_after = Some(count);
    }

    /// Fail the next `count` receive polls
    pub fn fail_next_receives(&self, count: usize) {
        self.state.lock().pending_receive_failures = count;
    }

    /// How many times `close` was called while open
    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Mark the transport open again, as a reconnect would
    pub fn reopen(&self) {
        self.state.lock().open = true;
    }
}

#[async_trait]
impl CanTransport for MockTransport {
    fn transport_type(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    async fn send(&self, id: CanId, payload: &[u8]) -> Result<(), TransportError> {
        let stalled = self.state.lock().stall_sends;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();

        if !state.open {
            return Err(TransportError::NotConnected);
        }

        let over_limit = state
            .fail_send_after
            .is_some_and(|limit| state.sent.len() >= limit);
        if state.should_fail_send || over_limit {
            return Err(TransportError::SendFailed("Mock send failure".to_string()));
        }

        state.sent.push((id, payload.to_vec()));
        debug!("Mock transport sent 0x{:03X}", id);
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Vec<RawFrame>, TransportError> {
        {
            let mut state = self.state.lock();

            if !state.open {
                return Err(TransportError::NotConnected);
            }

            if state.pending_receive_failures > 0 {
                state.pending_receive_failures -= 1;
                return Err(TransportError::ReceiveFailed(
                    "Mock receive failure".to_string(),
                ));
            }

            if let Some(batch) = state.receive_queue.pop_front() {
                return Ok(batch);
            }
        }

        // Nothing queued: behave like a quiet bus
        tokio::time::sleep(timeout).await;
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.close_count += 1;
            debug!("Mock transport closed");
        }
        Ok(())
    }
}

/// Connector handing out one shared [`MockTransport`]
#[derive(Debug)]
pub struct MockConnector {
    transport: Arc<MockTransport>,
    should_fail_connection: AtomicBool,
    connect_count: AtomicUsize,
    last_config: Mutex<Option<DeviceConfig>>,
}

impl MockConnector {
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self {
            transport,
            should_fail_connection: AtomicBool::new(false),
            connect_count: AtomicUsize::new(0),
            last_config: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> Arc<MockTransport> {
        Arc::clone(&self.transport)
    }

    /// Set connection failure mode
    pub fn set_connection_failure(&self, should_fail: bool) {
        self.should_fail_connection
            .store(should_fail, Ordering::SeqCst);
    }

    /// Connect attempts, failed ones included
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Device configuration of the last successful connect
    pub fn last_config(&self) -> Option<DeviceConfig> {
        self.last_config.lock().clone()
    }
}

#[async_trait]
impl CanConnector for MockConnector {
    async fn connect(
        &self,
        config: &DeviceConfig,
    ) -> Result<Arc<dyn CanTransport>, TransportError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        if self.should_fail_connection.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "Mock connection failure".to_string(),
            ));
        }

        self.transport.reopen();
        *self.last_config.lock() = Some(config.clone());
        let transport: Arc<dyn CanTransport> = self.transport.clone();
        Ok(transport)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_sent_frames() {
        let transport = MockTransport::new("test");
        transport.send(0x305, &[0; 8]).await.unwrap();
        transport.send(0x307, &[1; 8]).await.unwrap();

        let sent = transport.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (0x305, vec![0; 8]));
        assert_eq!(sent[1].0, 0x307);
    }

    #[tokio::test]
    async fn test_mock_send_failure_modes() {
        let transport = MockTransport::new("test");
        transport.fail_send_after(1);
        assert!(transport.send(0x305, &[0; 8]).await.is_ok());
        assert!(matches!(
            transport.send(0x307, &[0; 8]).await,
            Err(TransportError::SendFailed(_))
        ));

        let transport = MockTransport::new("test");
        transport.set_send_failure(true);
        assert!(transport.send(0x305, &[0; 8]).await.is_err());
        transport.set_send_failure(false);
        assert!(transport.send(0x305, &[0; 8]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_receive_batches_then_times_out() {
        let transport = MockTransport::new("test");
        transport.push_frames(vec![
            RawFrame::new(0x351u32, vec![0; 8]),
            RawFrame::new(0x355u32, vec![0; 8]),
        ]);
        transport.fail_next_receives(1);

        assert!(transport.receive(Duration::from_millis(50)).await.is_err());
        let batch = transport.receive(Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, 0x351);

        let start = tokio::time::Instant::now();
        let empty = transport.receive(Duration::from_millis(50)).await.unwrap();
        assert!(empty.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_mock_closed_transport_rejects_io() {
        let transport = MockTransport::new("test");
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.close_count(), 1);
        assert_eq!(
            transport.send(0x305, &[0; 8]).await,
            Err(TransportError::NotConnected)
        );
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_mock_connector_failure_and_reopen() {
        let transport = Arc::new(MockTransport::new("test"));
        let connector = MockConnector::new(transport.clone());
        let config = DeviceConfig::default();

        connector.set_connection_failure(true);
        assert!(connector.connect(&config).await.is_err());
        assert!(connector.last_config().is_none());

        transport.close().await.unwrap();
        connector.set_connection_failure(false);
        let handle = connector.connect(&config).await.unwrap();
        assert!(handle.is_open());
        assert_eq!(connector.connect_count(), 2);
    }
}
