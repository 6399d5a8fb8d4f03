//! Link events
//!
//! Everything the session does is published on a broadcast bus. Consumers
//! (the frame log, the status table, tests) subscribe; the protocol core never
//! waits on them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::protocol::{CanId, DecodedRecord};

/// Default bus capacity; slow subscribers see `Lagged` beyond this
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Session activity an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Connect,
    Send,
    Receive,
}

/// Why the transmit loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    TransmitFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Connected {
        transport: String,
        channel: u32,
        bitrate: u32,
        timestamp: DateTime<Utc>,
    },
    Disconnected {
        timestamp: DateTime<Utc>,
    },
    SendingStarted {
        timestamp: DateTime<Utc>,
    },
    SendingStopped {
        reason: StopReason,
        timestamp: DateTime<Utc>,
    },
    ReceivingStarted {
        timestamp: DateTime<Utc>,
    },
    ReceivingStopped {
        timestamp: DateTime<Utc>,
    },
    FrameSent {
        id: CanId,
        payload: Vec<u8>,
        total_count: u64,
        per_id_count: u64,
        timestamp: DateTime<Utc>,
    },
    FrameReceived {
        id: CanId,
        payload: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
    TelemetryDecoded {
        record: DecodedRecord,
        timestamp: DateTime<Utc>,
    },
    DecodeFailed {
        id: CanId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    HeartbeatObserved {
        count: u64,
        timestamp: DateTime<Utc>,
    },
    HeartbeatTimedOut {
        silent_for_ms: u64,
        timestamp: DateTime<Utc>,
    },
    SessionError {
        phase: SessionPhase,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl LinkEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LinkEvent::Connected { timestamp, .. }
            | LinkEvent::Disconnected { timestamp }
            | LinkEvent::SendingStarted { timestamp }
            | LinkEvent::SendingStopped { timestamp, .. }
            | LinkEvent::ReceivingStarted { timestamp }
            | LinkEvent::ReceivingStopped { timestamp }
            | LinkEvent::FrameSent { timestamp, .. }
            | LinkEvent::FrameReceived { timestamp, .. }
            | LinkEvent::TelemetryDecoded { timestamp, .. }
            | LinkEvent::DecodeFailed { timestamp, .. }
            | LinkEvent::HeartbeatObserved { timestamp, .. }
            | LinkEvent::HeartbeatTimedOut { timestamp, .. }
            | LinkEvent::SessionError { timestamp, .. } => *timestamp,
        }
    }

    /// Short kind name, matching the serialized `event` tag
    pub fn kind(&self) -> &'static str {
        match self {
            LinkEvent::Connected { .. } => "connected",
            LinkEvent::Disconnected { .. } => "disconnected",
            LinkEvent::SendingStarted { .. } => "sending_started",
            LinkEvent::SendingStopped { .. } => "sending_stopped",
            LinkEvent::ReceivingStarted { .. } => "receiving_started",
            LinkEvent::ReceivingStopped { .. } => "receiving_stopped",
            LinkEvent::FrameSent { .. } => "frame_sent",
            LinkEvent::FrameReceived { .. } => "frame_received",
            LinkEvent::TelemetryDecoded { .. } => "telemetry_decoded",
            LinkEvent::DecodeFailed { .. } => "decode_failed",
            LinkEvent::HeartbeatObserved { .. } => "heartbeat_observed",
            LinkEvent::HeartbeatTimedOut { .. } => "heartbeat_timed_out",
            LinkEvent::SessionError { .. } => "session_error",
        }
    }
}

/// Broadcast bus for [`LinkEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers; no subscribers is not an error
    pub fn publish(&self, event: LinkEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(LinkEvent::SendingStarted {
            timestamp: Utc::now(),
        });

        assert_eq!(a.recv().await.unwrap().kind(), "sending_started");
        assert_eq!(b.recv().await.unwrap().kind(), "sending_started");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(LinkEvent::Disconnected {
            timestamp: Utc::now(),
        });
    }

    #[test]
    fn test_serialized_tag_matches_kind() {
        let event = LinkEvent::SessionError {
            phase: SessionPhase::Receive,
            message: "bus error".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.kind());
        assert_eq!(json["phase"], "receive");
    }
}
