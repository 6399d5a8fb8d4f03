//! Heartbeat supervision
//!
//! The BMS proves it is alive by sending 0x351. The supervisor records each
//! sighting and, when asked, decides whether the deadline has passed. It holds
//! no timers of its own: the receive loop feeds it the current instant.
//!
//! Status moves `Waiting -> Normal -> TimedOut -> Normal`. A timeout is a
//! level, reported once per transition into it.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    /// No heartbeat seen since the session (or receiving) started
    Waiting,
    Normal,
    TimedOut,
}

/// Heartbeat bookkeeping of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    pub last_seen: Option<Instant>,
    pub count: u64,
    pub status: HeartbeatStatus,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self {
            last_seen: None,
            count: 0,
            status: HeartbeatStatus::Waiting,
        }
    }
}

/// Serializable view for tables and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartbeatSnapshot {
    pub status: HeartbeatStatus,
    pub count: u64,
    /// Time since the last heartbeat, if one was seen
    pub since_last_ms: Option<u64>,
}

#[derive(Debug)]
pub struct HeartbeatSupervisor {
    state: HeartbeatState,
    deadline: Duration,
}

impl HeartbeatSupervisor {
    pub fn new(deadline: Duration) -> Self {
        Self {
            state: HeartbeatState::default(),
            deadline,
        }
    }

    /// Record a heartbeat; returns the new heartbeat count
    pub fn on_heartbeat_observed(&mut self, now: Instant) -> u64 {
        self.state.last_seen = Some(now);
        self.state.count += 1;
        self.state.status = HeartbeatStatus::Normal;
        self.state.count
    }

    /// Check the deadline.
    ///
    /// Returns the silence duration only on the transition into `TimedOut`;
    /// `None` while healthy, while waiting, and while already timed out.
    pub fn check(&mut self, now: Instant) -> Option<Duration> {
        let last_seen = self.state.last_seen?;
        if self.state.status == HeartbeatStatus::TimedOut {
            return None;
        }

        let silent_for = now.saturating_duration_since(last_seen);
        if silent_for > self.deadline {
            self.state.status = HeartbeatStatus::TimedOut;
            return Some(silent_for);
        }
        None
    }

    /// Back to `Waiting` with no history
    pub fn reset(&mut self) {
        self.state = HeartbeatState::default();
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn snapshot(&self, now: Instant) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            status: self.state.status,
            count: self.state.count,
            since_last_ms: self
                .state
                .last_seen
                .map(|seen| now.saturating_duration_since(seen).as_millis() as u64),
        }
    }
}
