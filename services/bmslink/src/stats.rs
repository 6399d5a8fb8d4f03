//! Session counters
//!
//! Owned by the session controller and shared with the loops it spawns.
//! Mutation is crate-private; outside the crate only snapshots are visible.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::protocol::FrameId;

#[derive(Debug, Default)]
pub struct SessionStats {
    sent_total: AtomicU64,
    sent_keepalive: AtomicU64,
    sent_identification: AtomicU64,
    received_total: AtomicU64,
    decode_failures: AtomicU64,
    receive_errors: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sent_total: u64,
    pub sent_keepalive: u64,
    pub sent_identification: u64,
    pub received_total: u64,
    pub decode_failures: u64,
    pub receive_errors: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a sent frame, returning the new (total, per-ID) counts
    pub(crate) fn record_sent(&self, id: FrameId) -> (u64, u64) {
        let total = self.sent_total.fetch_add(1, Ordering::Relaxed) + 1;
        let per_id = match id {
            FrameId::Keepalive => self.sent_keepalive.fetch_add(1, Ordering::Relaxed) + 1,
            FrameId::Identification => {
                self.sent_identification.fetch_add(1, Ordering::Relaxed) + 1
            },
            _ => 0,
        };
        (total, per_id)
    }

    pub(crate) fn record_received(&self) -> u64 {
        self.received_total.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.sent_total.store(0, Ordering::Relaxed);
        self.sent_keepalive.store(0, Ordering::Relaxed);
        self.sent_identification.store(0, Ordering::Relaxed);
        self.received_total.store(0, Ordering::Relaxed);
        self.decode_failures.store(0, Ordering::Relaxed);
        self.receive_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent_total: self.sent_total.load(Ordering::Relaxed),
            sent_keepalive: self.sent_keepalive.load(Ordering::Relaxed),
            sent_identification: self.sent_identification.load(Ordering::Relaxed),
            received_total: self.received_total.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}
