//! Transmit scheduler
//!
//! Sends the inverter keepalive (0x305) and identification (0x307) once per
//! period, always as a complete pair and always in that order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{BmsLinkError, Result};
use crate::events::{EventBus, LinkEvent};
use crate::protocol::{codec, FrameId};
use crate::stats::SessionStats;
use crate::transport::CanTransport;

pub struct TransmitScheduler {
    transport: Arc<dyn CanTransport>,
    stats: Arc<SessionStats>,
    events: EventBus,
    period: Duration,
}

impl TransmitScheduler {
    pub fn new(
        transport: Arc<dyn CanTransport>,
        stats: Arc<SessionStats>,
        events: EventBus,
        period: Duration,
    ) -> Self {
        Self {
            transport,
            stats,
            events,
            period,
        }
    }

    /// Run until canceled or until a send fails.
    ///
    /// Cancellation is observed between pairs and while a send is pending.
    /// A send that completes promptly is never cut off, so pairs are only
    /// split when the transport stalls. A send error ends the loop; there is
    /// no retry.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("Transmit loop started, period {:?}", self.period);

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            if !self.send_pair(&cancel).await? {
                debug!("Transmit loop canceled during a pending send");
                break;
            }
        }

        debug!("Transmit loop stopped");
        Ok(())
    }

    /// Returns `Ok(false)` when canceled before the pair went out
    async fn send_pair(&self, cancel: &CancellationToken) -> Result<bool> {
        for id in FrameId::OUTBOUND {
            let Some(payload) = codec::encode(id) else {
                continue;
            };

            let sent = tokio::select! {
                biased;
                sent = self.transport.send(id.raw(), &payload) => sent,
                _ = cancel.cancelled() => return Ok(false),
            };
            sent.map_err(|e| BmsLinkError::transmit(id.raw(), e))?;

            let (total_count, per_id_count) = self.stats.record_sent(id);
            self.events.publish(LinkEvent::FrameSent {
                id: id.raw(),
                payload: payload.to_vec(),
                total_count,
                per_id_count,
                timestamp: Utc::now(),
            });
        }
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn sent_events(rx: &mut tokio::sync::broadcast::Receiver<LinkEvent>) -> Vec<(u32, u64, u64)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let LinkEvent::FrameSent {
                id,
                total_count,
                per_id_count,
                ..
            } = event
            {
                out.push((id, total_count, per_id_count));
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairs_alternate_with_counters() {
        let transport = Arc::new(MockTransport::new("sched"));
        let stats = Arc::new(SessionStats::new());
        let events = EventBus::new(64);
        let mut rx = events.subscribe();
        let cancel = CancellationToken::new();

        let scheduler = TransmitScheduler::new(
            transport.clone(),
            stats.clone(),
            events,
            Duration::from_secs(1),
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let sent = sent_events(&mut rx);
        assert_eq!(
            sent,
            vec![
                (0x305, 1, 1),
                (0x307, 2, 1),
                (0x305, 3, 2),
                (0x307, 4, 2),
                (0x305, 5, 3),
                (0x307, 6, 3),
            ]
        );
        assert_eq!(stats.snapshot().sent_total, 6);

        let frames = transport.sent_frames();
        assert_eq!(frames[0], (0x305, vec![0; 8]));
        assert_eq!(
            frames[1],
            (0x307, vec![0x12, 0x34, 0x56, 0x78, 0x56, 0x49, 0x43, 0x00])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_stops_loop() {
        let transport = Arc::new(MockTransport::new("sched"));
        transport.fail_send_after(3);
        let stats = Arc::new(SessionStats::new());

        let scheduler = TransmitScheduler::new(
            transport.clone(),
            stats.clone(),
            EventBus::default(),
            Duration::from_secs(1),
        );
        let err = scheduler
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BmsLinkError::TransmitError { id: 0x307, .. }));
        assert_eq!(stats.snapshot().sent_total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_stalled_send() {
        let transport = Arc::new(MockTransport::new("sched"));
        transport.stall_sends(true);
        let cancel = CancellationToken::new();

        let scheduler = TransmitScheduler::new(
            transport.clone(),
            Arc::new(SessionStats::new()),
            EventBus::default(),
            Duration::from_secs(1),
        );
        let handle = tokio::spawn(scheduler.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("loop should stop while its send is stalled");
        result.unwrap().unwrap();
        assert!(transport.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_tick_sends_nothing() {
        let transport = Arc::new(MockTransport::new("sched"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let scheduler = TransmitScheduler::new(
            transport.clone(),
            Arc::new(SessionStats::new()),
            EventBus::default(),
            Duration::from_secs(1),
        );
        scheduler.run(cancel).await.unwrap();
        assert!(transport.sent_frames().is_empty());
    }
}
