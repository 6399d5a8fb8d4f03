//! Receive dispatcher
//!
//! Drains the transport with short bounded polls, routes every inbound frame
//! through the codec and republishes the results. The heartbeat deadline is
//! checked on every iteration, so a silent bus is noticed within one poll.
//!
//! Nothing that happens to a single frame or a single poll ends the loop;
//! only cancellation does.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventBus, LinkEvent, SessionPhase};
use crate::heartbeat::HeartbeatSupervisor;
use crate::protocol::{codec, CodecError, FrameId, RawFrame};
use crate::stats::SessionStats;
use crate::telemetry::LiveTelemetry;
use crate::transport::CanTransport;

/// Minimum spacing of the "still listening" line during silence
const LISTENING_LOG_INTERVAL: Duration = Duration::from_secs(10);

pub struct ReceiveDispatcher {
    transport: Arc<dyn CanTransport>,
    stats: Arc<SessionStats>,
    events: EventBus,
    heartbeat: Arc<Mutex<HeartbeatSupervisor>>,
    telemetry: Arc<LiveTelemetry>,
    poll_timeout: Duration,
}

impl ReceiveDispatcher {
    pub fn new(
        transport: Arc<dyn CanTransport>,
        stats: Arc<SessionStats>,
        events: EventBus,
        heartbeat: Arc<Mutex<HeartbeatSupervisor>>,
        telemetry: Arc<LiveTelemetry>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            stats,
            events,
            heartbeat,
            telemetry,
            poll_timeout,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Receive loop started on {}, poll timeout {:?}",
            self.transport.name(),
            self.poll_timeout
        );

        let mut last_listening_log = Instant::now();

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = self.transport.receive(self.poll_timeout) => polled,
            };

            match polled {
                Ok(frames) if frames.is_empty() => {
                    if last_listening_log.elapsed() >= LISTENING_LOG_INTERVAL {
                        debug!("Listening for BMS frames, bus quiet");
                        last_listening_log = Instant::now();
                    }
                },
                Ok(frames) => {
                    for frame in frames {
                        self.handle_frame(frame);
                    }
                    last_listening_log = Instant::now();
                },
                Err(e) => {
                    warn!("Receive poll failed: {}", e);
                    self.stats.record_receive_error();
                    self.events.publish(LinkEvent::SessionError {
                        phase: SessionPhase::Receive,
                        message: e.to_string(),
                        timestamp: Utc::now(),
                    });

                    // A failing transport often fails instantly; keep the poll cadence
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_timeout) => {},
                    }
                },
            }

            self.check_heartbeat(Instant::now());
        }

        debug!("Receive loop stopped");
    }

    fn handle_frame(&self, frame: RawFrame) {
        self.stats.record_received();
        self.events.publish(LinkEvent::FrameReceived {
            id: frame.id,
            payload: frame.data.clone(),
            timestamp: frame.timestamp,
        });

        // Arrival alone is the liveness signal, whatever the payload holds
        if frame.id == FrameId::HEARTBEAT.raw() {
            let count = self.heartbeat.lock().on_heartbeat_observed(Instant::now());
            self.events.publish(LinkEvent::HeartbeatObserved {
                count,
                timestamp: frame.timestamp,
            });
        }

        match codec::decode(frame.id, &frame.data) {
            Ok(record) => {
                self.telemetry.update(record, frame.timestamp);
                self.events.publish(LinkEvent::TelemetryDecoded {
                    record,
                    timestamp: frame.timestamp,
                });
            },
            Err(CodecError::Unrecognized { id }) => {
                debug!("Ignoring frame 0x{:03X}", id);
            },
            Err(e) => {
                warn!("Discarding malformed frame: {}", e);
                self.stats.record_decode_failure();
                self.events.publish(LinkEvent::DecodeFailed {
                    id: frame.id,
                    error: e.to_string(),
                    timestamp: frame.timestamp,
                });
            },
        }
    }

    fn check_heartbeat(&self, now: Instant) {
        let timed_out = self.heartbeat.lock().check(now);
        if let Some(silent_for) = timed_out {
            warn!(
                "BMS heartbeat lost: no 0x351 for {:.1}s",
                silent_for.as_secs_f64()
            );
            self.events.publish(LinkEvent::HeartbeatTimedOut {
                silent_for_ms: silent_for.as_millis() as u64,
                timestamp: Utc::now(),
            });
        }
    }
}
