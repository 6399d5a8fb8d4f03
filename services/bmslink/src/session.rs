//! Session controller
//!
//! Owns one connect -> disconnect session: the open transport, the transmit
//! and receive loops, and the counters and heartbeat state they update.
//! All lifecycle operations are idempotent and serialized by one async lock;
//! the lock is never held by the loops themselves, so `disconnect` can be
//! called from any event handler, the heartbeat timeout path included.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LinkConfig;
use crate::diagnostics::{self, Diagnosis, ProbePlan, ProbeReport};
use crate::dispatcher::ReceiveDispatcher;
use crate::error::{BmsLinkError, Result};
use crate::events::{EventBus, LinkEvent, SessionPhase, StopReason};
use crate::heartbeat::{HeartbeatState, HeartbeatSupervisor};
use crate::scheduler::TransmitScheduler;
use crate::stats::SessionStats;
use crate::telemetry::{LinkSnapshot, LiveTelemetry};
use crate::transport::{CanConnector, CanTransport};

/// A spawned loop and the token that stops it
struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LoopHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait for the loop to exit; the loop publishes its own stop event.
    /// A panicked loop surfaces as `InternalError`.
    async fn join(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }

    async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }
}

struct Inner {
    config: LinkConfig,
    transport: Option<Arc<dyn CanTransport>>,
    sender: Option<LoopHandle>,
    receiver: Option<LoopHandle>,
}

pub struct SessionController {
    connector: Arc<dyn CanConnector>,
    events: EventBus,
    stats: Arc<SessionStats>,
    heartbeat: Arc<Mutex<HeartbeatSupervisor>>,
    telemetry: Arc<LiveTelemetry>,
    connected: AtomicBool,
    sending: Arc<AtomicBool>,
    receiving: Arc<AtomicBool>,
    channel: AtomicU32,
    bitrate: u32,
    inner: tokio::sync::Mutex<Inner>,
}

impl SessionController {
    pub fn new(config: LinkConfig, connector: Arc<dyn CanConnector>) -> Self {
        Self::with_event_bus(config, connector, EventBus::default())
    }

    pub fn with_event_bus(
        config: LinkConfig,
        connector: Arc<dyn CanConnector>,
        events: EventBus,
    ) -> Self {
        let deadline = config.timing.heartbeat_deadline();
        Self {
            connector,
            events,
            stats: Arc::new(SessionStats::new()),
            heartbeat: Arc::new(Mutex::new(HeartbeatSupervisor::new(deadline))),
            telemetry: Arc::new(LiveTelemetry::new()),
            connected: AtomicBool::new(false),
            sending: Arc::new(AtomicBool::new(false)),
            receiving: Arc::new(AtomicBool::new(false)),
            channel: AtomicU32::new(config.device.channel),
            bitrate: config.device.bitrate,
            inner: tokio::sync::Mutex::new(Inner {
                config,
                transport: None,
                sender: None,
                receiver: None,
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::SeqCst)
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.lock().state()
    }

    pub async fn config(&self) -> LinkConfig {
        self.inner.lock().await.config.clone()
    }

    /// Open the transport.
    ///
    /// Returns `Ok(false)` when already connected. On failure nothing is
    /// changed and a `SessionError{connect}` event is published.
    pub async fn connect(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.transport.is_some() {
            debug!("Connect requested while connected");
            return Ok(false);
        }

        inner.config.validate()?;
        let device = inner.config.device.clone();
        info!(
            "Connecting {:?} device {} channel {} at {} bit/s",
            device.kind, device.device_index, device.channel, device.bitrate
        );

        let transport = match self.connector.connect(&device).await {
            Ok(transport) => transport,
            Err(e) => {
                error!("Connect failed: {}", e);
                self.events.publish(LinkEvent::SessionError {
                    phase: SessionPhase::Connect,
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(BmsLinkError::ConnectError(e));
            },
        };

        self.stats.reset();
        self.heartbeat.lock().reset();
        self.telemetry.reset();
        self.connected.store(true, Ordering::SeqCst);

        info!("Connected to {}", transport.name());
        self.events.publish(LinkEvent::Connected {
            transport: transport.name().to_string(),
            channel: device.channel,
            bitrate: device.bitrate,
            timestamp: Utc::now(),
        });
        inner.transport = Some(transport);
        Ok(true)
    }

    /// Start the keepalive/identification loop. `Ok(false)` if already running.
    pub async fn start_sending(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let transport = inner.transport.clone().ok_or(BmsLinkError::NotConnected)?;

        if inner.sender.as_ref().is_some_and(LoopHandle::is_running) {
            return Ok(false);
        }
        // A loop that ended on a send error is still parked here
        if let Some(finished) = inner.sender.take() {
            if let Err(e) = finished.join().await {
                warn!("Previous transmit loop: {}", e);
            }
        }

        let scheduler = TransmitScheduler::new(
            transport,
            self.stats.clone(),
            self.events.clone(),
            inner.config.timing.transmit_period(),
        );

        self.sending.store(true, Ordering::SeqCst);
        self.events.publish(LinkEvent::SendingStarted {
            timestamp: Utc::now(),
        });

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            let events = self.events.clone();
            let sending = self.sending.clone();
            tokio::spawn(async move {
                let reason = match scheduler.run(cancel).await {
                    Ok(()) => StopReason::Requested,
                    Err(e) => {
                        error!("Transmit loop failed: {}", e);
                        events.publish(LinkEvent::SessionError {
                            phase: SessionPhase::Send,
                            message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        StopReason::TransmitFailed
                    },
                };
                sending.store(false, Ordering::SeqCst);
                events.publish(LinkEvent::SendingStopped {
                    reason,
                    timestamp: Utc::now(),
                });
            })
        };

        inner.sender = Some(LoopHandle { cancel, task });
        Ok(true)
    }

    /// Stop the transmit loop and wait for it. `Ok(false)` if it was not running.
    pub async fn stop_sending(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.sender.take() {
            Some(handle) => {
                let was_running = handle.is_running();
                handle.stop().await?;
                Ok(was_running)
            },
            None => Ok(false),
        }
    }

    /// Start the receive loop; the heartbeat goes back to `Waiting`.
    pub async fn start_receiving(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let transport = inner.transport.clone().ok_or(BmsLinkError::NotConnected)?;

        if inner.receiver.as_ref().is_some_and(LoopHandle::is_running) {
            return Ok(false);
        }
        if let Some(finished) = inner.receiver.take() {
            if let Err(e) = finished.join().await {
                warn!("Previous receive loop: {}", e);
            }
        }

        self.heartbeat.lock().reset();

        let dispatcher = ReceiveDispatcher::new(
            transport,
            self.stats.clone(),
            self.events.clone(),
            self.heartbeat.clone(),
            self.telemetry.clone(),
            inner.config.timing.poll_timeout(),
        );

        self.receiving.store(true, Ordering::SeqCst);
        self.events.publish(LinkEvent::ReceivingStarted {
            timestamp: Utc::now(),
        });

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            let events = self.events.clone();
            let receiving = self.receiving.clone();
            tokio::spawn(async move {
                dispatcher.run(cancel).await;
                receiving.store(false, Ordering::SeqCst);
                events.publish(LinkEvent::ReceivingStopped {
                    timestamp: Utc::now(),
                });
            })
        };

        inner.receiver = Some(LoopHandle { cancel, task });
        Ok(true)
    }

    /// Stop the receive loop and wait for it. `Ok(false)` if it was not running.
    pub async fn stop_receiving(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.receiver.take() {
            Some(handle) => {
                let was_running = handle.is_running();
                handle.stop().await?;
                Ok(was_running)
            },
            None => Ok(false),
        }
    }

    /// Start receiving, then sending
    pub async fn start_all(&self) -> Result<()> {
        self.start_receiving().await?;
        self.start_sending().await?;
        Ok(())
    }

    /// Stop both loops, close the transport and clear session state.
    ///
    /// Returns `Ok(false)` when there was nothing to disconnect.
    pub async fn disconnect(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        let sender = inner.sender.take();
        let receiver = inner.receiver.take();
        // Cancel both first so they wind down in parallel
        for handle in sender.iter().chain(receiver.iter()) {
            handle.cancel.cancel();
        }
        for handle in sender.into_iter().chain(receiver) {
            if let Err(e) = handle.join().await {
                error!("Session loop ended abnormally: {}", e);
            }
        }

        let Some(transport) = inner.transport.take() else {
            return Ok(false);
        };

        if let Err(e) = transport.close().await {
            warn!("Closing {} failed: {}", transport.name(), e);
        }

        self.stats.reset();
        self.heartbeat.lock().reset();
        self.telemetry.reset();
        self.connected.store(false, Ordering::SeqCst);

        info!("Disconnected from {}", transport.name());
        self.events.publish(LinkEvent::Disconnected {
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Move to the other adapter channel (0 <-> 1).
    ///
    /// A connected session is reconnected on the new channel and the loops
    /// that were running are started again. Returns the new channel.
    pub async fn switch_channel(&self) -> Result<u32> {
        let was_connected = self.is_connected();
        let was_sending = self.is_sending();
        let was_receiving = self.is_receiving();

        self.disconnect().await?;

        let channel = {
            let mut inner = self.inner.lock().await;
            let next = if inner.config.device.channel == 0 { 1 } else { 0 };
            inner.config.device.channel = next;
            next
        };
        self.channel.store(channel, Ordering::SeqCst);
        info!("Switched to channel {}", channel);

        if was_connected {
            self.connect().await?;
            if was_receiving {
                self.start_receiving().await?;
            }
            if was_sending {
                self.start_sending().await?;
            }
        }
        Ok(channel)
    }

    /// Current state for tables and status views
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            connected: self.is_connected(),
            sending: self.is_sending(),
            receiving: self.is_receiving(),
            channel: self.channel.load(Ordering::SeqCst),
            bitrate: self.bitrate,
            stats: self.stats.snapshot(),
            heartbeat: self.heartbeat.lock().snapshot(Instant::now()),
            telemetry: self.telemetry.snapshot(),
        }
    }

    /// Listen on the open transport for a fixed time without decoding into
    /// the session. Refused while the receive loop owns the transport.
    pub async fn probe(&self, plan: ProbePlan) -> Result<ProbeReport> {
        let inner = self.inner.lock().await;
        if inner.receiver.as_ref().is_some_and(LoopHandle::is_running) {
            return Err(BmsLinkError::busy("stop receiving before running a probe"));
        }
        let transport = inner.transport.clone().ok_or(BmsLinkError::NotConnected)?;

        // Keep the lock: receiving must not start halfway through the probe
        Ok(diagnostics::receive_probe(transport.as_ref(), plan).await)
    }

    /// Diagnose the connection, probing the bus when it is free
    pub async fn diagnose(&self) -> Result<Diagnosis> {
        let probe = if self.is_connected() && !self.is_receiving() {
            Some(self.probe(ProbePlan::Standard).await?)
        } else {
            None
        };
        let config = self.config().await;
        Ok(diagnostics::diagnose(&config, &self.snapshot(), probe.as_ref()))
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for handle in inner.sender.iter().chain(inner.receiver.iter()) {
            handle.cancel.cancel();
        }
    }
}
