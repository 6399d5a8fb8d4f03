//! Event log
//!
//! Turns link events into log lines. Frame traffic and decoded telemetry go
//! to the `frames` target at debug level so they can be enabled on their own
//! (`RUST_LOG=info,frames=debug`); lifecycle, heartbeat and errors use the
//! module target.

use common::hex::encode_spaced;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, LinkEvent, SessionPhase};
use crate::protocol::{CanId, DecodedRecord, FrameId};

fn frame_label(id: CanId) -> String {
    match FrameId::from_raw(id) {
        Some(frame) => format!("{} {}", frame, frame.name()),
        None => format!("0x{:03X}", id),
    }
}

/// One-line human readable summary of a decoded record
pub fn describe_record(record: &DecodedRecord) -> String {
    match record {
        DecodedRecord::ChargeDischarge(info) => format!(
            "charge limit {:.1} V, max charge {:.1} A, max discharge {:.1} A, discharge {:.1} V",
            info.charge_voltage_limit,
            info.max_charge_current,
            info.max_discharge_current,
            info.discharge_voltage
        ),
        DecodedRecord::BmsStatus(status) => format!(
            "SOC {} %, SOH {} %, SOC (high res) {:.2} %",
            status.soc_value, status.soh_value, status.high_res_soc
        ),
        DecodedRecord::BatteryInfo(info) => format!(
            "{:.2} V, {:.1} A, {:.1} °C",
            info.battery_voltage, info.battery_current, info.battery_temperature
        ),
        DecodedRecord::Warnings(flags) => {
            let active = flags.active();
            if active.is_empty() {
                "warnings: none".to_string()
            } else {
                let names: Vec<&str> = active.iter().map(|kind| kind.name()).collect();
                format!("warnings: {}", names.join(", "))
            }
        },
    }
}

/// One-line summary of an event, without its timestamp
pub fn describe(event: &LinkEvent) -> String {
    match event {
        LinkEvent::Connected {
            transport,
            channel,
            bitrate,
            ..
        } => format!(
            "Connected to {} (channel {}, {} bit/s)",
            transport, channel, bitrate
        ),
        LinkEvent::Disconnected { .. } => "Disconnected".to_string(),
        LinkEvent::SendingStarted { .. } => "Sending started".to_string(),
        LinkEvent::SendingStopped { reason, .. } => format!("Sending stopped ({:?})", reason),
        LinkEvent::ReceivingStarted { .. } => "Receiving started".to_string(),
        LinkEvent::ReceivingStopped { .. } => "Receiving stopped".to_string(),
        LinkEvent::FrameSent {
            id,
            payload,
            total_count,
            per_id_count,
            ..
        } => format!(
            "TX {} [{}] #{} (total {})",
            frame_label(*id),
            encode_spaced(payload),
            per_id_count,
            total_count
        ),
        LinkEvent::FrameReceived { id, payload, .. } => {
            format!("RX {} [{}]", frame_label(*id), encode_spaced(payload))
        },
        LinkEvent::TelemetryDecoded { record, .. } => {
            format!("{} {}", record.frame_id(), describe_record(record))
        },
        LinkEvent::DecodeFailed { id, error, .. } => {
            format!("Dropped frame 0x{:03X}: {}", id, error)
        },
        LinkEvent::HeartbeatObserved { count, .. } => format!("Heartbeat #{}", count),
        LinkEvent::HeartbeatTimedOut { silent_for_ms, .. } => format!(
            "Heartbeat timed out after {:.1} s of silence",
            *silent_for_ms as f64 / 1000.0
        ),
        LinkEvent::SessionError { phase, message, .. } => {
            format!("{:?} error: {}", phase, message)
        },
    }
}

/// Log one event at the level it deserves
pub fn log_event(event: &LinkEvent) {
    let line = describe(event);
    match event {
        LinkEvent::FrameSent { .. }
        | LinkEvent::FrameReceived { .. }
        | LinkEvent::TelemetryDecoded { .. } => debug!(target: "frames", "{}", line),
        LinkEvent::HeartbeatObserved { .. } => debug!("{}", line),
        LinkEvent::DecodeFailed { .. } | LinkEvent::HeartbeatTimedOut { .. } => warn!("{}", line),
        LinkEvent::SessionError {
            phase: SessionPhase::Receive,
            ..
        } => warn!("{}", line),
        LinkEvent::SessionError { .. } => error!("{}", line),
        _ => info!("{}", line),
    }
}

/// Log every event on the bus until canceled
pub fn spawn_event_logger(events: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = rx.recv() => received,
            };

            match received {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event log fell behind, {} events skipped", skipped);
                },
                Err(RecvError::Closed) => break,
            }
        }
    })
}
