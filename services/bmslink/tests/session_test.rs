//! Session controller integration tests
//!
//! Drive a full session through the public API against the mock transport
//! and the simulated BMS, with tokio time paused.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use bmslink::config::LinkConfig;
use bmslink::error::BmsLinkError;
use bmslink::events::{LinkEvent, SessionPhase, StopReason};
use bmslink::heartbeat::HeartbeatStatus;
use bmslink::session::SessionController;
use bmslink::transport::{MockConnector, MockTransport, TransportFactory};

const BATTERY_INFO: [u8; 8] = [0x00, 0x14, 0x83, 0xFF, 0xFD, 0x00, 0x00, 0x00];

fn mock_session() -> (SessionController, Arc<MockConnector>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new("integration"));
    let connector = Arc::new(MockConnector::new(transport.clone()));
    let controller = SessionController::new(LinkConfig::default(), connector.clone());
    (controller, connector, transport)
}

fn drain(rx: &mut Receiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pairs_are_sent_in_order_with_counters() {
    let (controller, _, transport) = mock_session();
    let mut rx = controller.subscribe();

    controller.connect().await.unwrap();
    controller.start_sending().await.unwrap();
    settle(2500).await;
    controller.stop_sending().await.unwrap();

    let sent: Vec<(u32, u64, u64)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            LinkEvent::FrameSent {
                id,
                total_count,
                per_id_count,
                ..
            } => Some((id, total_count, per_id_count)),
            _ => None,
        })
        .collect();

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

    let frames = transport.sent_frames();
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[0].1, vec![0u8; 8]);
    assert_eq!(
        frames[1].1,
        vec![0x12, 0x34, 0x56, 0x78, 0x56, 0x49, 0x43, 0x00]
    );

    let stats = controller.snapshot().stats;
    assert_eq!(stats.sent_keepalive, 3);
    assert_eq!(stats.sent_identification, 3);
    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_sending_is_idempotent() {
    let (controller, _, _) = mock_session();
    let mut rx = controller.subscribe();

    controller.connect().await.unwrap();
    assert!(controller.start_sending().await.unwrap());
    assert!(!controller.start_sending().await.unwrap());
    settle(100).await;

    assert!(controller.stop_sending().await.unwrap());
    assert!(!controller.stop_sending().await.unwrap());
    assert!(!controller.is_sending());

    let stops: Vec<StopReason> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            LinkEvent::SendingStopped { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(stops, vec![StopReason::Requested]);
    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_receiving_is_idempotent() {
    let (controller, _, _) = mock_session();
    let mut rx = controller.subscribe();

    controller.connect().await.unwrap();
    assert!(controller.start_receiving().await.unwrap());
    assert!(!controller.start_receiving().await.unwrap());
    settle(100).await;

    assert!(controller.stop_receiving().await.unwrap());
    assert!(!controller.stop_receiving().await.unwrap());
    assert!(!controller.is_receiving());

    let events = drain(&mut rx);
    let started = events
        .iter()
        .filter(|event| matches!(event, LinkEvent::ReceivingStarted { .. }))
        .count();
    let stopped = events
        .iter()
        .filter(|event| matches!(event, LinkEvent::ReceivingStopped { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(stopped, 1);
    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_stops_sending_but_not_receiving() {
    let (controller, _, transport) = mock_session();
    let mut rx = controller.subscribe();
    // The second 0x307 is the fourth frame and fails
    transport.fail_send_after(3);

    controller.connect().await.unwrap();
    controller.start_all().await.unwrap();
    settle(1500).await;

    assert!(!controller.is_sending());
    assert!(controller.is_receiving());
    assert_eq!(controller.snapshot().stats.sent_total, 3);

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        LinkEvent::SessionError {
            phase: SessionPhase::Send,
            ..
        }
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        LinkEvent::SendingStopped {
            reason: StopReason::TransmitFailed,
            ..
        }
    )));

    // Receive loop still works
    transport.push_frame(0x351, vec![0x10, 0x27, 0, 0, 0, 0, 0, 0]);
    settle(100).await;
    assert_eq!(controller.heartbeat_state().count, 1);

    // Sending can be restarted once the bus is healthy again
    transport.fail_send_after(usize::MAX);
    assert!(controller.start_sending().await.unwrap());
    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_receive_errors_are_tolerated() {
    let (controller, _, transport) = mock_session();
    let mut rx = controller.subscribe();
    transport.fail_next_receives(3);
    transport.push_frame(0x356, BATTERY_INFO.to_vec());

    controller.connect().await.unwrap();
    controller.start_receiving().await.unwrap();
    settle(500).await;

    assert!(controller.is_receiving());
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.stats.receive_errors, 3);
    assert_eq!(snapshot.stats.received_total, 1);
    let battery = snapshot.telemetry.battery_info.unwrap().value;
    assert!((battery.battery_voltage - 51.2).abs() < 1e-9);
    assert!((battery.battery_current + 12.5).abs() < 1e-9);

    let receive_errors = drain(&mut rx)
        .iter()
        .filter(|event| {
            matches!(
                event,
                LinkEvent::SessionError {
                    phase: SessionPhase::Receive,
                    ..
                }
            )
        })
        .count();
    assert_eq!(receive_errors, 3);
    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_times_out_and_recovers() {
    let (controller, _, transport) = mock_session();
    let mut rx = controller.subscribe();
    transport.push_frame(0x351, vec![0; 8]);

    controller.connect().await.unwrap();
    controller.start_receiving().await.unwrap();
    settle(100).await;
    assert_eq!(controller.heartbeat_state().status, HeartbeatStatus::Normal);

    settle(3200).await;
    assert_eq!(controller.heartbeat_state().status, HeartbeatStatus::TimedOut);
    // Advisory only: the session stays up
    assert!(controller.is_connected());
    assert!(controller.is_receiving());

    let timeouts: Vec<u64> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            LinkEvent::HeartbeatTimedOut { silent_for_ms, .. } => Some(silent_for_ms),
            _ => None,
        })
        .collect();
    assert_eq!(timeouts.len(), 1);
    assert!(timeouts[0] > 3000);

    transport.push_frame(0x351, vec![0; 8]);
    settle(100).await;
    let state = controller.heartbeat_state();
    assert_eq!(state.status, HeartbeatStatus::Normal);
    assert_eq!(state.count, 2);
    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_changes_nothing() {
    let (controller, connector, _) = mock_session();
    let mut rx = controller.subscribe();
    connector.set_connection_failure(true);

    assert!(matches!(
        controller.connect().await,
        Err(BmsLinkError::ConnectError(_))
    ));
    assert!(!controller.is_connected());
    assert!(matches!(
        controller.start_sending().await,
        Err(BmsLinkError::NotConnected)
    ));

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        LinkEvent::SessionError {
            phase: SessionPhase::Connect,
            ..
        }
    ));

    connector.set_connection_failure(false);
    assert!(controller.connect().await.unwrap());
    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_resets_session_and_is_repeatable() {
    let (controller, _, transport) = mock_session();
    let mut rx = controller.subscribe();
    transport.push_frame(0x356, BATTERY_INFO.to_vec());
    transport.push_frame(0x351, vec![0; 8]);

    controller.connect().await.unwrap();
    controller.start_all().await.unwrap();
    settle(1100).await;

    let before = controller.snapshot();
    assert_eq!(before.stats.sent_total, 4);
    assert_eq!(before.stats.received_total, 2);
    assert!(!before.telemetry.is_empty());

    assert!(controller.disconnect().await.unwrap());
    assert!(!controller.disconnect().await.unwrap());

    let after = controller.snapshot();
    assert!(!after.connected);
    assert!(!after.sending);
    assert!(!after.receiving);
    assert_eq!(after.stats.sent_total, 0);
    assert_eq!(after.stats.received_total, 0);
    assert!(after.telemetry.is_empty());
    assert_eq!(after.heartbeat.status, HeartbeatStatus::Waiting);
    assert_eq!(transport.close_count(), 1);

    let events = drain(&mut rx);
    let disconnected = events
        .iter()
        .filter(|event| matches!(event, LinkEvent::Disconnected { .. }))
        .count();
    assert_eq!(disconnected, 1);
    // Both loops announced their own stop before the disconnect
    assert!(events
        .iter()
        .any(|event| matches!(event, LinkEvent::ReceivingStopped { .. })));
    assert!(matches!(
        events.last(),
        Some(LinkEvent::Disconnected { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_full_session_against_simulated_bms() {
    let config = LinkConfig::default();
    let connector = Arc::new(TransportFactory::new(config.simulator.clone()));
    let controller = SessionController::new(config, connector);

    controller.connect().await.unwrap();
    controller.start_all().await.unwrap();
    settle(2500).await;

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.stats.sent_total, 6);
    assert_eq!(snapshot.heartbeat.status, HeartbeatStatus::Normal);
    assert!(snapshot.heartbeat.count >= 2);
    assert_eq!(snapshot.stats.decode_failures, 0);
    assert!(snapshot.telemetry.charge_discharge.is_some());
    assert!(snapshot.telemetry.bms_status.is_some());
    assert!(snapshot.telemetry.battery_info.is_some());
    assert!(snapshot.telemetry.warnings.is_some());

    controller.disconnect().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_from_heartbeat_timeout_handler() {
    let (controller, _, transport) = mock_session();
    let controller = Arc::new(controller);
    let mut rx = controller.subscribe();
    transport.push_frame(0x351, vec![0; 8]);

    controller.connect().await.unwrap();
    controller.start_all().await.unwrap();

    // Same reaction as `heartbeat.disconnect_on_timeout` in the CLI
    let handler = {
        let controller = controller.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(LinkEvent::HeartbeatTimedOut { .. }) => {
                        return controller.disconnect().await;
                    },
                    Ok(_) | Err(RecvError::Lagged(_)) => {},
                    Err(RecvError::Closed) => return Ok(false),
                }
            }
        })
    };

    let disconnected = tokio::time::timeout(Duration::from_secs(10), handler)
        .await
        .expect("heartbeat should time out and the handler disconnect")
        .unwrap()
        .unwrap();

    assert!(disconnected);
    assert!(!controller.is_connected());
    assert!(!controller.is_sending());
    assert!(!controller.is_receiving());
    assert_eq!(transport.close_count(), 1);
}
