//! Simulated BMS
//!
//! An in-process CAN peer that behaves like a battery management system on
//! the inverter link: every frame period it emits one telemetry burst
//! (0x351, 0x355, 0x356, 0x35A) with slowly drifting values. It can be told
//! to stay quiet until keepalives arrive, and to drop off the bus for a while,
//! which is how heartbeat loss is exercised without hardware.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::traits::{CanTransport, TransportError};
use crate::config::SimulatorConfig;
use crate::protocol::{CanId, FrameId, RawFrame, FRAME_LEN};

/// Keepalives older than this no longer count when `require_keepalive` is set
const KEEPALIVE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct SimState {
    open: bool,
    opened_at: Instant,
    next_burst: Instant,
    bursts: u64,
    last_keepalive: Option<Instant>,
    frames_from_host: u64,
}

/// Simulated BMS transport
#[derive(Debug)]
pub struct SimulatedBms {
    name: String,
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl SimulatedBms {
    /// Put the simulated BMS on the bus; the first burst is due immediately
    pub fn open(name: impl Into<String>, config: SimulatorConfig) -> Self {
        let now = Instant::now();
        let name = name.into();
        info!(
            "Simulated BMS '{}' online, burst period {} ms",
            name, config.frame_period_ms
        );
        Self {
            name,
            config,
            state: Mutex::new(SimState {
                open: true,
                opened_at: now,
                next_burst: now,
                bursts: 0,
                last_keepalive: None,
                frames_from_host: 0,
            }),
        }
    }

    /// Frames received from the monitor so far
    pub fn frames_from_host(&self) -> u64 {
        self.state.lock().frames_from_host
    }

    fn period(&self) -> Duration {
        Duration::from_millis(self.config.frame_period_ms.max(1))
    }

    fn in_silence_window(&self, state: &SimState, now: Instant) -> bool {
        let Some(after) = self.config.silence_after_secs else {
            return false;
        };
        let elapsed = now.duration_since(state.opened_at);
        let start = Duration::from_secs(after);
        let end = start + Duration::from_secs(self.config.silence_duration_secs);
        elapsed >= start && elapsed < end
    }

    fn is_talking(&self, state: &SimState, now: Instant) -> bool {
        if self.in_silence_window(state, now) {
            return false;
        }
        if self.config.require_keepalive {
            return state
                .last_keepalive
                .is_some_and(|seen| now.duration_since(seen) <= KEEPALIVE_WINDOW);
        }
        true
    }

    /// Emit the burst if one is due, and report when the next one is
    fn take_due(&self, now: Instant) -> Result<(Vec<RawFrame>, Instant), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }

        if now < state.next_burst {
            return Ok((Vec::new(), state.next_burst));
        }

        // Skip missed bursts instead of replaying them
        state.next_burst = now + self.period();
        state.bursts += 1;

        let frames = if self.is_talking(&state, now) {
            telemetry_burst(state.bursts)
        } else {
            Vec::new()
        };
        Ok((frames, state.next_burst))
    }
}

#[async_trait]
impl CanTransport for SimulatedBms {
    fn transport_type(&self) -> &str {
        "sim"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    async fn send(&self, id: CanId, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > FRAME_LEN {
            return Err(TransportError::SendFailed(format!(
                "payload of {} bytes exceeds a classic CAN frame",
                payload.len()
            )));
        }

        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotConnected);
        }
        state.frames_from_host += 1;
        if id == FrameId::Keepalive.raw() {
            state.last_keepalive = Some(Instant::now());
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Vec<RawFrame>, TransportError> {
        let now = Instant::now();
        let (frames, next_burst) = self.take_due(now)?;
        if !frames.is_empty() {
            return Ok(frames);
        }

        let deadline = std::cmp::min(next_burst, now + timeout);
        tokio::time::sleep_until(deadline).await;

        let (frames, _) = self.take_due(Instant::now())?;
        Ok(frames)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            debug!(
                "Simulated BMS '{}' offline after {} bursts",
                self.name, state.bursts
            );
        }
        Ok(())
    }
}

/// One telemetry burst; `n` drives the drift of the values
fn telemetry_burst(n: u64) -> Vec<RawFrame> {
    let step = (n % 20) as i16;

    // 55.0 V / 50.0 A / 50.0 A / 45.0 V
    let charge_discharge = pack_u16([550, 500, 500, 450]);

    let soc = 80 + (n % 20) as u16;
    let status = pack_u16([soc, 98, soc * 100 + (n % 100) as u16, 0]);

    // 51.20 V rising slowly, current swinging around -12.5 A, 25.3 C
    let battery = pack_i16([5120 + step, -125 + step * 5, 253, 0]);

    let mut warnings = [0u8; FRAME_LEN];
    if n % 30 == 0 {
        // general warning, low bit of the group
        warnings[4] = 0x01;
    }

    vec![
        RawFrame::new(FrameId::ChargeDischarge, charge_discharge.to_vec()),
        RawFrame::new(FrameId::BmsStatus, status.to_vec()),
        RawFrame::new(FrameId::BatteryInfo, battery.to_vec()),
        RawFrame::new(FrameId::Warnings, warnings.to_vec()),
    ]
}

fn pack_u16(values: [u16; 4]) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    for (i, value) in values.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }
    out
}

fn pack_i16(values: [i16; 4]) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    for (i, value) in values.iter().enumerate() {
        out[i * 2..i * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }
    out
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocol::{decode, DecodedRecord};

    fn sim(config: SimulatorConfig) -> SimulatedBms {
        SimulatedBms::open("sim-test", config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_burst_decodes_cleanly() {
        let bms = sim(SimulatorConfig::default());
        let frames = bms.receive(Duration::from_millis(50)).await.unwrap();

        let ids: Vec<CanId> = frames.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0x351, 0x355, 0x356, 0x35A]);

        for frame in &frames {
            assert_eq!(frame.data.len(), FRAME_LEN);
            assert!(decode(frame.id, &frame.data).is_ok());
        }

        let DecodedRecord::ChargeDischarge(info) = decode(0x351, &frames[0].data).unwrap() else {
            panic!("wrong variant")
        };
        assert!((info.charge_voltage_limit - 55.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bursts_follow_frame_period() {
        let bms = sim(SimulatorConfig {
            frame_period_ms: 200,
            ..Default::default()
        });
        assert_eq!(bms.receive(Duration::from_millis(50)).await.unwrap().len(), 4);

        // Next burst is 200 ms away: a 50 ms poll comes back empty
        assert!(bms.receive(Duration::from_millis(50)).await.unwrap().is_empty());

        // A long poll returns as soon as the burst is due
        let start = Instant::now();
        let frames = bms.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frames.len(), 4);
        assert!(start.elapsed() <= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_window() {
        let bms = sim(SimulatorConfig {
            frame_period_ms: 500,
            silence_after_secs: Some(1),
            silence_duration_secs: 2,
            ..Default::default()
        });

        let mut seen = Vec::new();
        for _ in 0..(5000 / 50) {
            let frames = bms.receive(Duration::from_millis(50)).await.unwrap();
            if !frames.is_empty() {
                seen.push(Instant::now());
            }
        }

        let opened = seen[0];
        let offsets: Vec<Duration> = seen.iter().map(|t| t.duration_since(opened)).collect();
        let silent = Duration::from_secs(1)..Duration::from_secs(3);
        assert!(offsets.iter().all(|offset| !silent.contains(offset)));
        assert!(offsets.iter().any(|offset| *offset >= Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_keepalive() {
        let bms = sim(SimulatorConfig {
            frame_period_ms: 100,
            require_keepalive: true,
            ..Default::default()
        });
        assert!(bms.receive(Duration::from_millis(50)).await.unwrap().is_empty());

        bms.send(0x305, &[0; 8]).await.unwrap();
        let frames = bms.receive(Duration::from_millis(200)).await.unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(bms.frames_from_host(), 1);
    }

    #[tokio::test]
    async fn test_closed_sim_rejects_io() {
        let bms = sim(SimulatorConfig::default());
        bms.close().await.unwrap();
        assert!(!bms.is_open());
        assert_eq!(
            bms.receive(Duration::from_millis(1)).await,
            Err(TransportError::NotConnected)
        );
        assert!(bms.send(0x305, &[0; 9]).await.is_err());
    }
}
