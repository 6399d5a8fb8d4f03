//! Connection diagnostics
//!
//! Receive probes listen on an open transport for a fixed time and tally
//! what arrives. `diagnose` turns a session snapshot and an optional probe
//! into findings and concrete things to check on the bench.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::LinkConfig;
use crate::heartbeat::HeartbeatStatus;
use crate::protocol::{codec, CanId, CodecError, FrameId};
use crate::telemetry::LinkSnapshot;
use crate::transport::CanTransport;

/// How long and how eagerly a probe listens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbePlan {
    /// Quick check right after connecting
    Initial,
    Standard,
    /// Long listen with tighter polling
    Forced,
}

impl ProbePlan {
    pub fn duration(self) -> Duration {
        match self {
            ProbePlan::Initial => Duration::from_secs(3),
            ProbePlan::Standard => Duration::from_secs(5),
            ProbePlan::Forced => Duration::from_secs(10),
        }
    }

    pub fn poll_timeout(self) -> Duration {
        match self {
            ProbePlan::Initial | ProbePlan::Standard => Duration::from_millis(100),
            ProbePlan::Forced => Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub plan: ProbePlan,
    pub duration_ms: u64,
    pub polls: u64,
    pub frames: u64,
    /// Frame count per CAN ID, unknown IDs included
    pub by_id: BTreeMap<CanId, u64>,
    pub decode_failures: u64,
    pub errors: u64,
    pub first_error: Option<String>,
}

impl ProbeReport {
    fn new(plan: ProbePlan) -> Self {
        Self {
            plan,
            duration_ms: 0,
            polls: 0,
            frames: 0,
            by_id: BTreeMap::new(),
            decode_failures: 0,
            errors: 0,
            first_error: None,
        }
    }

    pub fn heartbeat_seen(&self) -> bool {
        self.by_id.contains_key(&FrameId::HEARTBEAT.raw())
    }

    /// Frames whose IDs belong to the BMS telemetry set
    pub fn telemetry_frames(&self) -> u64 {
        FrameId::INBOUND
            .iter()
            .filter_map(|id| self.by_id.get(&id.raw()))
            .sum()
    }
}

/// Listen on `transport` for the plan's duration
pub async fn receive_probe(transport: &dyn CanTransport, plan: ProbePlan) -> ProbeReport {
    info!(
        "Receive probe ({:?}) on {} for {:?}",
        plan,
        transport.name(),
        plan.duration()
    );

    let mut report = ProbeReport::new(plan);
    let started = Instant::now();
    let deadline = started + plan.duration();

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let timeout = plan.poll_timeout().min(deadline - now);
        report.polls += 1;

        match transport.receive(timeout).await {
            Ok(frames) => {
                for frame in frames {
                    debug!(
                        target: "frames",
                        "probe RX 0x{:03X} [{}]",
                        frame.id,
                        common::hex::encode_spaced(&frame.data)
                    );
                    report.frames += 1;
                    *report.by_id.entry(frame.id).or_insert(0) += 1;
                    if let Err(CodecError::TooShort { .. }) = codec::decode(frame.id, &frame.data) {
                        report.decode_failures += 1;
                    }
                }
            },
            Err(e) => {
                report.errors += 1;
                if report.first_error.is_none() {
                    report.first_error = Some(e.to_string());
                }
                tokio::time::sleep(timeout).await;
            },
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "Probe finished: {} frames in {} polls, {} errors",
        report.frames, report.polls, report.errors
    );
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Problem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnosis {
    pub findings: Vec<Finding>,
    pub suggestions: Vec<String>,
}

impl Diagnosis {
    fn ok(&mut self, message: impl Into<String>) {
        self.push(Severity::Ok, message);
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    fn problem(&mut self, message: impl Into<String>) {
        self.push(Severity::Problem, message);
    }

    fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.findings.push(Finding {
            severity,
            message: message.into(),
        });
    }

    fn suggest(&mut self, suggestion: impl Into<String>) {
        let suggestion = suggestion.into();
        if !self.suggestions.contains(&suggestion) {
            self.suggestions.push(suggestion);
        }
    }

    /// Worst severity among the findings
    pub fn worst(&self) -> Severity {
        self.findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Ok)
    }

    pub fn is_healthy(&self) -> bool {
        self.worst() == Severity::Ok
    }
}

pub fn diagnose(
    config: &LinkConfig,
    snapshot: &LinkSnapshot,
    probe: Option<&ProbeReport>,
) -> Diagnosis {
    let mut diagnosis = Diagnosis::default();
    let device = &config.device;

    if !snapshot.connected {
        diagnosis.problem("Device not connected");
        diagnosis.suggest(format!(
            "Check that the adapter is plugged in (device type {}, index {})",
            device.device_type, device.device_index
        ));
        return diagnosis;
    }

    match device.bit_timing() {
        Some((t0, t1)) => diagnosis.ok(format!(
            "Connected on channel {} at {} bit/s (timing 0x{:02X}/0x{:02X})",
            snapshot.channel, device.bitrate, t0, t1
        )),
        None => diagnosis.problem(format!("Unsupported bitrate {}", device.bitrate)),
    }

    if let Some(probe) = probe {
        diagnose_probe(&mut diagnosis, config, snapshot, probe);
    }

    match snapshot.heartbeat.status {
        HeartbeatStatus::TimedOut => {
            diagnosis.problem("BMS heartbeat (0x351) lost");
            diagnosis.suggest("Check BMS power and the CAN cable to the battery");
        },
        HeartbeatStatus::Normal => diagnosis.ok(format!(
            "BMS heartbeat present ({} seen)",
            snapshot.heartbeat.count
        )),
        HeartbeatStatus::Waiting if snapshot.receiving => {
            diagnosis.warning("Receiving, but no heartbeat seen yet");
        },
        HeartbeatStatus::Waiting => {},
    }

    if snapshot.stats.receive_errors > 0 {
        diagnosis.warning(format!(
            "{} receive errors this session",
            snapshot.stats.receive_errors
        ));
    }
    if snapshot.stats.decode_failures > 0 {
        diagnosis.warning(format!(
            "{} malformed telemetry frames this session",
            snapshot.stats.decode_failures
        ));
    }

    diagnosis
}

fn diagnose_probe(
    diagnosis: &mut Diagnosis,
    config: &LinkConfig,
    snapshot: &LinkSnapshot,
    probe: &ProbeReport,
) {
    let secs = probe.plan.duration().as_secs();

    if probe.errors > 0 {
        diagnosis.warning(format!(
            "{} of {} polls failed: {}",
            probe.errors,
            probe.polls,
            probe.first_error.as_deref().unwrap_or("unknown error")
        ));
        diagnosis.suggest("Reconnect the adapter; repeated receive errors point at the driver");
    }

    if probe.frames == 0 {
        diagnosis.problem(format!("No frames received in {} s", secs));
        diagnosis.suggest("Check CAN-H/CAN-L wiring and 120 ohm termination");
        diagnosis.suggest(format!(
            "Confirm the BMS talks at {} bit/s",
            config.device.bitrate
        ));
        diagnosis.suggest(format!(
            "Try the other channel (currently {})",
            snapshot.channel
        ));
        if !snapshot.sending {
            diagnosis.suggest("Start sending: many BMS stay silent until the 0x305 keepalive arrives");
        }
        return;
    }

    diagnosis.ok(format!("{} frames received in {} s", probe.frames, secs));

    if probe.telemetry_frames() == 0 {
        diagnosis.warning("Traffic present but none of 0x351/0x355/0x356/0x35A");
        diagnosis.suggest("The device on the bus may use another protocol or bitrate");
    } else if !probe.heartbeat_seen() {
        diagnosis.warning("Telemetry present but no 0x351 heartbeat");
    }

    if probe.decode_failures > 0 {
        diagnosis.warning(format!(
            "{} telemetry frames shorter than 8 bytes",
            probe.decode_failures
        ));
    }
}
