//! Terminal rendering for the CLI
//!
//! Builds strings only; the binary decides where they go.

use std::fmt::Write;

use colored::*;

use crate::diagnostics::{Diagnosis, ProbeReport, Severity};
use crate::event_log::describe_record;
use crate::heartbeat::HeartbeatStatus;
use crate::protocol::{DecodedRecord, FrameId, WarningKind};
use crate::telemetry::LinkSnapshot;

fn on_off(flag: bool) -> ColoredString {
    if flag {
        "on".green()
    } else {
        "off".dimmed()
    }
}

fn heartbeat_label(status: HeartbeatStatus) -> ColoredString {
    match status {
        HeartbeatStatus::Waiting => "waiting".yellow(),
        HeartbeatStatus::Normal => "normal".green(),
        HeartbeatStatus::TimedOut => "TIMED OUT".red().bold(),
    }
}

/// Status table: link state, counters, heartbeat and latest telemetry
pub fn render_status(snapshot: &LinkSnapshot) -> String {
    let mut out = String::new();
    let stats = &snapshot.stats;
    let hb = &snapshot.heartbeat;

    let _ = writeln!(out, "{}", "BMS link status".bold());
    let _ = writeln!(
        out,
        "  connected {}  sending {}  receiving {}  channel {}  {} bit/s",
        on_off(snapshot.connected),
        on_off(snapshot.sending),
        on_off(snapshot.receiving),
        snapshot.channel,
        snapshot.bitrate
    );
    let _ = writeln!(
        out,
        "  TX {} (0x305 x{}, 0x307 x{})  RX {}  malformed {}  rx errors {}",
        stats.sent_total,
        stats.sent_keepalive,
        stats.sent_identification,
        stats.received_total,
        stats.decode_failures,
        stats.receive_errors
    );

    let since = hb
        .since_last_ms
        .map(|ms| format!("{:.1} s ago", ms as f64 / 1000.0))
        .unwrap_or_else(|| "never".to_string());
    let _ = writeln!(
        out,
        "  heartbeat {}  count {}  last {}",
        heartbeat_label(hb.status),
        hb.count,
        since
    );

    let telemetry = &snapshot.telemetry;
    if telemetry.is_empty() {
        let _ = writeln!(out, "  {}", "no telemetry yet".dimmed());
        return out;
    }

    let _ = writeln!(out, "{}", "Telemetry".bold());
    let rows = [
        (
            FrameId::ChargeDischarge,
            telemetry
                .charge_discharge
                .map(|t| (DecodedRecord::ChargeDischarge(t.value), t.updated_at)),
        ),
        (
            FrameId::BmsStatus,
            telemetry
                .bms_status
                .map(|t| (DecodedRecord::BmsStatus(t.value), t.updated_at)),
        ),
        (
            FrameId::BatteryInfo,
            telemetry
                .battery_info
                .map(|t| (DecodedRecord::BatteryInfo(t.value), t.updated_at)),
        ),
        (
            FrameId::Warnings,
            telemetry
                .warnings
                .map(|t| (DecodedRecord::Warnings(t.value), t.updated_at)),
        ),
    ];

    for (id, row) in rows {
        match row {
            Some((record, updated_at)) => {
                let text = describe_record(&record);
                let text = match record {
                    DecodedRecord::Warnings(flags) if flags.any() => text.red().to_string(),
                    _ => text,
                };
                let _ = writeln!(
                    out,
                    "  {} {:<38} {}  {}",
                    id.to_string().cyan(),
                    id.name(),
                    text,
                    updated_at.format("%H:%M:%S").to_string().dimmed()
                );
            },
            None => {
                let _ = writeln!(out, "  {} {:<38} -", id.to_string().cyan(), id.name());
            },
        }
    }
    out
}

/// Every warning flag with its state, in table order
pub fn render_warning_table(snapshot: &LinkSnapshot) -> String {
    let mut out = String::new();
    let Some(warnings) = snapshot.telemetry.warnings else {
        return out;
    };
    for kind in WarningKind::ALL {
        let state = if warnings.value.get(kind) {
            "ACTIVE".red().bold()
        } else {
            "ok".green()
        };
        let _ = writeln!(out, "  {:<28} {}", kind.name(), state);
    }
    out
}

pub fn render_probe(report: &ProbeReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {:?} probe: {} frames in {:.1} s ({} polls, {} errors)",
        "📡".blue(),
        report.plan,
        report.frames,
        report.duration_ms as f64 / 1000.0,
        report.polls,
        report.errors
    );
    for (id, count) in &report.by_id {
        let name = FrameId::from_raw(*id).map(FrameId::name).unwrap_or("unknown");
        let _ = writeln!(out, "  0x{:03X} {:<38} x{}", id, name, count);
    }
    if let Some(error) = &report.first_error {
        let _ = writeln!(out, "  first error: {}", error.red());
    }
    out
}

pub fn render_diagnosis(diagnosis: &Diagnosis) -> String {
    let mut out = String::new();
    for finding in &diagnosis.findings {
        let marker = match finding.severity {
            Severity::Ok => "✅".green(),
            Severity::Warning => "⚠".yellow(),
            Severity::Problem => "❌".red(),
        };
        let _ = writeln!(out, "{} {}", marker, finding.message);
    }
    if !diagnosis.suggestions.is_empty() {
        let _ = writeln!(out, "\nThings to check:");
        for (i, suggestion) in diagnosis.suggestions.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, suggestion);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Finding;
    use crate::heartbeat::HeartbeatSnapshot;
    use crate::protocol::{BmsStatus, WarningFlags};
    use crate::stats::StatsSnapshot;
    use crate::telemetry::TelemetrySnapshot;
    use chrono::Utc;

    fn snapshot() -> LinkSnapshot {
        LinkSnapshot {
            connected: true,
            sending: true,
            receiving: true,
            channel: 1,
            bitrate: 250_000,
            stats: StatsSnapshot {
                sent_total: 6,
                sent_keepalive: 3,
                sent_identification: 3,
                ..Default::default()
            },
            heartbeat: HeartbeatSnapshot {
                status: HeartbeatStatus::Normal,
                count: 2,
                since_last_ms: Some(400),
            },
            telemetry: TelemetrySnapshot::default(),
        }
    }

    #[test]
    fn test_status_without_telemetry() {
        colored::control::set_override(false);
        let text = render_status(&snapshot());
        assert!(text.contains("channel 1"));
        assert!(text.contains("TX 6 (0x305 x3, 0x307 x3)"));
        assert!(text.contains("heartbeat normal  count 2  last 0.4 s ago"));
        assert!(text.contains("no telemetry yet"));
    }

    #[test]
    fn test_status_with_telemetry_rows() {
        colored::control::set_override(false);
        let mut snap = snapshot();
        snap.telemetry.apply(
            DecodedRecord::BmsStatus(BmsStatus {
                soc_value: 85,
                soh_value: 98,
                high_res_soc: 85.23,
            }),
            Utc::now(),
        );
        snap.telemetry
            .apply(DecodedRecord::Warnings(WarningFlags::default()), Utc::now());

        let text = render_status(&snap);
        assert!(text.contains("SOC 85 %, SOH 98 %, SOC (high res) 85.23 %"));
        assert!(text.contains("warnings: none"));
        // Rows without data show a dash
        assert!(text.contains("0x356 Battery info"));

        let warnings = render_warning_table(&snap);
        assert_eq!(warnings.lines().count(), WarningKind::ALL.len());
    }

    #[test]
    fn test_diagnosis_lists_suggestions() {
        colored::control::set_override(false);
        let diagnosis = Diagnosis {
            findings: vec![Finding {
                severity: Severity::Problem,
                message: "No frames received in 5 s".to_string(),
            }],
            suggestions: vec!["Try the other channel (currently 0)".to_string()],
        };
        let text = render_diagnosis(&diagnosis);
        assert!(text.contains("No frames received in 5 s"));
        assert!(text.contains("1. Try the other channel"));
    }
}
