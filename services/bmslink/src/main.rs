//! BMS link monitor (`bmslink`)
//!
//! Plays the inverter side of a BMS CAN link from the command line.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bmslink::config::LinkConfig;
use bmslink::diagnostics::ProbePlan;
use bmslink::display;
use bmslink::error::BmsLinkError;
use bmslink::event_log::{describe_record, spawn_event_logger};
use bmslink::events::LinkEvent;
use bmslink::protocol::{codec, CanId};
use bmslink::session::SessionController;
use bmslink::transport::TransportFactory;

#[derive(Parser, Debug)]
#[command(
    name = "bmslink",
    author,
    version,
    about = "BMS ⇄ inverter CAN link monitor",
    long_about = None
)]
struct Args {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level or filter, e.g. `debug` or `info,frames=debug`
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Connect, exchange frames and print the link status (default)
    Monitor {
        /// Do not transmit keepalive and identification frames
        #[arg(long)]
        no_send: bool,

        /// Do not start the receive loop
        #[arg(long)]
        no_receive: bool,

        /// Seconds between status tables, 0 disables them
        #[arg(long, default_value_t = 5)]
        status_interval: u64,
    },

    /// Decode a single frame given its ID and payload
    Decode {
        /// CAN ID, hex (`0x351` or `351`)
        id: String,

        /// Payload bytes in hex, e.g. "10 27 00 00 00 00 00 00"
        payload: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Listen on the bus for a fixed time and report what arrived
    Probe {
        #[arg(long, value_enum, default_value_t = PlanArg::Standard)]
        plan: PlanArg,
    },

    /// Probe the bus and print findings with things to check
    Diagnose,

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlanArg {
    Initial,
    Standard,
    Forced,
}

impl From<PlanArg> for ProbePlan {
    fn from(plan: PlanArg) -> Self {
        match plan {
            PlanArg::Initial => ProbePlan::Initial,
            PlanArg::Standard => ProbePlan::Standard,
            PlanArg::Forced => ProbePlan::Forced,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.no_color {
        colored::control::set_override(false);
    }

    let config = LinkConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&args, &config)?;

    match args.command.unwrap_or(Commands::Monitor {
        no_send: false,
        no_receive: false,
        status_interval: 5,
    }) {
        Commands::Monitor {
            no_send,
            no_receive,
            status_interval,
        } => monitor(config, !no_send, !no_receive, status_interval).await,
        Commands::Decode { id, payload, json } => decode_frame(&id, &payload, json),
        Commands::Probe { plan } => probe(config, plan.into()).await,
        Commands::Diagnose => diagnose(config).await,
        Commands::CheckConfig => check_config(&config),
    }
}

fn init_logging(args: &Args, config: &LinkConfig) -> anyhow::Result<()> {
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());

    // Filter specs such as `info,frames=debug` are left to the EnvFilter
    let is_filter_spec = level.contains('=') || level.contains(',');
    let console_level = if is_filter_spec {
        tracing::Level::TRACE
    } else {
        common::logging::parse_level(&level)
    };

    let log_config = common::logging::LogConfig {
        service_name: "bmslink".to_string(),
        log_dir: config
            .logging
            .enable_file
            .then(|| PathBuf::from(&config.logging.dir)),
        console_level,
        enable_json: config.logging.json,
        ansi: !args.no_color,
        ..Default::default()
    };
    common::logging::init_with_config(log_config).context("Failed to initialize logging")?;

    if is_filter_spec && std::env::var("RUST_LOG").is_err() {
        common::logging::set_log_level(&level)?;
    }
    Ok(())
}

fn controller_for(config: &LinkConfig) -> SessionController {
    let connector = Arc::new(TransportFactory::new(config.simulator.clone()));
    SessionController::new(config.clone(), connector)
}

async fn monitor(
    config: LinkConfig,
    send: bool,
    receive: bool,
    status_interval: u64,
) -> anyhow::Result<()> {
    let disconnect_on_timeout = config.heartbeat.disconnect_on_timeout;
    let controller = controller_for(&config);
    let shutdown = common::shutdown::shutdown_token();
    let logger = spawn_event_logger(controller.events(), shutdown.child_token());
    let mut events = controller.subscribe();

    info!("Starting BMS link monitor");
    controller.connect().await?;
    if receive {
        controller.start_receiving().await?;
    }
    if send {
        controller.start_sending().await?;
    }

    let mut status = tokio::time::interval(Duration::from_secs(status_interval.max(1)));
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; nothing to show yet
    status.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = events.recv() => match received {
                Ok(LinkEvent::HeartbeatTimedOut { .. }) if disconnect_on_timeout => {
                    warn!("BMS heartbeat lost, disconnecting");
                    controller.disconnect().await?;
                    break;
                },
                Ok(_) | Err(RecvError::Lagged(_)) => {},
                Err(RecvError::Closed) => break,
            },
            _ = status.tick(), if status_interval > 0 => {
                println!("{}", display::render_status(&controller.snapshot()));
            },
        }
    }

    println!("{}", display::render_status(&controller.snapshot()));
    println!("{}", display::render_warning_table(&controller.snapshot()));

    if let Err(e) = controller.disconnect().await {
        error!("Disconnect failed: {}", e);
    }
    shutdown.cancel();
    let _ = logger.await;
    info!("BMS link monitor stopped");
    Ok(())
}

fn parse_can_id(text: &str) -> anyhow::Result<CanId> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    CanId::from_str_radix(digits, 16).with_context(|| format!("Invalid CAN ID '{}'", text))
}

fn decode_frame(id: &str, payload: &str, json: bool) -> anyhow::Result<()> {
    let id = parse_can_id(id)?;
    let payload = common::hex::decode(payload)?;
    let record = codec::decode(id, &payload).map_err(BmsLinkError::Codec)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!(
            "{} {}",
            record.frame_id().to_string().cyan(),
            describe_record(&record)
        );
    }
    Ok(())
}

/// Run `work` unless a shutdown signal arrives first
async fn until_shutdown<F: Future>(work: F, shutdown: &CancellationToken) -> Option<F::Output> {
    tokio::select! {
        output = work => Some(output),
        _ = shutdown.cancelled() => None,
    }
}

async fn probe(config: LinkConfig, plan: ProbePlan) -> anyhow::Result<()> {
    let controller = controller_for(&config);
    let shutdown = common::shutdown::shutdown_token();
    controller.connect().await?;

    let report = until_shutdown(controller.probe(plan), &shutdown).await;
    controller.disconnect().await?;

    match report {
        Some(report) => print!("{}", display::render_probe(&report?)),
        None => warn!("Probe interrupted"),
    }
    Ok(())
}

async fn diagnose(config: LinkConfig) -> anyhow::Result<()> {
    let controller = controller_for(&config);
    let shutdown = common::shutdown::shutdown_token();
    if let Err(e) = controller.connect().await {
        // Diagnose still reports on a link that cannot be opened
        warn!("Connect failed: {}", e);
    }
    let diagnosis = until_shutdown(controller.diagnose(), &shutdown).await;
    controller.disconnect().await?;

    let Some(diagnosis) = diagnosis else {
        warn!("Diagnosis interrupted");
        return Ok(());
    };
    let diagnosis = diagnosis?;
    print!("{}", display::render_diagnosis(&diagnosis));
    if !diagnosis.is_healthy() {
        bail!("link is not healthy");
    }
    Ok(())
}

fn check_config(config: &LinkConfig) -> anyhow::Result<()> {
    println!("{} configuration is valid", "✅".green());
    println!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_long_listen() {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = until_shutdown(tokio::time::sleep(Duration::from_secs(10)), &shutdown).await;
        assert!(outcome.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));

        let done = until_shutdown(async { 7 }, &CancellationToken::new()).await;
        assert_eq!(done, Some(7));
    }

    #[test]
    fn test_parse_can_id() {
        assert_eq!(parse_can_id("0x351").unwrap(), 0x351);
        assert_eq!(parse_can_id("35A").unwrap(), 0x35A);
        assert!(parse_can_id("zz").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from(["bmslink", "probe", "--plan", "forced"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::Probe {
                plan: PlanArg::Forced
            })
        ));

        let args = Args::try_parse_from([
            "bmslink",
            "-l",
            "debug",
            "monitor",
            "--no-send",
            "--status-interval",
            "0",
        ])
        .unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            args.command,
            Some(Commands::Monitor {
                no_send: true,
                no_receive: false,
                status_interval: 0
            })
        ));
    }
}
