//! ---
//! rscan_section: "05-daemon"
//! rscan_subsection: "binary"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Binary entrypoint for the R-SCAN daemon."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r_scan_common::config::AppConfig;
use r_scan_common::logging::init_tracing;
use r_scan_metrics::{new_registry, register_build_info, MetricsExporter};
use r_scan_supervisor::{EngineSupervisor, ProcFsTable, SupervisorMetrics};
use r_scan_telemetry::{ChannelState, TelemetryMetrics, TelemetryNormalizer};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const POLLER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("R-SCAN ", env!("CARGO_PKG_VERSION")),
    about = "R-SCAN daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Supervise the engine and poll its telemetry until terminated")]
    Run {
        #[arg(long, value_name = "FILE", help = "Override the engine configuration file")]
        engine_config: Option<PathBuf>,
    },
    #[command(about = "Print engine process status and one telemetry snapshot")]
    Status,
    #[command(about = "Stop every running engine instance")]
    Stop {
        #[arg(long, help = "Skip the graceful termination phase")]
        force: bool,
    },
    #[command(about = "Forcefully kill every engine process")]
    KillAll,
    #[command(about = "Relay a raw command to the engine control endpoint")]
    Command {
        name: String,
        #[arg(default_value_t = 0, allow_hyphen_values = true)]
        arg1: i64,
        #[arg(default_value_t = 0, allow_hyphen_values = true)]
        arg2: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-scan.toml"));
    candidates.push(PathBuf::from("/etc/r-scan/r-scan.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    init_tracing("r-scand", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run {
        engine_config: None,
    }) {
        Commands::Run { engine_config } => run_daemon(config, engine_config).await?,
        Commands::Status => print_status(config).await?,
        Commands::Stop { force } => {
            let supervisor = EngineSupervisor::new(config.engine);
            let stopped = supervisor.stop(force).await;
            println!("{}", if stopped { "engine stopped" } else { "no engine stopped" });
        }
        Commands::KillAll => {
            let supervisor = EngineSupervisor::new(config.engine);
            let killed = supervisor.kill_all().await;
            println!("killed {} engine process(es)", killed);
        }
        Commands::Command { name, arg1, arg2 } => {
            let normalizer = TelemetryNormalizer::from_config(config.telemetry)?;
            match normalizer.send_command(&name, arg1, arg2).await {
                Some(reply) => println!("{}", serde_json::to_string_pretty(&reply)?),
                None => anyhow::bail!("engine did not answer command {}", name),
            }
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, engine_config: Option<PathBuf>) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let registry = new_registry();
    let (supervisor_metrics, telemetry_metrics, metrics_server) = if metrics_settings.enabled {
        let supervisor_metrics = SupervisorMetrics::new(registry.clone())?;
        let telemetry_metrics = TelemetryMetrics::new(registry.clone())?;
        register_build_info(&registry, env!("CARGO_PKG_VERSION"))?;
        let server = MetricsExporter::spawn(registry, metrics_settings.listen)?;
        (Some(supervisor_metrics), Some(telemetry_metrics), Some(server))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None, None)
    };

    let supervisor = EngineSupervisor::with_table(
        config.engine.clone(),
        Arc::new(ProcFsTable::new()),
        supervisor_metrics,
    );
    let mut normalizer = TelemetryNormalizer::from_config(config.telemetry.clone())
        .context("failed to build telemetry client")?;
    if let Some(metrics) = telemetry_metrics {
        normalizer = normalizer.with_metrics(metrics);
    }
    let normalizer = Arc::new(normalizer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Arc::clone(&normalizer).spawn(shutdown_rx.clone());
    let reporter = spawn_state_reporter(&normalizer, shutdown_rx);

    if config.engine.auto_start {
        if !supervisor.start(engine_config.as_deref()).await {
            warn!("engine auto-start failed; telemetry will report the engine offline");
        }
    } else {
        info!("engine auto-start disabled; waiting for an externally started engine");
    }

    info!("daemon running; waiting for termination signal");
    shutdown_signal().await;
    info!("termination signal received; shutting down");

    let _ = shutdown_tx.send(true);
    supervisor.shutdown().await;
    for (name, task) in [("telemetry poller", poller), ("state reporter", reporter)] {
        if tokio::time::timeout(POLLER_JOIN_TIMEOUT, task).await.is_err() {
            warn!(task = name, "task did not stop in time");
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

/// Log every change of the published channel state.
fn spawn_state_reporter(
    normalizer: &TelemetryNormalizer,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut updates = normalizer.subscribe();
    tokio::spawn(async move {
        let mut previous: Option<ChannelState> = None;
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
            let state = Arc::clone(&updates.borrow_and_update());
            let moved = previous.as_ref().map_or(true, |prev| {
                prev.system != state.system
                    || prev.frequency != state.frequency
                    || prev.talkgroup_id != state.talkgroup_id
            });
            if moved {
                info!(
                    system = %state.system,
                    frequency_mhz = ?state.frequency,
                    talkgroup = ?state.talkgroup_id,
                    active = state.is_active(),
                    "channel state changed"
                );
            }
            previous = Some((*state).clone());
        }
    })
}

async fn print_status(config: AppConfig) -> Result<()> {
    let supervisor = EngineSupervisor::new(config.engine);
    let normalizer = TelemetryNormalizer::from_config(config.telemetry)?;
    let outcome = normalizer.poll_once().await;
    let report = serde_json::json!({
        "engine": supervisor.status(),
        "telemetry": {
            "connection": normalizer.connection_status().to_string(),
            "poll": outcome.as_str(),
            "state": *normalizer.latest(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = ctrl_c() => {}
        _ = terminate() => {}
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
