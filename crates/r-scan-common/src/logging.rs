//! ---
//! rscan_section: "01-core-functionality"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Tracing bootstrap for the daemon and its engine output."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Metadata};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Target carrying lines captured from the engine's stdout/stderr.
pub const ENGINE_OUTPUT_TARGET: &str = "r_scan::engine";

const LOG_ENV: &str = "R_SCAN_LOG";
// The HTTP stack logs every telemetry poll at debug level.
const DEFAULT_DIRECTIVE: &str = "info,hyper=warn,reqwest=warn";

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Available log formats for the daemon's stdout stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// One JSON object per line.
    StructuredJson,
    /// Human-readable lines.
    #[default]
    Pretty,
}

/// Pick the filter directive: `R_SCAN_LOG`, then `RUST_LOG`, then the default.
/// Blank values are ignored.
pub fn select_directive(r_scan_log: Option<String>, rust_log: Option<String>) -> String {
    [r_scan_log, rust_log]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned())
}

fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!(
            "invalid log directive {:?} ({}); using {}",
            directive, err, DEFAULT_DIRECTIVE
        );
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}

fn is_engine_output(meta: &Metadata<'_>) -> bool {
    meta.target() == ENGINE_OUTPUT_TARGET
}

/// Install the global subscriber.
///
/// Stdout carries every event in the configured [`LogFormat`]. A daily JSON
/// file `<prefix>.log` under `config.directory` holds the daemon's own events;
/// with `engine_log` set, engine output goes to `<prefix>-engine.log` instead
/// of the main file. The prefix defaults to `service_name`.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, format!("{}.log", prefix)));
    let mut guards = vec![stdout_guard, file_guard];

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let split_engine = config.engine_log;
    let daemon_file_layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .with_filter(filter_fn(move |meta: &Metadata<'_>| {
            !(split_engine && is_engine_output(meta))
        }))
        .boxed();

    let engine_file_layer = if split_engine {
        let (engine_writer, engine_guard) = tracing_appender::non_blocking(daily(
            &config.directory,
            format!("{}-engine.log", prefix),
        ));
        guards.push(engine_guard);
        Some(
            fmt::layer()
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_target(false)
                .with_ansi(false)
                .with_writer(engine_writer)
                .with_filter(filter_fn(is_engine_output))
                .boxed(),
        )
    } else {
        None
    };

    let directive = select_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );
    let installed = tracing_subscriber::registry()
        .with(build_filter(&directive))
        .with(stdout_layer)
        .with(daemon_file_layer)
        .with(engine_file_layer)
        .try_init()
        .is_ok();

    // A second init keeps the first subscriber; its guards stay alive.
    if installed {
        let _ = GUARDS.set(guards);
        info!(
            service = %service_name,
            log_dir = %config.directory.display(),
            format = ?config.format,
            engine_log = split_engine,
            filter = %directive,
            "tracing initialised"
        );
    }
    Ok(())
}
