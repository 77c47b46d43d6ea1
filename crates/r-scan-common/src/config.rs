//! ---
//! rscan_section: "01-core-functionality"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Shared primitives and utilities for the control plane."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_install_dir() -> PathBuf {
    PathBuf::from("/opt/op25/apps")
}

fn default_interpreter() -> String {
    "python3".to_owned()
}

fn default_entrypoint() -> String {
    "multi_rx.py".to_owned()
}

fn default_engine_config_file() -> PathBuf {
    PathBuf::from("cfg.json")
}

fn default_search_path_var() -> String {
    "PYTHONPATH".to_owned()
}

fn default_signature() -> Vec<String> {
    vec!["multi_rx.py".to_owned(), "rx.py".to_owned()]
}

fn default_settle_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_kill_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_monitor_join_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_restart_pause() -> Duration {
    Duration::from_secs(2)
}

fn default_base_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_max_cooldown() -> Duration {
    Duration::from_secs(300)
}

fn default_max_restarts() -> u32 {
    5
}

fn default_log_capacity() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_engine_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_engine_port() -> u16 {
    8080
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_staleness_window() -> Duration {
    Duration::from_secs(30)
}

fn default_activity_window() -> Duration {
    Duration::from_secs(30)
}

fn default_max_errors() -> u32 {
    5
}

fn default_backoff_after() -> u32 {
    3
}

fn default_backoff_cap() -> Duration {
    Duration::from_secs(5)
}

fn default_system_name() -> String {
    "No System".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_engine_log() -> bool {
    true
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    "127.0.0.1:9898"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the scanner control plane.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_SCAN_CONFIG";

    /// Load configuration from disk, respecting the `R_SCAN_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.telemetry.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// How the decoding engine is launched, recognised and recovered.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Installation directory; used as working directory and search-path prefix.
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    /// Engine configuration passed via `-c`; absolute or relative to `install_dir`.
    #[serde(default = "default_engine_config_file")]
    pub config_file: PathBuf,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Environment variable prefixed with `install_dir` at launch.
    #[serde(default = "default_search_path_var")]
    pub search_path_var: String,
    /// Substrings matched against process names and command lines.
    #[serde(default = "default_signature")]
    pub signature: Vec<String>,
    /// Milliseconds to wait after launch before declaring the start successful.
    #[serde(default = "default_settle_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_interval: Duration,
    #[serde(default = "default_stop_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stop_timeout: Duration,
    #[serde(default = "default_kill_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub kill_timeout: Duration,
    #[serde(default = "default_monitor_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub monitor_interval: Duration,
    #[serde(default = "default_monitor_join_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub monitor_join_timeout: Duration,
    /// Milliseconds between the stop and start halves of a restart.
    #[serde(default = "default_restart_pause")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub restart_pause: Duration,
    #[serde(default = "default_base_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub base_cooldown: Duration,
    #[serde(default = "default_max_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_cooldown: Duration,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_true")]
    pub auto_restart: bool,
    #[serde(default)]
    pub auto_start: bool,
    /// Stop the engine when the daemon shuts down.
    #[serde(default = "default_true")]
    pub stop_on_shutdown: bool,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
    /// Number of engine output lines retained in memory.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Forward captured engine output into the tracing stream.
    #[serde(default = "default_true")]
    pub echo_output: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            interpreter: default_interpreter(),
            entrypoint: default_entrypoint(),
            config_file: default_engine_config_file(),
            extra_args: Vec::new(),
            search_path_var: default_search_path_var(),
            signature: default_signature(),
            settle_interval: default_settle_interval(),
            stop_timeout: default_stop_timeout(),
            kill_timeout: default_kill_timeout(),
            monitor_interval: default_monitor_interval(),
            monitor_join_timeout: default_monitor_join_timeout(),
            restart_pause: default_restart_pause(),
            base_cooldown: default_base_cooldown(),
            max_cooldown: default_max_cooldown(),
            max_restarts: default_max_restarts(),
            auto_restart: true,
            auto_start: false,
            stop_on_shutdown: true,
            pid_file: None,
            log_capacity: default_log_capacity(),
            echo_output: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interpreter.trim().is_empty() {
            return Err(anyhow!("engine.interpreter must not be empty"));
        }
        if self.entrypoint.trim().is_empty() {
            return Err(anyhow!("engine.entrypoint must not be empty"));
        }
        if self.signature.iter().all(|s| s.trim().is_empty()) {
            return Err(anyhow!(
                "engine.signature must contain at least one non-empty pattern"
            ));
        }
        if self.max_cooldown < self.base_cooldown {
            return Err(anyhow!(
                "engine.max_cooldown ({}s) must not be below engine.base_cooldown ({}s)",
                self.max_cooldown.as_secs(),
                self.base_cooldown.as_secs()
            ));
        }
        if self.log_capacity == 0 {
            return Err(anyhow!("engine.log_capacity must be at least 1"));
        }
        Ok(())
    }

    /// Resolve the engine configuration file: as given first, then under `install_dir`.
    pub fn resolve_config_file(&self, candidate: Option<&Path>) -> Option<PathBuf> {
        let requested = candidate.unwrap_or(self.config_file.as_path());
        if requested.exists() {
            return Some(requested.to_path_buf());
        }
        if requested.is_absolute() {
            return None;
        }
        let under_install = self.install_dir.join(requested);
        under_install.exists().then_some(under_install)
    }
}

/// Polling client settings for the engine's status endpoint.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_engine_host")]
    pub host: String,
    #[serde(default = "default_engine_port")]
    pub port: u16,
    /// Milliseconds slept between polls.
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    /// Age after which a last-known-good snapshot degrades to "No Activity".
    #[serde(default = "default_staleness_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub staleness_window: Duration,
    /// Frequency activity older than this is not treated as current.
    #[serde(default = "default_activity_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub activity_window: Duration,
    /// Consecutive transport errors that mark the engine as disconnected.
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    /// Extra backoff is applied once the error count exceeds this value.
    #[serde(default = "default_backoff_after")]
    pub backoff_after: u32,
    #[serde(default = "default_backoff_cap")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub backoff_cap: Duration,
    /// Label shown when the engine does not report a system name.
    #[serde(default = "default_system_name")]
    pub system_name: String,
    #[serde(default = "default_true")]
    pub prefer_engine_name: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            host: default_engine_host(),
            port: default_engine_port(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
            staleness_window: default_staleness_window(),
            activity_window: default_activity_window(),
            max_errors: default_max_errors(),
            backoff_after: default_backoff_after(),
            backoff_cap: default_backoff_cap(),
            system_name: default_system_name(),
            prefer_engine_name: true,
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_errors == 0 {
            return Err(anyhow!("telemetry.max_errors must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("telemetry.poll_interval must be non-zero"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("telemetry.request_timeout must be non-zero"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("telemetry.host must not be empty"));
        }
        Ok(())
    }

    /// Base URL of the engine control endpoint.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Write captured engine output to its own `<prefix>-engine.log`.
    #[serde(default = "default_engine_log")]
    pub engine_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            engine_log: default_engine_log(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_str("").expect("empty config is valid");
        assert_eq!(config.telemetry.max_errors, 5);
        assert_eq!(config.telemetry.poll_interval, Duration::from_millis(500));
        assert_eq!(config.telemetry.staleness_window, Duration::from_secs(30));
        assert_eq!(config.engine.base_cooldown, Duration::from_secs(30));
        assert_eq!(config.engine.max_cooldown, Duration::from_secs(300));
        assert_eq!(config.engine.monitor_interval, Duration::from_secs(10));
        assert!(config.engine.auto_restart);
        assert!(!config.engine.auto_start);
        assert!(config.logging.engine_log);
    }

    #[test]
    fn engine_log_split_can_be_disabled() {
        let config = AppConfig::from_str(
            "[logging]\nformat = \"structured-json\"\nengine_log = false\n",
        )
        .expect("config parses");
        assert!(!config.logging.engine_log);
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn durations_use_declared_units() {
        let config = AppConfig::from_str(
            r#"
            [engine]
            settle_interval = 250
            stop_timeout = 3

            [telemetry]
            poll_interval = 100
            staleness_window = 12
            "#,
        )
        .expect("config parses");
        assert_eq!(config.engine.settle_interval, Duration::from_millis(250));
        assert_eq!(config.engine.stop_timeout, Duration::from_secs(3));
        assert_eq!(config.telemetry.poll_interval, Duration::from_millis(100));
        assert_eq!(config.telemetry.staleness_window, Duration::from_secs(12));
    }

    #[test]
    fn zero_max_errors_is_rejected() {
        let err = AppConfig::from_str("[telemetry]\nmax_errors = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_errors"));
    }

    #[test]
    fn cooldown_ceiling_below_base_is_rejected() {
        let err = AppConfig::from_str("[engine]\nbase_cooldown = 60\nmax_cooldown = 10\n")
            .unwrap_err();
        assert!(err.to_string().contains("max_cooldown"));
    }

    #[test]
    fn config_file_resolves_relative_to_install_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("trunk.json"), b"{}").expect("write config");
        let engine = EngineConfig {
            install_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };

        let resolved = engine
            .resolve_config_file(Some(Path::new("trunk.json")))
            .expect("resolved under install dir");
        assert_eq!(resolved, dir.path().join("trunk.json"));
        assert!(engine
            .resolve_config_file(Some(Path::new("missing.json")))
            .is_none());
    }

    #[test]
    fn base_url_targets_root_path() {
        let telemetry = TelemetryConfig {
            host: "10.0.0.7".into(),
            port: 8081,
            ..TelemetryConfig::default()
        };
        assert_eq!(telemetry.base_url(), "http://10.0.0.7:8081/");
    }
}
