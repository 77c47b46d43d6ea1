//! ---
//! rscan_section: "01-core-functionality"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Shared primitives and utilities for the control plane."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
//! Shared primitives for the R-SCAN control plane workspace.
//! This crate exposes configuration loading and the tracing bootstrap consumed
//! by the supervisor, the telemetry normalizer and the daemon.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, EngineConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, TelemetryConfig,
};
pub use logging::{init_tracing, LogFormat, ENGINE_OUTPUT_TARGET};
