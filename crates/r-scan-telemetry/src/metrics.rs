//! ---
//! rscan_section: "02-telemetry"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Engine status polling and channel-state normalisation."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use anyhow::Result;
use prometheus::{IntCounterVec, IntGauge, Opts};
use r_scan_metrics::SharedRegistry;

use crate::health::ConnectionStatus;
use crate::normalizer::PollOutcome;

/// Metrics published by the telemetry poll loop.
#[derive(Clone)]
pub struct TelemetryMetrics {
    registry: SharedRegistry,
    polls_total: IntCounterVec,
    connection_errors: IntGauge,
    connected: IntGauge,
}

impl TelemetryMetrics {
    /// Register the telemetry metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let polls_total = IntCounterVec::new(
            Opts::new(
                "r_scan_telemetry_polls_total",
                "Status polls issued against the engine, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(polls_total.clone()))?;

        let connection_errors = IntGauge::with_opts(Opts::new(
            "r_scan_telemetry_connection_errors",
            "Consecutive transport errors since the last successful poll",
        ))?;
        registry.register(Box::new(connection_errors.clone()))?;

        let connected = IntGauge::with_opts(Opts::new(
            "r_scan_telemetry_connected",
            "1 while the engine status endpoint is considered connected",
        ))?;
        registry.register(Box::new(connected.clone()))?;

        Ok(Self {
            registry,
            polls_total,
            connection_errors,
            connected,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count one poll and refresh the health gauges.
    pub fn record_poll(&self, outcome: &PollOutcome, errors: u32, status: ConnectionStatus) {
        self.polls_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        self.connection_errors.set(i64::from(errors));
        self.connected
            .set(i64::from(status == ConnectionStatus::Connected));
    }
}

impl std::fmt::Debug for TelemetryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryMetrics").finish_non_exhaustive()
    }
}
