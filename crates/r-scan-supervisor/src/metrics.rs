//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Decoding engine process supervision."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts};
use r_scan_metrics::SharedRegistry;

/// Metrics published by the engine supervisor.
#[derive(Clone)]
pub struct SupervisorMetrics {
    registry: SharedRegistry,
    starts_total: IntCounterVec,
    restarts_total: IntCounterVec,
    strays_terminated_total: IntCounter,
    engine_running: IntGauge,
}

impl SupervisorMetrics {
    /// Register the supervisor metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounterVec::new(
            Opts::new(
                "r_scan_supervisor_starts_total",
                "Engine launch attempts, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(starts_total.clone()))?;

        let restarts_total = IntCounterVec::new(
            Opts::new(
                "r_scan_supervisor_restarts_total",
                "Engine restart requests, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(restarts_total.clone()))?;

        let strays_terminated_total = IntCounter::with_opts(Opts::new(
            "r_scan_supervisor_strays_terminated_total",
            "Unmanaged engine processes terminated during stop or kill-all",
        ))?;
        registry.register(Box::new(strays_terminated_total.clone()))?;

        let engine_running = IntGauge::with_opts(Opts::new(
            "r_scan_supervisor_engine_running",
            "1 while a managed engine process is running",
        ))?;
        registry.register(Box::new(engine_running.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            restarts_total,
            strays_terminated_total,
            engine_running,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count a start attempt by outcome.
    pub fn record_start(&self, outcome: &str) {
        self.starts_total.with_label_values(&[outcome]).inc();
    }

    /// Count a restart attempt by outcome.
    pub fn record_restart(&self, outcome: &str) {
        self.restarts_total.with_label_values(&[outcome]).inc();
    }

    /// Count one stray instance confirmed dead.
    pub fn record_stray_terminated(&self) {
        self.strays_terminated_total.inc();
    }

    /// Set the engine running gauge.
    pub fn set_running(&self, running: bool) {
        self.engine_running.set(i64::from(running));
    }
}

impl std::fmt::Debug for SupervisorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorMetrics").finish_non_exhaustive()
    }
}
