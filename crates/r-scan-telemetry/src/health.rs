//! ---
//! rscan_section: "02-telemetry"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Engine status polling and channel-state normalisation."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

/// Link quality derived from the consecutive transport error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "errors", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No outstanding errors.
    Connected,
    /// Some errors, still below the disconnect threshold.
    Unstable(u32),
    /// Error threshold reached.
    Disconnected,
}

impl ConnectionStatus {
    /// Classify an error count against the disconnect threshold.
    pub fn classify(errors: u32, max_errors: u32) -> Self {
        if errors == 0 {
            ConnectionStatus::Connected
        } else if errors < max_errors {
            ConnectionStatus::Unstable(errors)
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Stable identifier for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Unstable(_) => "unstable",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => f.write_str("Connected"),
            ConnectionStatus::Unstable(n) => write!(f, "Unstable ({} errors)", n),
            ConnectionStatus::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Consecutive-error counter.
///
/// Written by the poll task only; readers use relaxed loads.
#[derive(Debug)]
pub struct ConnectionHealth {
    errors: AtomicU32,
    max_errors: u32,
}

impl ConnectionHealth {
    /// Create a counter that reports disconnected at `max_errors`.
    pub fn new(max_errors: u32) -> Self {
        Self {
            errors: AtomicU32::new(0),
            max_errors: max_errors.max(1),
        }
    }

    /// Reset after any successful exchange.
    pub fn record_success(&self) {
        self.errors.store(0, Ordering::Relaxed);
    }

    /// Count a failure and return the new total.
    pub fn record_failure(&self) -> u32 {
        self.errors
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Current consecutive error count.
    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Disconnect threshold.
    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// True once the threshold is reached.
    pub fn is_disconnected(&self) -> bool {
        self.errors() >= self.max_errors
    }

    /// Current classification of the error count.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::classify(self.errors(), self.max_errors)
    }
}
