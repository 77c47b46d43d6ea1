//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Decoding engine process supervision."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::time::Duration;

use r_scan_common::EngineConfig;
use tokio::time::Instant;

/// Cooldown and ceiling applied to engine restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Minimum spacing between restarts.
    pub base_cooldown: Duration,
    /// Upper bound for the exponential cooldown.
    pub max_cooldown: Duration,
    /// Restarts allowed before an external reset is required.
    pub max_restarts: u32,
}

/// Why a restart was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RestartRefusal {
    /// Too soon after the previous restart.
    #[error("cooling down for another {}s", .remaining.as_secs_f32().ceil())]
    CoolingDown {
        /// Time left before another restart is allowed.
        remaining: Duration,
    },
    /// The restart counter reached its ceiling.
    #[error("restart limit of {limit} reached")]
    LimitReached {
        /// Configured ceiling.
        limit: u32,
    },
}

impl RestartRefusal {
    /// Stable identifier for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartRefusal::CoolingDown { .. } => "cooling_down",
            RestartRefusal::LimitReached { .. } => "limit_reached",
        }
    }
}

impl RestartPolicy {
    /// Policy with explicit cooldown bounds and restart ceiling.
    pub fn new(base_cooldown: Duration, max_cooldown: Duration, max_restarts: u32) -> Self {
        Self {
            base_cooldown,
            max_cooldown: max_cooldown.max(base_cooldown),
            max_restarts,
        }
    }

    /// Policy from the engine settings.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.base_cooldown, config.max_cooldown, config.max_restarts)
    }

    /// Cooldown after `restart_count` restarts: `2^count` seconds, never
    /// below the base cooldown and never above the ceiling.
    pub fn cooldown(&self, restart_count: u32) -> Duration {
        let exponential = Duration::from_secs(1u64 << restart_count.min(32));
        exponential.max(self.base_cooldown).min(self.max_cooldown)
    }

    /// Decide whether a restart may proceed at `now`.
    pub fn check(
        &self,
        restart_count: u32,
        last_restart: Option<Instant>,
        now: Instant,
    ) -> Result<(), RestartRefusal> {
        if let Some(last) = last_restart {
            let cooldown = self.cooldown(restart_count);
            let elapsed = now.saturating_duration_since(last);
            if elapsed < cooldown {
                return Err(RestartRefusal::CoolingDown {
                    remaining: cooldown - elapsed,
                });
            }
        }
        if restart_count >= self.max_restarts {
            return Err(RestartRefusal::LimitReached {
                limit: self.max_restarts,
            });
        }
        Ok(())
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
