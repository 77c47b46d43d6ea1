//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Decoding engine process supervision."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::io;
use std::path::PathBuf;

use crate::policy::RestartRefusal;

/// Result alias for supervisor internals.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Failures raised while managing the engine process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The engine configuration file could not be located.
    #[error("engine configuration file not found: {0}")]
    ConfigNotFound(PathBuf),
    /// The operating system refused to launch the engine.
    #[error("failed to launch engine: {0}")]
    Spawn(#[source] io::Error),
    /// The engine terminated before the settle interval elapsed.
    #[error("engine exited during startup ({status})")]
    ExitedEarly {
        /// Exit status as reported by the OS.
        status: String,
        /// Output captured before the exit.
        output: Vec<String>,
    },
    /// The restart policy declined the request.
    #[error("restart refused: {0}")]
    RestartRefused(#[from] RestartRefusal),
}
