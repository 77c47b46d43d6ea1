//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Decoding engine process supervision."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
//! Process supervisor for the external decoding engine.
//!
//! [`EngineSupervisor`] launches the engine in its own process group, keeps a
//! health monitor running beside it and reconciles stray instances found in
//! the system process table. Platform access sits behind [`ProcessTable`].
#![warn(missing_docs)]

pub mod error;
pub mod metrics;
pub mod output;
pub mod platform;
pub mod policy;
pub mod supervisor;

pub use error::{Result, SupervisorError};
pub use metrics::SupervisorMetrics;
pub use output::OutputLog;
pub use platform::{
    EngineSignature, ProcFsTable, ProcessEntry, ProcessStats, ProcessTable, SignalTarget,
    TermSignal,
};
pub use policy::{RestartPolicy, RestartRefusal};
pub use supervisor::{EngineLifecycle, EngineStatus, EngineSupervisor};
