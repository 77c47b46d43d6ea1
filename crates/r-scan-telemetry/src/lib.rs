//! ---
//! rscan_section: "02-telemetry"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Engine status polling and channel-state normalisation."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
//! Telemetry normalizer for the decoding engine.
//!
//! The engine exposes a JSON control endpoint whose status payload drifts
//! between a single-channel and a multi-channel schema. [`TelemetryNormalizer`]
//! polls that endpoint, reconciles both shapes through [`PayloadParser`] and
//! publishes a [`ChannelState`] snapshot that consumers read without locking.
#![warn(missing_docs)]

pub mod error;
pub mod health;
pub mod metrics;
pub mod normalizer;
pub mod parse;
pub mod state;
pub mod transport;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

pub use error::{SchemaError, TransportError, TransportErrorKind};
pub use health::{ConnectionHealth, ConnectionStatus};
pub use metrics::TelemetryMetrics;
pub use normalizer::{PollOutcome, TelemetryNormalizer};
pub use parse::PayloadParser;
pub use state::{ChannelState, Extras};
pub use transport::{CommandEnvelope, EngineTransport, HttpTransport};
