//! ---
//! rscan_section: "02-telemetry"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Engine status polling and channel-state normalisation."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
//! Canonical channel state published by the normalizer.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportErrorKind;

/// System label used when nothing is known yet.
pub const UNKNOWN_SYSTEM: &str = "Unknown";
/// System label published once the engine is considered unreachable.
pub const OFFLINE_SYSTEM: &str = "Offline";
/// System label published when the last good snapshot went stale.
pub const NO_ACTIVITY_SYSTEM: &str = "No Activity";

/// Auxiliary fields attached to a [`ChannelState`].
///
/// Known fields are typed; anything else the engine reports lands in
/// [`Extras::other`] so new keys survive without a schema change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extras {
    /// True only when a non-zero source and talkgroup were seen in the same poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Radio id of the transmitting unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<u32>,
    /// Whether the current call is encrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    /// Whether the current call is flagged as an emergency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency: Option<bool>,
    /// Decoder quality estimate in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_quality: Option<f64>,
    /// Whether the decoder holds a control-channel lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_locked: Option<bool>,
    /// Network access code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nac: Option<u32>,
    /// Wide area communications network id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wacn: Option<u32>,
    /// System id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sysid: Option<u32>,
    /// Age in seconds of the activity a frequency was inferred from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_secs: Option<f64>,
    /// Last transport failure, set on placeholder states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TransportErrorKind>,
    /// When the snapshot was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Forward-compatible keys (tags, channel names, rx/tx channel, ...).
    #[serde(flatten)]
    pub other: IndexMap<String, Value>,
}

/// Display-ready snapshot of what the engine is tuned to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Name of the tuned system or a sentinel/fallback label.
    pub system: String,
    /// Frequency in MHz.
    pub frequency: Option<f64>,
    /// Talkgroup of the current call.
    pub talkgroup_id: Option<u32>,
    /// Fields outside the fixed schema, kept for display.
    pub extras: Extras,
}

impl ChannelState {
    /// Initial state before the first poll.
    pub fn unknown() -> Self {
        Self::placeholder(UNKNOWN_SYSTEM.to_owned(), None)
    }

    /// Neutral state once the last good snapshot aged out.
    pub fn no_activity() -> Self {
        Self::placeholder(NO_ACTIVITY_SYSTEM.to_owned(), None)
    }

    /// Engine considered unreachable.
    pub fn offline(kind: TransportErrorKind) -> Self {
        Self::placeholder(OFFLINE_SYSTEM.to_owned(), Some(kind))
    }

    /// Engine failing but not yet considered unreachable.
    pub fn connecting(kind: TransportErrorKind) -> Self {
        Self::placeholder(format!("Connecting... ({})", kind.label()), Some(kind))
    }

    fn placeholder(system: String, error: Option<TransportErrorKind>) -> Self {
        Self {
            system,
            frequency: None,
            talkgroup_id: None,
            extras: Extras {
                error,
                timestamp: Some(Utc::now()),
                ..Extras::default()
            },
        }
    }

    /// True for the "Offline" and "Unknown" labels.
    pub fn is_sentinel(&self) -> bool {
        self.system == OFFLINE_SYSTEM || self.system == UNKNOWN_SYSTEM
    }

    /// Whether a transmission is in progress.
    pub fn is_active(&self) -> bool {
        self.extras.active.unwrap_or(false)
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::unknown()
    }
}
