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

use serde::{Deserialize, Serialize};

/// Coarse classification of a failed status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// The engine port refused or dropped the connection.
    ConnectionRefused,
    /// The request completed but was rejected (non-success status, protocol error).
    Request,
    /// Anything else, including an undecodable response body.
    Unexpected,
}

impl TransportErrorKind {
    /// Operator-facing label used in placeholder states.
    pub fn label(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "Timeout",
            TransportErrorKind::ConnectionRefused => "Connection Error",
            TransportErrorKind::Request => "Request Error",
            TransportErrorKind::Unexpected => "Unknown Error",
        }
    }

    /// Stable identifier for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionRefused => "connection_refused",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors raised while exchanging a command with the engine.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Endpoint that was contacted.
        url: String,
    },
    /// No connection could be established.
    #[error("cannot connect to engine at {url}")]
    Connect {
        /// Endpoint that was contacted.
        url: String,
        /// Underlying client error, when one exists.
        #[source]
        source: Option<reqwest::Error>,
    },
    /// The engine answered with a non-success HTTP status.
    #[error("engine returned HTTP {status}")]
    Status {
        /// HTTP status code returned by the engine.
        status: u16,
    },
    /// Any other client-side request failure.
    #[error("engine request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// The body could not be decoded as JSON.
    #[error("malformed engine response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Classify a client error raised while talking to `url`.
    pub fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_owned(),
            }
        } else if err.is_connect() {
            TransportError::Connect {
                url: url.to_owned(),
                source: Some(err),
            }
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Request(err)
        }
    }

    /// Collapse the error into the classification used for health tracking.
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Timeout { .. } => TransportErrorKind::Timeout,
            TransportError::Connect { .. } => TransportErrorKind::ConnectionRefused,
            TransportError::Status { .. } | TransportError::Request(_) => {
                TransportErrorKind::Request
            }
            TransportError::Malformed(_) => TransportErrorKind::Unexpected,
        }
    }
}

/// Structural mismatch inside an otherwise well-formed status payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A container field carried a value of the wrong JSON type.
    #[error("`{field}` in {record} record has an unexpected type")]
    UnexpectedType {
        /// `json_type` of the offending record.
        record: &'static str,
        /// Field whose type did not match.
        field: &'static str,
    },
}
