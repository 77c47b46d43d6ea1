//! ---
//! rscan_section: "02-telemetry"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Engine status polling and channel-state normalisation."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use r_scan_common::TelemetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::TransportError;
use crate::Result;

/// One element of the engine's command array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command name understood by the engine.
    pub command: String,
    /// First numeric argument.
    pub arg1: i64,
    /// Second numeric argument.
    pub arg2: i64,
}

impl CommandEnvelope {
    /// Envelope for `command` with both arguments.
    pub fn new(command: impl Into<String>, arg1: i64, arg2: i64) -> Self {
        Self {
            command: command.into(),
            arg1,
            arg2,
        }
    }

    /// The fixed status request issued on every poll.
    pub fn status_request() -> Self {
        Self::new("update", 0, 0)
    }
}

/// Request/response exchange with the engine's control endpoint.
#[async_trait]
pub trait EngineTransport: Send + Sync + 'static {
    /// Send a single command and return the decoded JSON body.
    async fn exchange(&self, envelope: &CommandEnvelope) -> Result<Value>;

    /// Human-readable endpoint used in logs.
    fn endpoint(&self) -> &str;
}

/// HTTP transport posting JSON command arrays.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Build a transport for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Request)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Client targeting the configured control endpoint.
    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Self::new(config.base_url(), config.request_timeout)
    }
}

#[async_trait]
impl EngineTransport for HttpTransport {
    async fn exchange(&self, envelope: &CommandEnvelope) -> Result<Value> {
        trace!(url = %self.url, command = %envelope.command, "posting engine command");
        let response = self
            .client
            .post(&self.url)
            .json(&[envelope])
            .send()
            .await
            .map_err(|err| TransportError::from_reqwest(err, &self.url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| TransportError::from_reqwest(err, &self.url))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
