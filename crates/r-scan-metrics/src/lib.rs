//! ---
//! rscan_section: "03-observability"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Metrics collection and export utilities."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
//! Prometheus plumbing shared by the supervisor, the telemetry normalizer and
//! the daemon. Components register their own families on one
//! [`SharedRegistry`]; the daemon exposes it through [`MetricsExporter`].
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder, TEXT_FORMAT};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub use prometheus;

/// Registry handle passed to every component that publishes metrics.
pub type SharedRegistry = Arc<Registry>;

/// Scrape path served by the exporter.
pub const METRICS_PATH: &str = "/metrics";

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Publish `r_scan_build_info{version="..."} 1` so scrapes identify the daemon build.
pub fn register_build_info(registry: &Registry, version: &str) -> Result<()> {
    let info = IntGaugeVec::new(
        Opts::new("r_scan_build_info", "Build of the running R-SCAN daemon"),
        &["version"],
    )?;
    registry.register(Box::new(info.clone()))?;
    info.with_label_values(&[version]).set(1);
    Ok(())
}

/// Encode every registered family in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metric families")?;
    String::from_utf8(buffer).context("metric exposition is not utf-8")
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    match render(&registry) {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!(error = %err, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Running `/metrics` endpoint.
#[derive(Debug)]
pub struct MetricsExporter {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsExporter {
    /// Bind `addr` synchronously, so a busy port fails the caller, then serve
    /// scrapes on the current runtime. Port 0 picks a free port.
    pub fn spawn(registry: SharedRegistry, addr: SocketAddr) -> Result<Self> {
        let listener = StdTcpListener::bind(addr)
            .with_context(|| format!("failed to bind metrics listener {}", addr))?;
        listener
            .set_nonblocking(true)
            .context("failed to make metrics listener non-blocking")?;
        let bound = listener
            .local_addr()
            .context("failed to read metrics listener address")?;
        let listener = TcpListener::from_std(listener)
            .context("failed to register metrics listener with the runtime")?;

        let app = Router::new()
            .route(METRICS_PATH, get(scrape))
            .with_state(registry);
        let (shutdown, stop) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop.await;
                })
                .await
                .context("metrics exporter stopped with an error")
        });

        info!(address = %bound, path = METRICS_PATH, "metrics exporter listening");
        Ok(Self {
            addr: bound,
            shutdown: Some(shutdown),
            task,
        })
    }

    /// Address actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for the server task.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.shutdown.take() {
            let _ = stop.send(());
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}
