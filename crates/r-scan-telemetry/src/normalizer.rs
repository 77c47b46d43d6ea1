//! ---
//! rscan_section: "02-telemetry"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Engine status polling and channel-state normalisation."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r_scan_common::TelemetryConfig;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::TransportErrorKind;
use crate::health::{ConnectionHealth, ConnectionStatus};
use crate::metrics::TelemetryMetrics;
use crate::parse::PayloadParser;
use crate::state::ChannelState;
use crate::transport::{CommandEnvelope, EngineTransport, HttpTransport};

/// Result of a single poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A fresh snapshot was published.
    Updated,
    /// No new information; the last good snapshot is still current.
    Retained,
    /// No new information and the last good snapshot aged out.
    Degraded,
    /// The exchange failed; a placeholder state was published.
    Failed(TransportErrorKind),
}

impl PollOutcome {
    /// Stable identifier for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Updated => "updated",
            PollOutcome::Retained => "retained",
            PollOutcome::Degraded => "degraded",
            PollOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
struct PollBook {
    last_update: Option<Instant>,
    last_valid: Option<Arc<ChannelState>>,
}

/// Polls the engine and publishes [`ChannelState`] snapshots.
///
/// The poll task is the only writer; readers take cheap `Arc` clones through
/// [`TelemetryNormalizer::latest`] or follow every publish through
/// [`TelemetryNormalizer::subscribe`].
pub struct TelemetryNormalizer {
    config: TelemetryConfig,
    transport: Arc<dyn EngineTransport>,
    parser: PayloadParser,
    health: ConnectionHealth,
    state_tx: watch::Sender<Arc<ChannelState>>,
    book: Mutex<PollBook>,
    metrics: Option<TelemetryMetrics>,
}

impl TelemetryNormalizer {
    /// Create a normalizer around an arbitrary transport.
    pub fn new(config: TelemetryConfig, transport: Arc<dyn EngineTransport>) -> Self {
        let (state_tx, _) = watch::channel(Arc::new(ChannelState::unknown()));
        Self {
            parser: PayloadParser::from_config(&config),
            health: ConnectionHealth::new(config.max_errors),
            config,
            transport,
            state_tx,
            book: Mutex::new(PollBook::default()),
            metrics: None,
        }
    }

    /// Create a normalizer talking HTTP to the configured endpoint.
    pub fn from_config(config: TelemetryConfig) -> crate::Result<Self> {
        let transport = HttpTransport::from_config(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Attach Prometheus instrumentation.
    pub fn with_metrics(mut self, metrics: TelemetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Arc<ChannelState> {
        self.state_tx.borrow().clone()
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChannelState>> {
        self.state_tx.subscribe()
    }

    /// Below the error threshold and not showing a sentinel label.
    pub fn is_connected(&self) -> bool {
        !self.health.is_disconnected() && !self.latest().is_sentinel()
    }

    /// Connection health derived from consecutive poll failures.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.health.status()
    }

    /// Consecutive transport errors.
    pub fn error_count(&self) -> u32 {
        self.health.errors()
    }

    /// Relay a control command to the engine outside the poll cadence.
    ///
    /// Failures are logged and reported as `None`; they do not affect the
    /// connection health counter.
    pub async fn send_command(&self, name: &str, arg1: i64, arg2: i64) -> Option<Value> {
        let envelope = CommandEnvelope::new(name, arg1, arg2);
        match self.transport.exchange(&envelope).await {
            Ok(body) => {
                debug!(command = name, arg1, arg2, "engine command acknowledged");
                Some(body)
            }
            Err(err) => {
                warn!(command = name, arg1, arg2, error = %err, "engine command failed");
                None
            }
        }
    }

    /// Run one status exchange and publish the resulting state.
    pub async fn poll_once(&self) -> PollOutcome {
        let outcome = match self
            .transport
            .exchange(&CommandEnvelope::status_request())
            .await
        {
            Ok(payload) => match self.parser.parse(&payload) {
                // Only a poll that yields channel information clears the error count.
                Some(state) => {
                    self.health.record_success();
                    let state = Arc::new(state);
                    {
                        let mut book = self.book.lock();
                        book.last_update = Some(Instant::now());
                        book.last_valid = Some(state.clone());
                    }
                    self.state_tx.send_replace(state);
                    PollOutcome::Updated
                }
                None => self.retain_or_degrade(),
            },
            Err(err) => {
                let kind = err.kind();
                let errors = self.health.record_failure();
                let state = if errors >= self.health.max_errors() {
                    ChannelState::offline(kind)
                } else {
                    ChannelState::connecting(kind)
                };
                warn!(
                    endpoint = %self.transport.endpoint(),
                    errors,
                    kind = kind.as_str(),
                    error = %err,
                    "engine status poll failed"
                );
                self.state_tx.send_replace(Arc::new(state));
                PollOutcome::Failed(kind)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_poll(&outcome, self.health.errors(), self.health.status());
        }
        outcome
    }

    fn retain_or_degrade(&self) -> PollOutcome {
        let retained = {
            let book = self.book.lock();
            let fresh = book
                .last_update
                .map(|at| at.elapsed() <= self.config.staleness_window)
                .unwrap_or(false);
            if fresh {
                book.last_valid.clone()
            } else {
                None
            }
        };

        match retained {
            Some(last) => {
                self.state_tx.send_if_modified(|current| {
                    if Arc::ptr_eq(current, &last) {
                        false
                    } else {
                        *current = last.clone();
                        true
                    }
                });
                PollOutcome::Retained
            }
            None => {
                debug!(
                    window_secs = self.config.staleness_window.as_secs(),
                    "no fresh telemetry; publishing neutral state"
                );
                self.state_tx
                    .send_replace(Arc::new(ChannelState::no_activity()));
                PollOutcome::Degraded
            }
        }
    }

    /// Delay before the next poll: the base cadence plus a linear backoff
    /// capped at `backoff_cap` once errors exceed `backoff_after`.
    pub fn next_delay(&self) -> Duration {
        let errors = self.health.errors();
        let mut delay = self.config.poll_interval;
        if errors > self.config.backoff_after {
            delay += Duration::from_secs(u64::from(errors)).min(self.config.backoff_cap);
        }
        delay
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            endpoint = %self.transport.endpoint(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "telemetry poll loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.poll_once() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            let delay = self.next_delay();
            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("telemetry poll loop stopped");
    }

    /// Spawn [`TelemetryNormalizer::run`] on the current runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

impl std::fmt::Debug for TelemetryNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryNormalizer")
            .field("endpoint", &self.transport.endpoint())
            .field("errors", &self.health.errors())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::TransportError;

    enum Reply {
        Payload(Value),
        Fail(TransportErrorKind),
    }

    /// Replays a fixed script, repeating the last reply once exhausted.
    struct ScriptedTransport {
        replies: parking_lot::Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: parking_lot::Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    fn failure(kind: TransportErrorKind) -> TransportError {
        match kind {
            TransportErrorKind::Timeout => TransportError::Timeout {
                url: "mock".into(),
            },
            TransportErrorKind::ConnectionRefused => TransportError::Connect {
                url: "mock".into(),
                source: None,
            },
            TransportErrorKind::Request => TransportError::Status { status: 500 },
            TransportErrorKind::Unexpected => TransportError::Malformed("eof".into()),
        }
    }

    #[async_trait]
    impl EngineTransport for ScriptedTransport {
        async fn exchange(&self, _envelope: &CommandEnvelope) -> crate::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut replies = self.replies.lock();
            let reply = if replies.len() > 1 {
                replies.pop_front()
            } else {
                None
            };
            let current = reply.as_ref().or(replies.front());
            match current {
                Some(Reply::Payload(value)) => Ok(value.clone()),
                Some(Reply::Fail(kind)) => Err(failure(*kind)),
                None => Ok(json!([])),
            }
        }

        fn endpoint(&self) -> &str {
            "mock"
        }
    }

    fn active_payload() -> Value {
        json!([
            {"json_type": "change_freq", "freq": 851_012_500, "system": "Metro P25"},
            {"json_type": "trunk_update", "srcaddr": 4411, "grpaddr": 1201}
        ])
    }

    fn normalizer(transport: Arc<ScriptedTransport>) -> TelemetryNormalizer {
        TelemetryNormalizer::new(TelemetryConfig::default(), transport)
    }

    #[tokio::test]
    async fn unreachable_engine_walks_health_states_to_offline() {
        let normalizer = normalizer(ScriptedTransport::new(vec![Reply::Fail(
            TransportErrorKind::ConnectionRefused,
        )]));
        assert_eq!(normalizer.connection_status(), ConnectionStatus::Connected);

        let mut seen = Vec::new();
        for _ in 0..6 {
            let outcome = normalizer.poll_once().await;
            assert_eq!(
                outcome,
                PollOutcome::Failed(TransportErrorKind::ConnectionRefused)
            );
            seen.push(normalizer.connection_status());
        }

        assert_eq!(
            seen,
            vec![
                ConnectionStatus::Unstable(1),
                ConnectionStatus::Unstable(2),
                ConnectionStatus::Unstable(3),
                ConnectionStatus::Unstable(4),
                ConnectionStatus::Disconnected,
                ConnectionStatus::Disconnected,
            ]
        );
        let state = normalizer.latest();
        assert_eq!(state.system, "Offline");
        assert_eq!(
            state.extras.error,
            Some(TransportErrorKind::ConnectionRefused)
        );
        assert!(!normalizer.is_connected());
    }

    #[tokio::test]
    async fn failures_below_threshold_publish_connecting() {
        let normalizer = normalizer(ScriptedTransport::new(vec![Reply::Fail(
            TransportErrorKind::Timeout,
        )]));
        normalizer.poll_once().await;
        let state = normalizer.latest();
        assert_eq!(state.system, "Connecting... (Timeout)");
        assert_eq!(state.extras.error, Some(TransportErrorKind::Timeout));
        assert!(normalizer.is_connected());
    }

    #[tokio::test]
    async fn successful_poll_resets_error_counter() {
        let normalizer = normalizer(ScriptedTransport::new(vec![
            Reply::Fail(TransportErrorKind::Timeout),
            Reply::Fail(TransportErrorKind::Request),
            Reply::Payload(active_payload()),
        ]));
        normalizer.poll_once().await;
        normalizer.poll_once().await;
        assert_eq!(normalizer.error_count(), 2);

        assert_eq!(normalizer.poll_once().await, PollOutcome::Updated);
        assert_eq!(normalizer.error_count(), 0);
        assert_eq!(normalizer.connection_status(), ConnectionStatus::Connected);
        let state = normalizer.latest();
        assert_eq!(state.talkgroup_id, Some(1201));
        assert!(state.is_active());
        assert!(normalizer.is_connected());
    }

    #[tokio::test]
    async fn empty_response_keeps_error_count() {
        let normalizer = normalizer(ScriptedTransport::new(vec![
            Reply::Fail(TransportErrorKind::Timeout),
            Reply::Fail(TransportErrorKind::Timeout),
            Reply::Payload(json!([])),
        ]));
        normalizer.poll_once().await;
        normalizer.poll_once().await;
        assert_eq!(normalizer.poll_once().await, PollOutcome::Degraded);
        assert_eq!(normalizer.error_count(), 2);
        assert_eq!(normalizer.connection_status(), ConnectionStatus::Unstable(2));
        assert_eq!(normalizer.latest().system, "No Activity");
    }

    #[tokio::test]
    async fn unrecognised_records_keep_error_count() {
        let normalizer = normalizer(ScriptedTransport::new(vec![
            Reply::Fail(TransportErrorKind::ConnectionRefused),
            Reply::Payload(json!([{"json_type": "rx_update", "files": []}])),
        ]));
        normalizer.poll_once().await;
        assert_eq!(normalizer.poll_once().await, PollOutcome::Degraded);
        assert_eq!(normalizer.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_snapshot_degrades_to_no_activity() {
        let normalizer = normalizer(ScriptedTransport::new(vec![
            Reply::Payload(active_payload()),
            Reply::Payload(json!([])),
        ]));
        assert_eq!(normalizer.poll_once().await, PollOutcome::Updated);
        let good = normalizer.latest();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(normalizer.poll_once().await, PollOutcome::Retained);
        assert!(Arc::ptr_eq(&normalizer.latest(), &good));

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(normalizer.poll_once().await, PollOutcome::Degraded);
        let state = normalizer.latest();
        assert_eq!(state.system, "No Activity");
        assert_eq!(state.talkgroup_id, None);
    }

    #[tokio::test]
    async fn retained_snapshot_replaces_connecting_placeholder() {
        let normalizer = normalizer(ScriptedTransport::new(vec![
            Reply::Payload(active_payload()),
            Reply::Fail(TransportErrorKind::Timeout),
            Reply::Payload(json!([{"json_type": "rx_update"}])),
        ]));
        normalizer.poll_once().await;
        let good = normalizer.latest();
        normalizer.poll_once().await;
        assert_ne!(normalizer.latest().system, good.system);

        assert_eq!(normalizer.poll_once().await, PollOutcome::Retained);
        assert!(Arc::ptr_eq(&normalizer.latest(), &good));
    }

    #[tokio::test]
    async fn backoff_grows_linearly_and_caps() {
        let normalizer = normalizer(ScriptedTransport::new(vec![Reply::Fail(
            TransportErrorKind::ConnectionRefused,
        )]));
        for _ in 0..3 {
            normalizer.poll_once().await;
        }
        assert_eq!(normalizer.next_delay(), Duration::from_millis(500));

        normalizer.poll_once().await;
        assert_eq!(normalizer.next_delay(), Duration::from_millis(4_500));

        for _ in 0..6 {
            normalizer.poll_once().await;
        }
        assert_eq!(normalizer.next_delay(), Duration::from_millis(5_500));
    }

    #[tokio::test]
    async fn failed_command_returns_none_without_touching_health() {
        let transport = ScriptedTransport::new(vec![Reply::Fail(TransportErrorKind::Timeout)]);
        let normalizer = normalizer(transport.clone());
        assert!(normalizer.send_command("hold", 1201, 0).await.is_none());
        assert_eq!(normalizer.error_count(), 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribers_observe_each_publish() {
        let normalizer = normalizer(ScriptedTransport::new(vec![
            Reply::Payload(active_payload()),
        ]));
        let mut rx = normalizer.subscribe();
        normalizer.poll_once().await;
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(rx.borrow_and_update().system, "Metro P25");
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_exits_on_shutdown() {
        let transport = ScriptedTransport::new(vec![Reply::Payload(active_payload())]);
        let normalizer = Arc::new(normalizer(transport.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = normalizer.clone().spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown_tx.send(true).expect("loop is listening");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop stops within one iteration")
            .expect("task completes");
        assert!(transport.calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(normalizer.latest().system, "Metro P25");
    }
}
