//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Decoding engine process supervision."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use r_scan_common::{EngineConfig, ENGINE_OUTPUT_TARGET};
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SupervisorError};
use crate::metrics::SupervisorMetrics;
use crate::output::OutputLog;
use crate::platform::{EngineSignature, ProcFsTable, ProcessTable, SignalTarget, TermSignal};
use crate::policy::RestartPolicy;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);
const EARLY_EXIT_TAIL: usize = 20;

/// Explicit lifecycle of the supervised engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineLifecycle {
    /// No managed process.
    Stopped,
    /// Launch in progress.
    Starting,
    /// Managed process running under the health monitor.
    Running,
    /// Termination in progress.
    Stopping,
    /// The monitor gave up after a death it could not recover from.
    Halted,
}

impl EngineLifecycle {
    /// Lowercase name used in logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineLifecycle::Stopped => "stopped",
            EngineLifecycle::Starting => "starting",
            EngineLifecycle::Running => "running",
            EngineLifecycle::Stopping => "stopping",
            EngineLifecycle::Halted => "halted",
        }
    }
}

impl fmt::Display for EngineLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the engine process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    /// True when an engine process is alive.
    pub running: bool,
    /// True when the reported process was launched by this supervisor.
    pub managed: bool,
    /// Process id of the reported engine.
    pub pid: Option<u32>,
    /// CPU usage sampled from the process table.
    pub cpu_percent: Option<f64>,
    /// Resident memory in MiB.
    pub memory_mib: Option<f64>,
    /// Seconds since the process started.
    pub uptime_secs: Option<u64>,
    /// Wall-clock start time of the process.
    pub started_at: Option<DateTime<Utc>>,
    /// Restarts recorded since the last reset.
    pub restart_count: u32,
    /// Supervisor lifecycle phase.
    pub lifecycle: EngineLifecycle,
}

impl EngineStatus {
    fn not_running(restart_count: u32, lifecycle: EngineLifecycle) -> Self {
        Self {
            running: false,
            managed: false,
            pid: None,
            cpu_percent: None,
            memory_mib: None,
            uptime_secs: None,
            started_at: None,
            restart_count,
            lifecycle,
        }
    }
}

struct ManagedProcess {
    child: Child,
    pid: u32,
    pgid: u32,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RestartBook {
    restart_count: u32,
    last_restart: Option<Instant>,
}

struct MonitorHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Who asked for a restart. The monitor passes its own cancellation flag so
/// a restart racing with `stop` gives up instead of relaunching.
#[derive(Clone, Copy)]
enum RestartOrigin<'a> {
    Caller,
    Monitor(&'a watch::Receiver<bool>),
}

impl RestartOrigin<'_> {
    fn is_cancelled(&self) -> bool {
        match self {
            RestartOrigin::Caller => false,
            RestartOrigin::Monitor(cancel) => *cancel.borrow(),
        }
    }
}

/// Owns the engine process for the lifetime of the daemon.
///
/// Process handle and restart bookkeeping only change while `lifecycle_lock`
/// is held, so concurrent start/stop/restart calls serialise.
pub struct EngineSupervisor {
    config: EngineConfig,
    signature: EngineSignature,
    table: Arc<dyn ProcessTable>,
    policy: RestartPolicy,
    lifecycle_lock: tokio::sync::Mutex<()>,
    process: Mutex<Option<ManagedProcess>>,
    book: Mutex<RestartBook>,
    /// Engine config of the last successful launch, reused by restarts.
    last_config: Mutex<Option<PathBuf>>,
    lifecycle: Mutex<EngineLifecycle>,
    output: Arc<OutputLog>,
    monitor: Mutex<Option<MonitorHandle>>,
    metrics: Option<SupervisorMetrics>,
}

impl EngineSupervisor {
    /// Create a supervisor using the `/proc` process table.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Self::with_table(config, Arc::new(ProcFsTable::new()), None)
    }

    /// Create a supervisor with an explicit process table and optional metrics.
    pub fn with_table(
        config: EngineConfig,
        table: Arc<dyn ProcessTable>,
        metrics: Option<SupervisorMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            signature: EngineSignature::from_config(&config),
            policy: RestartPolicy::from_config(&config),
            output: Arc::new(OutputLog::new(config.log_capacity, config.echo_output)),
            config,
            table,
            lifecycle_lock: tokio::sync::Mutex::new(()),
            process: Mutex::new(None),
            book: Mutex::new(RestartBook::default()),
            last_config: Mutex::new(None),
            lifecycle: Mutex::new(EngineLifecycle::Stopped),
            monitor: Mutex::new(None),
            metrics,
        })
    }

    /// Launch the engine unless an instance is already running.
    ///
    /// `config_file` overrides the configured engine config path. Returns
    /// false on a missing config file, a launch failure or an exit during
    /// the settle interval; none of these are retried.
    pub async fn start(self: &Arc<Self>, config_file: Option<&Path>) -> bool {
        let _guard = self.lifecycle_lock.lock().await;
        self.start_locked(config_file, true).await
    }

    /// Terminate the managed engine and every stray instance.
    ///
    /// Returns true if any process was actually stopped.
    pub async fn stop(&self, force: bool) -> bool {
        let monitor = self.take_monitor();
        let stopped = {
            let _guard = self.lifecycle_lock.lock().await;
            self.stop_locked(force).await
        };
        if let Some(monitor) = monitor {
            self.join_monitor(monitor).await;
        }
        stopped
    }

    /// Stop then start, subject to the restart cooldown and ceiling.
    pub async fn restart(self: &Arc<Self>) -> bool {
        self.restart_with(RestartOrigin::Caller).await
    }

    /// Managed handle alive, else any matching process in the system table.
    pub fn is_running(&self) -> bool {
        if self.managed_pid().is_some() {
            return true;
        }
        !self.table.scan(&self.signature).is_empty()
    }

    /// Resource usage of the managed or discovered engine process.
    pub fn status(&self) -> EngineStatus {
        let restart_count = self.book.lock().restart_count;
        let lifecycle = self.lifecycle();
        let managed = self.managed_pid();
        let pid = managed.or_else(|| {
            self.table
                .scan(&self.signature)
                .first()
                .map(|entry| entry.pid)
        });

        let Some(pid) = pid else {
            return EngineStatus::not_running(restart_count, lifecycle);
        };
        let stats = self.table.stats(pid);
        let started_at = stats
            .as_ref()
            .and_then(|s| s.started_at)
            .or_else(|| self.process.lock().as_ref().map(|p| p.started_at));
        EngineStatus {
            running: true,
            managed: managed.is_some(),
            pid: Some(pid),
            cpu_percent: stats.as_ref().map(|s| s.cpu_percent),
            memory_mib: stats.as_ref().map(|s| s.rss_mib),
            uptime_secs: stats.as_ref().map(|s| s.uptime.as_secs()),
            started_at,
            restart_count,
            lifecycle,
        }
    }

    /// Most recent captured engine output, oldest first.
    pub fn logs(&self, lines: usize) -> Vec<String> {
        self.output.tail(lines)
    }

    /// Toggle forwarding of engine output into the tracing stream.
    pub fn set_output_echo(&self, enabled: bool) {
        self.output.set_echo(enabled);
        info!(enabled, "engine output echo toggled");
    }

    /// Current lifecycle phase.
    pub fn lifecycle(&self) -> EngineLifecycle {
        *self.lifecycle.lock()
    }

    /// Restarts recorded since the last reset.
    pub fn restart_count(&self) -> u32 {
        self.book.lock().restart_count
    }

    /// Clear the restart counter so the ceiling no longer applies.
    pub async fn reset_restart_count(&self) {
        let _guard = self.lifecycle_lock.lock().await;
        let mut book = self.book.lock();
        info!(previous = book.restart_count, "restart counter reset");
        *book = RestartBook::default();
    }

    /// Forcefully kill every engine process, managed or not.
    ///
    /// Returns the number of processes confirmed dead.
    pub async fn kill_all(&self) -> usize {
        let monitor = self.take_monitor();
        let killed = {
            let _guard = self.lifecycle_lock.lock().await;
            let mut killed = 0;
            let managed = self.process.lock().take();
            let managed_pid = managed.as_ref().map(|p| p.pid);
            if let Some(process) = managed {
                if self.terminate_managed(process, true).await {
                    killed += 1;
                }
            }
            let strays = self.table.scan(&self.signature);
            if !strays.is_empty() {
                warn!(count = strays.len(), "killing engine processes");
            }
            for entry in strays.into_iter().filter(|e| Some(e.pid) != managed_pid) {
                if self.kill_stray(entry.pid).await {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_stray_terminated();
                    }
                    killed += 1;
                }
            }
            self.remove_pid_file();
            self.set_lifecycle(EngineLifecycle::Stopped);
            if let Some(metrics) = &self.metrics {
                metrics.set_running(false);
            }
            killed
        };
        if let Some(monitor) = monitor {
            self.join_monitor(monitor).await;
        }
        info!(killed, "emergency kill complete");
        killed
    }

    /// Cancel the health monitor with a bounded join, then stop the engine
    /// when `stop_on_shutdown` is set.
    pub async fn shutdown(&self) {
        if let Some(monitor) = self.take_monitor() {
            self.join_monitor(monitor).await;
        }
        if self.config.stop_on_shutdown {
            self.stop(false).await;
        } else {
            info!("leaving engine running on shutdown");
        }
    }

    /// `spawn_monitor` is false when the health monitor itself is restarting
    /// the engine; it keeps running its own loop.
    async fn start_locked(self: &Arc<Self>, config_file: Option<&Path>, spawn_monitor: bool) -> bool {
        match self.launch(config_file).await {
            Ok(Some(pid)) => {
                info!(pid, "engine started");
                self.record_start("success");
                if spawn_monitor {
                    self.ensure_monitor();
                }
                true
            }
            Ok(None) => true,
            Err(err) => {
                match &err {
                    SupervisorError::ExitedEarly { output, .. } => {
                        error!(error = %err, "engine failed to start");
                        for line in output {
                            error!(target: ENGINE_OUTPUT_TARGET, "{}", line);
                        }
                    }
                    _ => error!(error = %err, "engine failed to start"),
                }
                self.record_start("failure");
                false
            }
        }
    }

    /// `Ok(None)` when an instance was already running.
    async fn launch(&self, config_file: Option<&Path>) -> Result<Option<u32>> {
        if self.is_running() {
            info!("engine already running; start is a no-op");
            if self.lifecycle() != EngineLifecycle::Running {
                self.set_lifecycle(EngineLifecycle::Running);
            }
            return Ok(None);
        }

        let config_path = self.config.resolve_config_file(config_file).ok_or_else(|| {
            SupervisorError::ConfigNotFound(
                config_file
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.config.config_file.clone()),
            )
        })?;

        self.set_lifecycle(EngineLifecycle::Starting);
        let mut command = self.build_command(&config_path);
        info!(
            interpreter = %self.config.interpreter,
            entrypoint = %self.config.entrypoint,
            config = %config_path.display(),
            cwd = %self.config.install_dir.display(),
            "launching engine"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.set_lifecycle(EngineLifecycle::Stopped);
                return Err(SupervisorError::Spawn(err));
            }
        };
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.output.attach(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.output.attach(stderr, "stderr"));
        }

        sleep(self.config.settle_interval).await;

        let exited = match child.try_wait() {
            Ok(status) => status.map(|s| s.to_string()),
            Err(err) => Some(err.to_string()),
        };
        let pid = child.id();
        match (exited, pid) {
            (None, Some(pid)) => {
                *self.process.lock() = Some(ManagedProcess {
                    child,
                    pid,
                    pgid: pid,
                    started_at: Utc::now(),
                });
                self.write_pid_file(pid);
                *self.last_config.lock() = Some(config_path);
                self.set_lifecycle(EngineLifecycle::Running);
                if let Some(metrics) = &self.metrics {
                    metrics.set_running(true);
                }
                Ok(Some(pid))
            }
            (exited, _) => {
                for reader in readers {
                    let _ = timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
                }
                self.set_lifecycle(EngineLifecycle::Stopped);
                Err(SupervisorError::ExitedEarly {
                    status: exited.unwrap_or_else(|| "unknown".to_owned()),
                    output: self.output.tail(EARLY_EXIT_TAIL),
                })
            }
        }
    }

    fn build_command(&self, config_path: &Path) -> Command {
        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(&self.config.entrypoint)
            .arg("-c")
            .arg(config_path)
            .args(&self.config.extra_args)
            .current_dir(&self.config.install_dir)
            .env(&self.config.search_path_var, self.search_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    fn search_path(&self) -> OsString {
        let mut paths = vec![self.config.install_dir.clone()];
        if let Some(existing) = std::env::var_os(&self.config.search_path_var) {
            paths.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(paths)
            .unwrap_or_else(|_| self.config.install_dir.clone().into_os_string())
    }

    async fn stop_locked(&self, force: bool) -> bool {
        let mut stopped = false;
        let managed = self.process.lock().take();
        let managed_pid = managed.as_ref().map(|p| p.pid);
        let strays: Vec<_> = self
            .table
            .scan(&self.signature)
            .into_iter()
            .filter(|entry| Some(entry.pid) != managed_pid)
            .collect();

        if managed.is_some() || !strays.is_empty() {
            self.set_lifecycle(EngineLifecycle::Stopping);
        }

        if let Some(process) = managed {
            stopped |= self.terminate_managed(process, force).await;
        }

        if !strays.is_empty() {
            info!(count = strays.len(), "stopping stray engine processes");
        }
        for entry in strays {
            if self.terminate_stray(entry.pid, force).await {
                info!(pid = entry.pid, cmdline = %entry.cmdline, "stray engine process stopped");
                if let Some(metrics) = &self.metrics {
                    metrics.record_stray_terminated();
                }
                stopped = true;
            }
        }

        self.remove_pid_file();
        self.set_lifecycle(EngineLifecycle::Stopped);
        if let Some(metrics) = &self.metrics {
            metrics.set_running(false);
        }
        stopped
    }

    /// Signal the managed process group and reap the child.
    async fn terminate_managed(&self, mut process: ManagedProcess, force: bool) -> bool {
        if !matches!(process.child.try_wait(), Ok(None)) {
            debug!(pid = process.pid, "managed engine already exited");
            return false;
        }

        let first = if force {
            TermSignal::Forceful
        } else {
            TermSignal::Graceful
        };
        let group = SignalTarget::Group(process.pgid);
        if let Err(err) = self.table.signal(group, first) {
            warn!(pid = process.pid, signal = first.as_str(), error = %err, "failed to signal engine group");
        }

        match timeout(self.config.stop_timeout, process.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = process.pid, %status, "engine stopped");
                return true;
            }
            Ok(Err(err)) => {
                warn!(pid = process.pid, error = %err, "failed to wait for engine");
            }
            Err(_) => {
                warn!(
                    pid = process.pid,
                    timeout_secs = self.config.stop_timeout.as_secs(),
                    "engine ignored termination; escalating"
                );
            }
        }

        if let Err(err) = self.table.signal(group, TermSignal::Forceful) {
            warn!(pid = process.pid, error = %err, "failed to kill engine group");
        }
        match timeout(self.config.kill_timeout, process.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = process.pid, %status, "engine killed");
                true
            }
            _ => {
                error!(pid = process.pid, "engine survived SIGKILL; leaving it behind");
                false
            }
        }
    }

    /// Graceful-then-forceful termination of an unmanaged process.
    async fn terminate_stray(&self, pid: u32, force: bool) -> bool {
        let first = if force {
            TermSignal::Forceful
        } else {
            TermSignal::Graceful
        };
        match self.table.signal(SignalTarget::Process(pid), first) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return false,
            Err(err) => warn!(pid, signal = first.as_str(), error = %err, "failed to signal stray engine"),
        }
        if self.wait_for_exit(pid, self.config.stop_timeout).await {
            return true;
        }
        warn!(pid, "stray engine ignored termination; escalating");
        self.kill_stray(pid).await
    }

    async fn kill_stray(&self, pid: u32) -> bool {
        match self.table.signal(SignalTarget::Process(pid), TermSignal::Forceful) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return false,
            Err(err) => warn!(pid, error = %err, "failed to kill stray engine"),
        }
        if self.wait_for_exit(pid, self.config.kill_timeout).await {
            true
        } else {
            error!(pid, "engine process survived SIGKILL; leaving it behind");
            false
        }
    }

    async fn wait_for_exit(&self, pid: u32, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.table.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    async fn restart_with(self: &Arc<Self>, origin: RestartOrigin<'_>) -> bool {
        let guard = self.lifecycle_lock.lock().await;
        if origin.is_cancelled() {
            debug!("monitor cancelled; abandoning restart");
            return false;
        }

        let now = Instant::now();
        let verdict = {
            let book = self.book.lock();
            self.policy
                .check(book.restart_count, book.last_restart, now)
                .map(|()| book.restart_count)
        };
        let restart_count = match verdict {
            Ok(count) => count,
            Err(refusal) => {
                let err = SupervisorError::from(refusal);
                warn!(reason = refusal.as_str(), error = %err, "engine restart refused");
                self.record_restart(refusal.as_str());
                return false;
            }
        };

        info!(restart_count, "restarting engine");
        let monitor = match origin {
            RestartOrigin::Caller => self.take_monitor(),
            RestartOrigin::Monitor(_) => None,
        };

        let config_file = self.last_config.lock().clone();
        self.stop_locked(false).await;
        sleep(self.config.restart_pause).await;
        let cancelled = origin.is_cancelled();
        let config_file = config_file.as_deref();
        let started = match origin {
            _ if cancelled => {
                debug!("monitor cancelled during restart; not relaunching");
                false
            }
            RestartOrigin::Monitor(_) => self.start_locked(config_file, false).await,
            RestartOrigin::Caller => self.start_locked(config_file, true).await,
        };
        if started {
            let mut book = self.book.lock();
            book.restart_count += 1;
            book.last_restart = Some(now);
            info!(restart_count = book.restart_count, "engine restarted");
        } else {
            error!("engine restart failed");
        }
        self.record_restart(if started { "success" } else { "failure" });
        drop(guard);

        if let Some(monitor) = monitor {
            self.join_monitor(monitor).await;
        }
        started
    }

    fn ensure_monitor(self: &Arc<Self>) {
        let mut slot = self.monitor.lock();
        if let Some(handle) = slot.as_ref() {
            if !handle.task.is_finished() {
                return;
            }
        }
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(monitor_loop(
            Arc::downgrade(self),
            self.config.monitor_interval,
            cancel_rx,
        ));
        *slot = Some(MonitorHandle { cancel, task });
    }

    /// Detach the monitor and signal it to stop.
    fn take_monitor(&self) -> Option<MonitorHandle> {
        let handle = self.monitor.lock().take()?;
        let _ = handle.cancel.send(true);
        Some(handle)
    }

    async fn join_monitor(&self, handle: MonitorHandle) {
        let MonitorHandle { cancel, mut task } = handle;
        if timeout(self.config.monitor_join_timeout, &mut task)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.monitor_join_timeout.as_secs(),
                "health monitor did not stop in time; aborting it"
            );
            task.abort();
        }
        drop(cancel);
    }

    fn managed_pid(&self) -> Option<u32> {
        let mut process = self.process.lock();
        let managed = process.as_mut()?;
        matches!(managed.child.try_wait(), Ok(None)).then_some(managed.pid)
    }

    fn set_lifecycle(&self, next: EngineLifecycle) {
        let mut current = self.lifecycle.lock();
        let previous = *current;
        if previous != next {
            debug!(from = %previous, to = %next, "engine lifecycle transition");
            *current = next;
        }
    }

    fn write_pid_file(&self, pid: u32) {
        let Some(path) = &self.config.pid_file else {
            return;
        };
        if let Err(err) = std::fs::write(path, format!("{}\n", pid)) {
            warn!(path = %path.display(), error = %err, "failed to write engine pid file");
        }
    }

    fn remove_pid_file(&self) {
        let Some(path) = &self.config.pid_file else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove engine pid file"),
        }
    }

    fn record_start(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_start(outcome);
        }
    }

    fn record_restart(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_restart(outcome);
        }
    }

    /// Path of the configured PID file, if any.
    pub fn pid_file(&self) -> Option<&PathBuf> {
        self.config.pid_file.as_ref()
    }
}

impl fmt::Debug for EngineSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSupervisor")
            .field("entrypoint", &self.config.entrypoint)
            .field("lifecycle", &self.lifecycle())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

async fn monitor_loop(
    weak: Weak<EngineSupervisor>,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "engine health monitor started");
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
        }
        if *cancel.borrow() {
            break;
        }
        let Some(supervisor) = weak.upgrade() else {
            break;
        };
        if supervisor.is_running() {
            continue;
        }

        warn!("engine process died unexpectedly");
        if !supervisor.config.auto_restart {
            error!("auto-restart disabled; engine health monitoring halted");
            supervisor.set_lifecycle(EngineLifecycle::Halted);
            break;
        }
        if supervisor
            .restart_with(RestartOrigin::Monitor(&cancel))
            .await
        {
            info!("engine automatically restarted");
            continue;
        }
        if *cancel.borrow() {
            break;
        }
        error!("automatic engine restart failed; engine health monitoring halted");
        supervisor.set_lifecycle(EngineLifecycle::Halted);
        break;
    }
    info!("engine health monitor stopped");
}
