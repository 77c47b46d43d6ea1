//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "tests"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Lifecycle checks against real shell-script engines."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
#![cfg(target_os = "linux")]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use r_scan_common::EngineConfig;
use r_scan_supervisor::{
    EngineLifecycle, EngineSupervisor, ProcFsTable, ProcessTable, SignalTarget, TermSignal,
};
use tempfile::TempDir;

const LONG_RUNNING: &str = "echo \"engine up $*\"\nwhile :; do sleep 1; done\n";

struct Install {
    dir: TempDir,
    config: EngineConfig,
}

fn install(script: &str) -> Install {
    let dir = tempfile::tempdir().expect("tempdir");
    let entrypoint = dir.path().join("engine.sh");
    std::fs::write(&entrypoint, script).expect("write engine script");
    std::fs::write(dir.path().join("cfg.json"), b"{}").expect("write engine config");

    let config = EngineConfig {
        install_dir: dir.path().to_path_buf(),
        interpreter: "sh".to_owned(),
        entrypoint: entrypoint.display().to_string(),
        config_file: PathBuf::from("cfg.json"),
        signature: vec![dir.path().display().to_string()],
        settle_interval: Duration::from_millis(200),
        stop_timeout: Duration::from_secs(2),
        kill_timeout: Duration::from_secs(2),
        restart_pause: Duration::from_millis(10),
        base_cooldown: Duration::ZERO,
        max_cooldown: Duration::ZERO,
        echo_output: false,
        ..EngineConfig::default()
    };
    Install { dir, config }
}

async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn start_and_stop_manage_pid_file() {
    let mut install = install(LONG_RUNNING);
    let pid_file = install.dir.path().join("engine.pid");
    install.config.pid_file = Some(pid_file.clone());
    let supervisor = EngineSupervisor::new(install.config.clone());

    assert!(supervisor.start(None).await);
    assert!(supervisor.is_running());
    assert_eq!(supervisor.lifecycle(), EngineLifecycle::Running);

    let status = supervisor.status();
    assert!(status.managed);
    let pid = status.pid.expect("managed pid");
    let recorded = std::fs::read_to_string(&pid_file).expect("pid file written");
    assert_eq!(recorded.trim(), pid.to_string());

    let logged = eventually(Duration::from_secs(2), || {
        let supervisor = Arc::clone(&supervisor);
        async move {
            supervisor
                .logs(10)
                .iter()
                .any(|line| line.starts_with("engine up -c"))
        }
    })
    .await;
    assert!(logged, "engine output captured: {:?}", supervisor.logs(10));

    // A second start is a no-op while the engine runs.
    assert!(supervisor.start(None).await);
    assert_eq!(supervisor.status().pid, Some(pid));

    assert!(supervisor.stop(false).await);
    assert!(!supervisor.is_running());
    assert!(!pid_file.exists());
    assert_eq!(supervisor.lifecycle(), EngineLifecycle::Stopped);
}

#[tokio::test]
async fn early_exit_reports_engine_output() {
    let install = install("echo boom >&2\nexit 3\n");
    let supervisor = EngineSupervisor::new(install.config.clone());

    assert!(!supervisor.start(None).await);
    assert!(!supervisor.is_running());
    assert_eq!(supervisor.lifecycle(), EngineLifecycle::Stopped);
    assert!(supervisor.logs(5).iter().any(|line| line == "boom"));
}

#[tokio::test]
async fn restart_respects_cooldown() {
    let mut install = install(LONG_RUNNING);
    install.config.base_cooldown = Duration::from_secs(30);
    install.config.max_cooldown = Duration::from_secs(300);
    let supervisor = EngineSupervisor::new(install.config.clone());

    assert!(supervisor.start(None).await);
    let first = supervisor.status().pid;
    assert!(supervisor.restart().await);
    assert_eq!(supervisor.restart_count(), 1);
    assert_ne!(supervisor.status().pid, first);

    assert!(!supervisor.restart().await);
    assert_eq!(supervisor.restart_count(), 1);
    assert!(supervisor.is_running());

    supervisor.stop(true).await;
}

#[tokio::test]
async fn restart_ceiling_clears_on_reset() {
    let mut install = install(LONG_RUNNING);
    install.config.max_restarts = 2;
    let supervisor = EngineSupervisor::new(install.config.clone());

    assert!(supervisor.start(None).await);
    assert!(supervisor.restart().await);
    assert!(supervisor.restart().await);
    assert_eq!(supervisor.restart_count(), 2);

    assert!(!supervisor.restart().await);
    assert_eq!(supervisor.restart_count(), 2);

    supervisor.reset_restart_count().await;
    assert_eq!(supervisor.restart_count(), 0);
    assert!(supervisor.restart().await);
    assert_eq!(supervisor.restart_count(), 1);

    supervisor.stop(false).await;
}

#[tokio::test]
async fn restart_reuses_launch_config() {
    let install = install(LONG_RUNNING);
    std::fs::rename(
        install.dir.path().join("cfg.json"),
        install.dir.path().join("alt.json"),
    )
    .expect("move engine config");
    let supervisor = EngineSupervisor::new(install.config.clone());

    assert!(!supervisor.start(None).await);
    assert!(supervisor.start(Some(Path::new("alt.json"))).await);

    assert!(supervisor.restart().await);
    assert!(supervisor.is_running());
    assert_eq!(supervisor.restart_count(), 1);
    let relaunched = eventually(Duration::from_secs(2), || {
        let supervisor = Arc::clone(&supervisor);
        async move {
            supervisor
                .logs(10)
                .iter()
                .filter(|line| line.ends_with("alt.json"))
                .count()
                >= 2
        }
    })
    .await;
    assert!(relaunched, "engine output: {:?}", supervisor.logs(10));

    supervisor.stop(false).await;
}

#[tokio::test]
async fn monitor_restarts_dead_engine() {
    let mut install = install(LONG_RUNNING);
    install.config.monitor_interval = Duration::from_millis(200);
    let supervisor = EngineSupervisor::new(install.config.clone());

    assert!(supervisor.start(None).await);
    let pid = supervisor.status().pid.expect("managed pid");
    ProcFsTable::new()
        .signal(SignalTarget::Group(pid), TermSignal::Forceful)
        .expect("kill engine group");

    let recovered = eventually(Duration::from_secs(10), || {
        let supervisor = Arc::clone(&supervisor);
        async move {
            let status = supervisor.status();
            supervisor.restart_count() == 1 && status.managed && status.pid != Some(pid)
        }
    })
    .await;
    assert!(recovered, "engine not restarted: {:?}", supervisor.status());

    assert!(supervisor.stop(false).await);
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn monitor_halts_without_auto_restart() {
    let mut install = install(LONG_RUNNING);
    install.config.monitor_interval = Duration::from_millis(200);
    install.config.auto_restart = false;
    let supervisor = EngineSupervisor::new(install.config.clone());

    assert!(supervisor.start(None).await);
    let pid = supervisor.status().pid.expect("managed pid");
    ProcFsTable::new()
        .signal(SignalTarget::Group(pid), TermSignal::Forceful)
        .expect("kill engine group");

    let halted = eventually(Duration::from_secs(5), || {
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.lifecycle() == EngineLifecycle::Halted }
    })
    .await;
    assert!(halted);
    assert_eq!(supervisor.restart_count(), 0);
    assert!(!supervisor.is_running());
}

#[tokio::test]
async fn stray_instance_is_adopted_then_stopped() {
    let install = install(LONG_RUNNING);
    let mut stray = std::process::Command::new("sh")
        .arg(&install.config.entrypoint)
        .arg("-c")
        .arg(install.dir.path().join("cfg.json"))
        .stdout(std::process::Stdio::null())
        .spawn()
        .expect("spawn stray engine");
    let supervisor = EngineSupervisor::new(install.config.clone());

    let visible = eventually(Duration::from_secs(2), || {
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.is_running() }
    })
    .await;
    assert!(visible);
    assert!(supervisor.start(None).await);
    let status = supervisor.status();
    assert!(!status.managed);
    assert_eq!(status.pid, Some(stray.id()));

    assert!(supervisor.stop(false).await);
    assert!(!supervisor.is_running());
    stray.wait().expect("reap stray");
}
