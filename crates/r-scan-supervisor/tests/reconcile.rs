//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "tests"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Stray reconciliation and restart bookkeeping against a scripted process table."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus::{Encoder, TextEncoder};
use r_scan_common::EngineConfig;
use r_scan_metrics::new_registry;
use r_scan_supervisor::{
    EngineLifecycle, EngineSignature, EngineSupervisor, ProcessEntry, ProcessStats, ProcessTable,
    SignalTarget, SupervisorMetrics, TermSignal,
};

/// In-memory process table. `stubborn` pids ignore SIGTERM, `immune` pids
/// ignore everything.
#[derive(Default)]
struct FakeTable {
    alive: Mutex<BTreeMap<u32, String>>,
    stubborn: BTreeSet<u32>,
    immune: BTreeSet<u32>,
    signals: Mutex<Vec<(SignalTarget, TermSignal)>>,
}

impl FakeTable {
    fn with_engines(pids: &[u32]) -> Self {
        let alive = pids
            .iter()
            .map(|pid| (*pid, format!("python3 multi_rx.py -c cfg.json --instance {}", pid)))
            .collect();
        Self {
            alive: Mutex::new(alive),
            ..Self::default()
        }
    }

    fn signals(&self) -> Vec<(SignalTarget, TermSignal)> {
        self.signals.lock().clone()
    }
}

impl ProcessTable for FakeTable {
    fn scan(&self, signature: &EngineSignature) -> Vec<ProcessEntry> {
        self.alive
            .lock()
            .iter()
            .filter(|(_, cmdline)| signature.matches("python3", cmdline))
            .map(|(pid, cmdline)| ProcessEntry {
                pid: *pid,
                name: "python3".to_owned(),
                cmdline: cmdline.clone(),
            })
            .collect()
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().contains_key(&pid)
    }

    fn signal(&self, target: SignalTarget, signal: TermSignal) -> io::Result<()> {
        self.signals.lock().push((target, signal));
        let pid = match target {
            SignalTarget::Process(pid) | SignalTarget::Group(pid) => pid,
        };
        let mut alive = self.alive.lock();
        if !alive.contains_key(&pid) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such process"));
        }
        let survives = self.immune.contains(&pid)
            || (signal == TermSignal::Graceful && self.stubborn.contains(&pid));
        if !survives {
            alive.remove(&pid);
        }
        Ok(())
    }

    fn stats(&self, pid: u32) -> Option<ProcessStats> {
        self.alive.lock().contains_key(&pid).then(|| ProcessStats {
            cpu_percent: 12.5,
            rss_mib: 48.0,
            started_at: None,
            uptime: Duration::from_secs(90),
        })
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        install_dir: PathBuf::from("/nonexistent/op25/apps"),
        config_file: PathBuf::from("/nonexistent/op25/apps/cfg.json"),
        ..EngineConfig::default()
    }
}

fn supervisor(table: Arc<FakeTable>) -> Arc<EngineSupervisor> {
    EngineSupervisor::with_table(engine_config(), table, None)
}

#[tokio::test(start_paused = true)]
async fn stop_terminates_every_stray() {
    let table = Arc::new(FakeTable::with_engines(&[4101, 4102]));
    let supervisor = supervisor(table.clone());
    assert!(supervisor.is_running());

    assert!(supervisor.stop(false).await);
    assert!(!supervisor.is_running());
    assert_eq!(supervisor.lifecycle(), EngineLifecycle::Stopped);
    assert_eq!(
        table.signals(),
        vec![
            (SignalTarget::Process(4101), TermSignal::Graceful),
            (SignalTarget::Process(4102), TermSignal::Graceful),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stubborn_stray_is_escalated_to_sigkill() {
    let table = Arc::new(FakeTable {
        stubborn: BTreeSet::from([4201]),
        ..FakeTable::with_engines(&[4201])
    });
    let supervisor = supervisor(table.clone());

    assert!(supervisor.stop(false).await);
    assert!(!supervisor.is_running());
    assert_eq!(
        table.signals(),
        vec![
            (SignalTarget::Process(4201), TermSignal::Graceful),
            (SignalTarget::Process(4201), TermSignal::Forceful),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn unkillable_stray_reports_nothing_stopped() {
    let table = Arc::new(FakeTable {
        immune: BTreeSet::from([4301]),
        ..FakeTable::with_engines(&[4301])
    });
    let supervisor = supervisor(table);

    assert!(!supervisor.stop(false).await);
    assert!(supervisor.is_running());
    assert_eq!(supervisor.lifecycle(), EngineLifecycle::Stopped);
}

#[tokio::test]
async fn stop_with_nothing_running_is_a_no_op() {
    let table = Arc::new(FakeTable::default());
    let supervisor = supervisor(table.clone());
    assert!(!supervisor.stop(true).await);
    assert!(table.signals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn kill_all_counts_confirmed_deaths() {
    let table = Arc::new(FakeTable {
        immune: BTreeSet::from([4402]),
        ..FakeTable::with_engines(&[4401, 4402, 4403])
    });
    let supervisor = supervisor(table.clone());

    assert_eq!(supervisor.kill_all().await, 2);
    assert!(table
        .signals()
        .iter()
        .all(|(_, signal)| *signal == TermSignal::Forceful));
}

#[test]
fn status_describes_discovered_engine() {
    let table = Arc::new(FakeTable::with_engines(&[4501]));
    let supervisor = supervisor(table);

    let status = supervisor.status();
    assert!(status.running);
    assert!(!status.managed);
    assert_eq!(status.pid, Some(4501));
    assert_eq!(status.cpu_percent, Some(12.5));
    assert_eq!(status.memory_mib, Some(48.0));
    assert_eq!(status.uptime_secs, Some(90));
    assert_eq!(status.restart_count, 0);
}

#[test]
fn status_without_engine_keeps_restart_count() {
    let supervisor = supervisor(Arc::new(FakeTable::default()));
    let status = supervisor.status();
    assert!(!status.running);
    assert_eq!(status.pid, None);
    assert_eq!(status.cpu_percent, None);
    assert_eq!(status.restart_count, 0);
    assert_eq!(status.lifecycle, EngineLifecycle::Stopped);

    let encoded = serde_json::to_value(&status).expect("status serialises");
    assert_eq!(encoded["lifecycle"], "stopped");
}

#[tokio::test]
async fn start_adopts_running_instance_without_launching() {
    let table = Arc::new(FakeTable::with_engines(&[4601]));
    let supervisor = supervisor(table.clone());

    // The configured engine file does not exist, so a real launch would fail.
    assert!(supervisor.start(None).await);
    assert_eq!(supervisor.lifecycle(), EngineLifecycle::Running);
    assert!(table.signals().is_empty());
}

#[tokio::test]
async fn start_without_config_file_fails() {
    let supervisor = supervisor(Arc::new(FakeTable::default()));
    assert!(!supervisor.start(None).await);
    assert!(
        !supervisor
            .start(Some(std::path::Path::new("missing-trunk.json")))
            .await
    );
    assert_eq!(supervisor.lifecycle(), EngineLifecycle::Stopped);
}

#[tokio::test]
async fn restart_ceiling_is_recorded() {
    let registry = new_registry();
    let metrics = SupervisorMetrics::new(registry.clone()).expect("metrics register");
    let config = EngineConfig {
        max_restarts: 0,
        ..engine_config()
    };
    let supervisor =
        EngineSupervisor::with_table(config, Arc::new(FakeTable::default()), Some(metrics));

    assert!(!supervisor.restart().await);
    assert_eq!(supervisor.restart_count(), 0);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .expect("encode metrics");
    let exposition = String::from_utf8(buffer).expect("utf8 exposition");
    assert!(exposition.contains(r#"r_scan_supervisor_restarts_total{outcome="limit_reached"} 1"#));
}
