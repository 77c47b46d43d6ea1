//! ---
//! rscan_section: "06-testing"
//! rscan_subsection: "integration-tests"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Configuration loading checks for the R-SCAN workspace."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use r_scan_common::{AppConfig, LogFormat};
use r_scan_supervisor::{EngineSignature, RestartPolicy};

fn repo_path(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

#[test]
fn reference_config_loads_with_frontmatter() {
    let path = repo_path("configs/r-scan.toml");
    let raw = fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", path.display(), err));
    assert!(raw.starts_with("# ---"), "reference config must carry frontmatter");

    let config: AppConfig = raw.parse().expect("reference config parses");
    assert_eq!(config.engine.entrypoint, "multi_rx.py");
    assert_eq!(config.engine.settle_interval, Duration::from_secs(2));
    assert_eq!(config.telemetry.poll_interval, Duration::from_millis(500));
    assert_eq!(config.telemetry.max_errors, 5);
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert!(!config.metrics.enabled);

    let policy = RestartPolicy::from_config(&config.engine);
    assert_eq!(policy.cooldown(0), Duration::from_secs(30));
    assert_eq!(policy.max_restarts, 5);

    let signature = EngineSignature::from_config(&config.engine);
    assert!(signature.matches("python3", "python3 /opt/op25/apps/multi_rx.py -c cfg.json"));
}

#[test]
fn first_existing_candidate_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("present.toml");
    fs::write(
        &present,
        "[telemetry]\nport = 9090\nsystem_name = \"County Simulcast\"\n",
    )
    .expect("write config");

    let loaded = AppConfig::load_with_source(&[missing, present.clone()]).expect("config loads");
    assert_eq!(loaded.source, present);
    assert_eq!(loaded.config.telemetry.port, 9090);
    assert_eq!(loaded.config.telemetry.system_name, "County Simulcast");
    assert_eq!(loaded.config.telemetry.base_url(), "http://127.0.0.1:9090/");
}

#[test]
fn missing_candidates_are_listed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let candidate = dir.path().join("absent.toml");
    let err = AppConfig::load_with_source(&[candidate.clone()]).unwrap_err();
    assert!(err.to_string().contains(&candidate.display().to_string()));
}

#[test]
fn invalid_values_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[engine]\nsignature = [\" \"]\n").expect("write config");

    let err = AppConfig::load(&[path]).unwrap_err();
    assert!(format!("{:#}", err).contains("engine.signature"));
}
