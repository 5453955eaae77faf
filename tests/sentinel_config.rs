use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use traffic_sentinel::config::DetectorKind;
use traffic_sentinel::{error_kind, ErrorKind, OnQuotaExhausted, PipelineConfig, SnapshotLayout};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_MAX_SNAPSHOTS",
        "SENTINEL_CONFIDENCE_THRESHOLD",
        "SENTINEL_CONTAINMENT_TOLERANCE_PX",
        "SENTINEL_OUTPUT_ROOT",
        "SENTINEL_SNAPSHOT_ROOT",
        "SENTINEL_DB_PATH",
        "SENTINEL_ON_QUOTA",
        "SENTINEL_DETECTOR",
        "SENTINEL_MODEL_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "max_snapshots": 3,
        "confidence_threshold": 0.6,
        "output_root": "runs/output",
        "snapshot_layout": "flat",
        "db_path": "runs/violations.db",
        "detector": { "kind": "replay", "detections_path": "runs/detections.json" },
        "lane": { "restricted_zones": [[[0, 200], [640, 200], [640, 480], [0, 480]]] },
        "signal": {
            "stop_line": { "start": [0, 300], "end": [640, 300] },
            "red_phases": [{ "start_s": 0.0, "end_s": 12.5 }]
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_MAX_SNAPSHOTS", "7");
    std::env::set_var("SENTINEL_ON_QUOTA", "stop");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.max_snapshots, 7);
    assert_eq!(cfg.confidence_threshold, 0.6);
    assert_eq!(cfg.output_root, PathBuf::from("runs/output"));
    assert_eq!(cfg.snapshot_layout, SnapshotLayout::Flat);
    assert_eq!(cfg.db_path, "runs/violations.db");
    assert_eq!(cfg.on_quota_exhausted, OnQuotaExhausted::Stop);
    assert_eq!(cfg.detector.kind, DetectorKind::Replay);
    assert_eq!(
        cfg.detector.detections_path,
        Some(PathBuf::from("runs/detections.json"))
    );
    assert_eq!(cfg.lane.restricted_zones.len(), 1);
    assert!(cfg.signal.stop_line.is_some());
    assert!(cfg.signal.red_phases[0].contains(12.0));

    clear_env();
}

#[test]
fn explicit_path_ignores_config_env_var() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(b"max_snapshots = 2\ncontainment_tolerance_px = 12\n")
        .expect("write config");
    std::env::set_var("SENTINEL_CONFIG", "/definitely/not/here.json");

    let cfg = PipelineConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.max_snapshots, 2);
    assert_eq!(cfg.containment_tolerance_px, 12);

    clear_env();
}

#[test]
fn invalid_env_override_is_a_configuration_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_MAX_SNAPSHOTS", "many");
    let err = PipelineConfig::load_from(None).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Configuration));

    std::env::set_var("SENTINEL_MAX_SNAPSHOTS", "0");
    let err = PipelineConfig::load_from(None).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Configuration));

    clear_env();
}

#[test]
fn missing_config_file_is_a_configuration_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let err = PipelineConfig::load_from(Some(dir.path().join("absent.toml").as_path())).unwrap_err();
    assert_eq!(error_kind(&err), Some(ErrorKind::Configuration));

    clear_env();
}
