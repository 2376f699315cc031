use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use muster::config::MusterConfig;
use muster::SourceSpec;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MUSTER_CONFIG",
        "MUSTER_DB_PATH",
        "MUSTER_MODEL_PATH",
        "MUSTER_SOURCE",
        "MUSTER_FONT_PATH",
        "MUSTER_FRAME_INTERVAL_MS",
        "MUSTER_MIN_CONFIDENCE",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MusterConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "muster.db");
    assert_eq!(cfg.model_path, PathBuf::from("models/best.onnx"));
    assert_eq!(cfg.source, SourceSpec::Camera("/dev/video0".to_string()));
    assert_eq!(cfg.source_settings.width, 640);
    assert_eq!(cfg.source_settings.height, 480);
    assert_eq!(cfg.capture.frame_interval, Duration::from_millis(33));
    assert_eq!(cfg.capture.teardown_delay, Duration::from_millis(200));
    assert!((cfg.detector.model_confidence - 0.25).abs() < 1e-6);
    assert!((cfg.detector.iou_threshold - 0.45).abs() < 1e-6);
    assert_eq!(cfg.min_confidence, None);
    assert_eq!(cfg.classifier().min_confidence(), None);
    assert!(cfg.font_path.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "db_path": "bridge.db",
            "model": {
                "path": "models/ppe.onnx",
                "labels_path": "models/ppe.txt",
                "confidence": 0.3,
                "iou_threshold": 0.5,
                "input_size": 320
            },
            "source": {
                "spec": "stub://gangway",
                "width": 320,
                "height": 240,
                "target_fps": 15
            },
            "capture": {
                "frame_interval_ms": 50,
                "teardown_delay_ms": 100
            },
            "classifier": {
                "min_confidence": 0.4
            }
        }"#,
    );

    std::env::set_var("MUSTER_CONFIG", file.path());
    std::env::set_var("MUSTER_DB_PATH", "override.db");
    std::env::set_var("MUSTER_FRAME_INTERVAL_MS", "40");

    let cfg = MusterConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.model_path, PathBuf::from("models/ppe.onnx"));
    assert_eq!(cfg.detector.labels_path, Some(PathBuf::from("models/ppe.txt")));
    assert_eq!(cfg.detector.input_size, 320);
    assert_eq!(cfg.source, SourceSpec::Synthetic("gangway".to_string()));
    assert_eq!(cfg.source_settings.target_fps, 15);
    assert_eq!(cfg.capture.frame_interval, Duration::from_millis(40));
    assert_eq!(cfg.capture.teardown_delay, Duration::from_millis(100));
    assert_eq!(cfg.min_confidence, Some(0.4));

    clear_env();
}

#[test]
fn env_source_and_confidence_floor() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MUSTER_SOURCE", "/dev/video2");
    std::env::set_var("MUSTER_MIN_CONFIDENCE", "0.5");
    std::env::set_var("MUSTER_MODEL_PATH", "/opt/muster/best.onnx");

    let cfg = MusterConfig::load().expect("load config");
    assert_eq!(cfg.source, SourceSpec::Camera("/dev/video2".to_string()));
    assert_eq!(cfg.classifier().min_confidence(), Some(0.5));
    assert_eq!(cfg.model_path, PathBuf::from("/opt/muster/best.onnx"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MUSTER_FRAME_INTERVAL_MS", "fast");
    assert!(MusterConfig::load().is_err());
    clear_env();

    std::env::set_var("MUSTER_MIN_CONFIDENCE", "1.5");
    assert!(MusterConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "source": { "width": 0 } }"#);
    std::env::set_var("MUSTER_CONFIG", file.path());
    assert!(MusterConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "db_path": 42 }"#);
    std::env::set_var("MUSTER_CONFIG", file.path());
    assert!(MusterConfig::load().is_err());
    clear_env();

    std::env::set_var("MUSTER_SOURCE", "rtsp://camera-1");
    assert!(MusterConfig::load().is_err());
    clear_env();
}

#[test]
fn annotator_draws_text_only_with_a_font() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MusterConfig::load().expect("load config");
    let annotator = cfg.annotator().expect("fontless annotator");
    assert!(!annotator.has_font());

    std::env::set_var("MUSTER_FONT_PATH", "/nonexistent/fonts/DejaVuSans.ttf");
    let cfg = MusterConfig::load().expect("load config");
    assert_eq!(
        cfg.font_path,
        Some(PathBuf::from("/nonexistent/fonts/DejaVuSans.ttf"))
    );
    assert!(cfg.annotator().is_err());

    clear_env();
}
