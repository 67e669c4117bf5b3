use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use ekolenz_detect::config::{EngineKind, LoopConfig};
use ekolenz_detect::{BoundingBox, Detection};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EKOLENZ_CONFIG",
        "EKOLENZ_CAMERA_URL",
        "EKOLENZ_ENGINE",
        "EKOLENZ_MODEL_PATH",
        "EKOLENZ_MIN_INTERVAL_MS",
        "EKOLENZ_PRIVILEGED_CLASSES",
        "EKOLENZ_UPLOAD_URL",
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
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = LoopConfig::load().expect("load defaults");

    assert_eq!(cfg.camera_url, "stub://camera");
    assert_eq!(cfg.engine.kind, EngineKind::Stub);
    assert_eq!(cfg.loop_settings.min_interval, Duration::from_millis(500));
    assert_eq!(cfg.loop_settings.success_delay, Duration::from_millis(100));
    assert_eq!(cfg.loop_settings.backoff, Duration::from_millis(1000));
    assert_eq!(cfg.loop_settings.capture.quality, 50);
    assert!(cfg.loop_settings.capture.skip_post_processing);
    assert_eq!(cfg.loop_settings.target_width, 300);
    assert_eq!(cfg.thresholds.classes.privileged, 0.3);
    assert_eq!(cfg.thresholds.classes.person, 0.7);
    assert_eq!(cfg.thresholds.classes.default, 0.5);
    assert_eq!(cfg.thresholds.privileged_classes, vec!["bottle", "cup"]);
    assert!(cfg.upload_url.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "camera": {
                "url": "stub://kitchen",
                "quality": 80,
                "skip_post_processing": false
            },
            "preprocess": { "target_width": 320 },
            "timing": {
                "min_interval_ms": 750,
                "success_delay_ms": 50,
                "backoff_ms": 2000
            },
            "thresholds": {
                "privileged": 0.25,
                "person": 0.8,
                "overlap_ratio": 0.2,
                "privileged_classes": ["bottle", "cup", "can"]
            },
            "engine": {
                "kind": "tract",
                "model_path": "/models/ssd.onnx",
                "input_width": 320,
                "input_height": 320
            },
            "overlay": { "display_width": 720 },
            "upload": { "url": "https://collect.example.com/photos" }
        }"#,
    );

    std::env::set_var("EKOLENZ_CONFIG", file.path());
    std::env::set_var("EKOLENZ_CAMERA_URL", "stub://garage");
    std::env::set_var("EKOLENZ_MIN_INTERVAL_MS", "900");
    std::env::set_var("EKOLENZ_PRIVILEGED_CLASSES", " Bottle , glass ,");

    let cfg = LoopConfig::load().expect("load config");

    assert_eq!(cfg.camera_url, "stub://garage");
    assert_eq!(cfg.loop_settings.capture.quality, 80);
    assert!(!cfg.loop_settings.capture.skip_post_processing);
    assert_eq!(cfg.loop_settings.target_width, 320);
    assert_eq!(cfg.loop_settings.min_interval, Duration::from_millis(900));
    assert_eq!(cfg.loop_settings.success_delay, Duration::from_millis(50));
    assert_eq!(cfg.loop_settings.backoff, Duration::from_millis(2000));
    assert_eq!(cfg.thresholds.classes.privileged, 0.25);
    assert_eq!(cfg.thresholds.classes.person, 0.8);
    assert_eq!(cfg.thresholds.classes.default, 0.5);
    assert_eq!(cfg.thresholds.overlap_ratio, 0.2);
    assert_eq!(cfg.thresholds.privileged_classes, vec!["bottle", "glass"]);
    assert_eq!(cfg.engine.kind, EngineKind::Tract);
    assert_eq!(cfg.engine.model_path, Some(PathBuf::from("/models/ssd.onnx")));
    assert_eq!(cfg.engine.input_width, 320);
    assert_eq!(cfg.display_width, 720);
    assert_eq!(
        cfg.upload_url.as_deref(),
        Some("https://collect.example.com/photos")
    );

    clear_env();
}

#[test]
fn configured_thresholds_reach_the_post_processor() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("EKOLENZ_PRIVILEGED_CLASSES", "can");
    let cfg = LoopConfig::load().expect("load config");
    let processor = cfg.thresholds.post_processor();

    let kept = processor.process(vec![
        Detection::new("cup", 0.4, BoundingBox::new(0.0, 0.0, 5.0, 5.0)),
        Detection::new("can", 0.4, BoundingBox::new(10.0, 0.0, 5.0, 5.0)),
    ]);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_label, "can");

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for json in [
        r#"{ "thresholds": { "person": 1.5 } }"#,
        r#"{ "thresholds": { "overlap_ratio": -0.1 } }"#,
        r#"{ "thresholds": { "privileged_classes": [] } }"#,
        r#"{ "thresholds": { "privileged_classes": ["person"] } }"#,
        r#"{ "camera": { "quality": 0 } }"#,
        r#"{ "preprocess": { "target_width": 0 } }"#,
        r#"{ "timing": { "backoff_ms": 0 } }"#,
        r#"{ "engine": { "kind": "tract" } }"#,
        r#"{ "engine": { "kind": "tflite" } }"#,
        r#"{ "overlay": { "display_width": 0 } }"#,
    ] {
        let file = write_config(json);
        std::env::set_var("EKOLENZ_CONFIG", file.path());
        assert!(LoopConfig::load().is_err(), "accepted {}", json);
    }

    clear_env();
}

#[test]
fn rejects_bad_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("EKOLENZ_MIN_INTERVAL_MS", "soon");
    assert!(LoopConfig::load().is_err());
    std::env::remove_var("EKOLENZ_MIN_INTERVAL_MS");

    std::env::set_var("EKOLENZ_ENGINE", "coreml");
    assert!(LoopConfig::load().is_err());
    std::env::remove_var("EKOLENZ_ENGINE");

    std::env::set_var("EKOLENZ_CONFIG", "/nonexistent/ekolenz.json");
    assert!(LoopConfig::load().is_err());

    clear_env();
}

#[test]
fn from_path_ignores_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "camera": { "url": "stub://file" } }"#);
    std::env::set_var("EKOLENZ_CAMERA_URL", "stub://env");
    let cfg = LoopConfig::from_path(file.path()).expect("load from path");
    assert_eq!(cfg.camera_url, "stub://file");

    clear_env();
}

#[test]
fn builds_a_runnable_loop_from_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = LoopConfig::load().expect("load defaults");
    let sink = ekolenz_detect::LatestBatch::new();
    let mut controller = cfg
        .build_loop(std::sync::Arc::new(sink.clone()))
        .expect("build loop");
    assert!(!controller.engine_ready());
    controller.load_engine().expect("load stub engine");
    controller.run_cycle();
    let batch = sink.latest().expect("published batch");
    assert!(batch.detections.iter().any(|d| d.class_label == "bottle"));

    clear_env();
}
