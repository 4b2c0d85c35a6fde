use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use mocap_rig::config::RigConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOCAP_CONFIG",
        "MOCAP_SOURCE",
        "MOCAP_CALIBRATION",
        "MOCAP_THRESHOLD",
        "MOCAP_EXPOSURE",
        "MOCAP_GAIN",
        "MOCAP_CYCLE_HZ",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        calibration_path = "/etc/mocap/params.json"
        cycle_hz = 30

        [capture]
        source = "v4l2:///dev/video0,/dev/video2"
        fps = 60
        width = 640
        height = 480
        yield_ms = 2

        [detection]
        threshold = 210
        strict = true
        min_area = 4.0

        [matcher]
        top_row_len = 5
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("MOCAP_CONFIG", file.path());
    std::env::set_var("MOCAP_THRESHOLD", "180");
    std::env::set_var("MOCAP_GAIN", "4");

    let cfg = RigConfig::load().expect("load config");

    assert_eq!(cfg.calibration_path.to_str(), Some("/etc/mocap/params.json"));
    assert_eq!(cfg.cycle_hz, 30);
    assert_eq!(cfg.capture.source, "v4l2:///dev/video0,/dev/video2");
    assert_eq!(cfg.capture.fps, 60);
    assert_eq!((cfg.capture.width, cfg.capture.height), (640, 480));
    assert_eq!(cfg.capture.yield_interval, Duration::from_millis(2));
    assert_eq!(cfg.capture.exposure, 100);
    assert_eq!(cfg.capture.gain, 4);
    assert_eq!(cfg.detection.threshold, 180);
    assert!(cfg.detection.strict);
    assert_eq!(cfg.detection.min_area, 4.0);
    assert_eq!(cfg.detection.max_area, 500.0);
    assert_eq!(cfg.matcher.top_row_len, 5);
    assert_eq!(cfg.matcher.min_points, 8);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("MOCAP_SOURCE", "stub://4");

    let cfg = RigConfig::load().expect("load config");
    assert_eq!(cfg.capture.source, "stub://4");
    assert_eq!(cfg.detection.threshold, 200);
    assert!(cfg.detection.enabled);
    assert_eq!(cfg.cycle_interval(), Duration::from_millis(50));

    clear_env();
}

#[test]
fn rejects_out_of_range_threshold_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("MOCAP_THRESHOLD", "256");
    assert!(RigConfig::load().is_err());

    std::env::set_var("MOCAP_THRESHOLD", "150");
    std::env::set_var("MOCAP_CYCLE_HZ", "0");
    assert!(RigConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("MOCAP_CONFIG", "/nonexistent/mocap.toml");
    assert!(RigConfig::load().is_err());
    clear_env();
}
