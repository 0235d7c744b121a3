use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use sartrainer::AppConfig;

// Environment overrides are process-global; serialize the tests that
// touch them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SARTRAINER_VIDEO_SOURCE",
        "SARTRAINER_JOYSTICK_INDEX",
        "SARTRAINER_OUTPUT_DIR",
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
        "video": {
            "source": "rtsp://drone-cam/stream",
            "width": 1920,
            "height": 1080,
            "fps": 25,
            "reconnect_delay_ms": 1500
        },
        "joystick": {
            "device_index": 1,
            "deadzone": 0.15,
            "sensitivity": 1.2,
            "invert_tilt": true,
            "axis_mapping": {"pan": 3, "tilt": 4, "zoom": 2},
            "button_mapping": {"record_toggle": 5, "snapshot": 6}
        },
        "recording": {
            "enabled": false,
            "output_dir": "/tmp/sar-sessions",
            "format": "avi",
            "codec": "mjpg",
            "include_overlay": false
        },
        "window": {
            "title": "Drill Feed",
            "fullscreen": true
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SARTRAINER_VIDEO_SOURCE", "stub://override");
    std::env::set_var("SARTRAINER_JOYSTICK_INDEX", "3");

    let config = AppConfig::load(Some(file.path()));

    // Env wins over file.
    assert_eq!(config.video.source, "stub://override");
    assert_eq!(config.joystick.device_index, 3);

    // File wins over defaults.
    assert_eq!(config.video.width, 1920);
    assert_eq!(config.video.reconnect_delay, Duration::from_millis(1500));
    assert_eq!(config.joystick.calibration.deadzone, 0.15);
    assert!(config.joystick.calibration.invert_tilt);
    assert!(!config.joystick.calibration.invert_pan);
    assert_eq!(config.joystick.calibration.pan_axis, 3);
    assert_eq!(config.joystick.calibration.record_button, 5);
    assert!(!config.recording.enabled);
    assert_eq!(config.recording.container, "avi");
    assert_eq!(config.window.title, "Drill Feed");
    assert!(config.window.fullscreen);

    clear_env();
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let config = AppConfig::load(Some(std::path::Path::new(
        "/nonexistent/sartrainer-config.json",
    )));
    assert_eq!(config.video.source, "0");
    assert_eq!(config.video.width, 1280);
    assert!(config.recording.enabled);
}

#[test]
fn malformed_file_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ this is not json")
        .expect("write config");

    let config = AppConfig::load(Some(file.path()));
    assert_eq!(config.video.source, "0");
    assert_eq!(config.joystick.calibration.deadzone, 0.1);
}

#[test]
fn out_of_range_values_are_clamped_not_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"joystick": {"deadzone": 5.0, "sensitivity": -3.0}}"#)
        .expect("write config");

    let config = AppConfig::load(Some(file.path()));
    assert!((0.0..1.0).contains(&config.joystick.calibration.deadzone));
    assert!(config.joystick.calibration.sensitivity >= 0.0);
}
