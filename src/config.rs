//! Application configuration.
//!
//! Loaded from a JSON file into an all-optional file-shape struct, then
//! merged over built-in defaults. A missing or malformed file falls back
//! to defaults with a warning; out-of-range values are clamped during
//! sanitization. Configuration problems never abort startup.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::input::Calibration;
use crate::recorder::RecorderConfig;
use crate::source::SourceConfig;

const DEFAULT_SOURCE: &str = "0";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_VIDEO_FPS: f64 = 30.0;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
const DEFAULT_WINDOW_TITLE: &str = "SAR Trainer - EO Feed";

// ----------------------------------------------------------------------------
// File shape
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    video: Option<VideoFile>,
    joystick: Option<JoystickFile>,
    recording: Option<RecordingFile>,
    window: Option<WindowFile>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct JoystickFile {
    device_index: Option<u32>,
    deadzone: Option<f32>,
    sensitivity: Option<f32>,
    invert_pan: Option<bool>,
    invert_tilt: Option<bool>,
    axis_mapping: Option<HashMap<String, usize>>,
    button_mapping: Option<HashMap<String, usize>>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingFile {
    enabled: Option<bool>,
    output_dir: Option<PathBuf>,
    format: Option<String>,
    codec: Option<String>,
    include_overlay: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct WindowFile {
    title: Option<String>,
    fullscreen: Option<bool>,
}

// ----------------------------------------------------------------------------
// Resolved settings
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub video: VideoSettings,
    pub joystick: JoystickSettings,
    pub recording: RecorderConfig,
    pub window: WindowSettings,
}

#[derive(Clone, Debug)]
pub struct VideoSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub reconnect_delay: Duration,
}

impl VideoSettings {
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            source: self.source.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            reconnect_delay: self.reconnect_delay,
        }
    }
}

#[derive(Clone, Debug)]
pub struct JoystickSettings {
    pub device_index: u32,
    pub calibration: Calibration,
}

#[derive(Clone, Debug)]
pub struct WindowSettings {
    pub title: String,
    pub fullscreen: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

impl AppConfig {
    /// Load configuration, falling back to defaults on any problem.
    pub fn load(path: Option<&Path>) -> Self {
        let file = match path {
            Some(path) => match read_config_file(path) {
                Ok(file) => file,
                Err(err) => {
                    log::warn!("{:#}; using default configuration", err);
                    ConfigFile::default()
                }
            },
            None => ConfigFile::default(),
        };
        let mut config = Self::from_file(file);
        config.apply_env();
        config.sanitize();
        config
    }

    fn from_file(file: ConfigFile) -> Self {
        let video_file = file.video.unwrap_or_default();
        let video = VideoSettings {
            source: video_file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: video_file.width.unwrap_or(DEFAULT_WIDTH),
            height: video_file.height.unwrap_or(DEFAULT_HEIGHT),
            fps: video_file.fps.unwrap_or(DEFAULT_VIDEO_FPS),
            reconnect_delay: Duration::from_millis(
                video_file
                    .reconnect_delay_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
        };

        let joystick_file = file.joystick.unwrap_or_default();
        let mut calibration = Calibration::default();
        if let Some(deadzone) = joystick_file.deadzone {
            calibration.deadzone = deadzone;
        }
        if let Some(sensitivity) = joystick_file.sensitivity {
            calibration.sensitivity = sensitivity;
        }
        if let Some(invert) = joystick_file.invert_pan {
            calibration.invert_pan = invert;
        }
        if let Some(invert) = joystick_file.invert_tilt {
            calibration.invert_tilt = invert;
        }
        if let Some(mapping) = joystick_file.axis_mapping {
            for (role, index) in mapping {
                match role.as_str() {
                    "pan" => calibration.pan_axis = index,
                    "tilt" => calibration.tilt_axis = index,
                    "zoom" => calibration.zoom_axis = index,
                    other => log::warn!("unknown axis role '{}' in config", other),
                }
            }
        }
        if let Some(mapping) = joystick_file.button_mapping {
            for (role, index) in mapping {
                match role.as_str() {
                    "record_toggle" => calibration.record_button = index,
                    "snapshot" => calibration.snapshot_button = index,
                    other => log::warn!("unknown button role '{}' in config", other),
                }
            }
        }
        let joystick = JoystickSettings {
            device_index: joystick_file.device_index.unwrap_or(0),
            calibration,
        };

        let recording_file = file.recording.unwrap_or_default();
        let recording_defaults = RecorderConfig::default();
        let recording = RecorderConfig {
            enabled: recording_file.enabled.unwrap_or(recording_defaults.enabled),
            output_dir: recording_file
                .output_dir
                .unwrap_or(recording_defaults.output_dir),
            container: recording_file
                .format
                .unwrap_or(recording_defaults.container),
            codec: recording_file.codec.unwrap_or(recording_defaults.codec),
            include_overlay: recording_file
                .include_overlay
                .unwrap_or(recording_defaults.include_overlay),
        };

        let window_file = file.window.unwrap_or_default();
        let window = WindowSettings {
            title: window_file
                .title
                .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string()),
            fullscreen: window_file.fullscreen.unwrap_or(false),
        };

        Self {
            video,
            joystick,
            recording,
            window,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(source) = std::env::var("SARTRAINER_VIDEO_SOURCE") {
            if !source.trim().is_empty() {
                self.video.source = source;
            }
        }
        if let Ok(index) = std::env::var("SARTRAINER_JOYSTICK_INDEX") {
            match index.parse() {
                Ok(index) => self.joystick.device_index = index,
                Err(_) => log::warn!("SARTRAINER_JOYSTICK_INDEX must be an integer; ignored"),
            }
        }
        if let Ok(dir) = std::env::var("SARTRAINER_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.recording.output_dir = PathBuf::from(dir);
            }
        }
    }

    fn sanitize(&mut self) {
        self.joystick.calibration = self.joystick.calibration.clone().sanitized();
        if self.video.width == 0 || self.video.height == 0 {
            log::warn!(
                "video geometry {}x{} invalid, using {}x{}",
                self.video.width,
                self.video.height,
                DEFAULT_WIDTH,
                DEFAULT_HEIGHT
            );
            self.video.width = DEFAULT_WIDTH;
            self.video.height = DEFAULT_HEIGHT;
        }
        if self.video.reconnect_delay.is_zero() {
            log::warn!(
                "reconnect delay must be positive, using {} ms",
                DEFAULT_RECONNECT_DELAY_MS
            );
            self.video.reconnect_delay = Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS);
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let config = AppConfig::default();
        assert_eq!(config.video.source, "0");
        assert_eq!(config.video.width, 1280);
        assert_eq!(config.video.reconnect_delay, Duration::from_millis(3000));
        assert_eq!(config.joystick.calibration.pan_axis, 0);
        assert!(config.recording.enabled);
    }

    #[test]
    fn axis_and_button_roles_resolve_to_indices() {
        let file: ConfigFile = serde_json::from_str(
            r#"{
                "joystick": {
                    "axis_mapping": {"pan": 2, "tilt": 3, "zoom": 5, "rudder": 4},
                    "button_mapping": {"record_toggle": 7, "snapshot": 8}
                }
            }"#,
        )
        .unwrap();
        let config = AppConfig::from_file(file);
        let calibration = &config.joystick.calibration;
        assert_eq!(calibration.pan_axis, 2);
        assert_eq!(calibration.tilt_axis, 3);
        assert_eq!(calibration.zoom_axis, 5);
        assert_eq!(calibration.record_button, 7);
        assert_eq!(calibration.snapshot_button, 8);
    }

    #[test]
    fn sanitize_recovers_from_bad_values() {
        let file: ConfigFile = serde_json::from_str(
            r#"{
                "video": {"width": 0, "height": 0, "reconnect_delay_ms": 0},
                "joystick": {"deadzone": 2.5, "sensitivity": -1.0}
            }"#,
        )
        .unwrap();
        let mut config = AppConfig::from_file(file);
        config.sanitize();
        assert_eq!(config.video.width, DEFAULT_WIDTH);
        assert!(!config.video.reconnect_delay.is_zero());
        assert!((0.0..1.0).contains(&config.joystick.calibration.deadzone));
        assert_eq!(config.joystick.calibration.sensitivity, 1.0);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"video": {"source": "rtsp://drone-cam/stream"}}"#,
        )
        .unwrap();
        let config = AppConfig::from_file(file);
        assert_eq!(config.video.source, "rtsp://drone-cam/stream");
        assert_eq!(config.video.width, DEFAULT_WIDTH);
        assert_eq!(config.recording.codec, "mp4v");
        assert_eq!(config.window.title, DEFAULT_WINDOW_TITLE);
    }
}
