//! SAR trainer core.
//!
//! The concurrent acquisition, input, and recording core of a
//! search-and-rescue camera training simulator. It keeps the most recent
//! frame of an unreliable live feed available to a real-time control
//! loop, recovers from source failures without operator intervention,
//! normalizes noisy controller input, and arbitrates a recording sink on
//! the same frame stream.
//!
//! # Architecture
//!
//! Exactly two long-lived threads touch shared state: the acquisition
//! thread (owns the capture handle, sole publisher of the frame channel)
//! and the main control thread (reads the channel, polls input, drives
//! recording and display). Every cross-thread frame handoff is a copy;
//! the only lock in the system guards the single frame slot.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the single-slot `FrameChannel`
//! - `capture`: capture backends (synthetic, V4L2, GStreamer URI)
//! - `source`: acquisition thread with automatic reconnect
//! - `input`: controller device, hot-plug, axis normalization
//! - `recorder`: recording state machine, writers, snapshots
//! - `config`: JSON configuration with defaults and env overrides

pub mod capture;
pub mod config;
pub mod frame;
pub mod input;
pub mod recorder;
pub mod source;

pub use capture::{CaptureConfig, StreamProps};
pub use config::{AppConfig, JoystickSettings, VideoSettings, WindowSettings};
pub use frame::{Frame, FrameChannel, DEFAULT_FPS};
pub use input::{normalize_axis, ButtonEvent, Calibration, ControllerState, Joystick, RawInputEvent};
pub use recorder::{save_snapshot, Codec, Recorder, RecorderConfig};
pub use source::{AcquisitionState, FrameSource, SourceConfig};
