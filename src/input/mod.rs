//! Controller input.
//!
//! `Joystick` owns the connection to one physical controller and keeps a
//! [`ControllerState`] current by draining backend events once per
//! [`poll`](Joystick::poll). It handles:
//! - device selection at startup (configured index, else device 0, else
//!   deviceless with neutral controls),
//! - hot-plug (attach while disconnected, detach resets to neutral),
//! - eager recomputation of the derived pan/tilt/zoom channels on every
//!   axis event, so the derived values can never lag the axes they were
//!   computed from,
//! - edge-triggered button reporting, both as returned events and through
//!   an optional synchronous press callback.
//!
//! Backends:
//! - `scripted`: queue-fed synthetic controller for development and
//!   tests without hardware.
//! - `input-sdl2` feature: real controllers via the SDL2 joystick
//!   subsystem.

use anyhow::Result;
use std::collections::VecDeque;

pub mod normalize;
#[cfg(feature = "input-sdl2")]
mod sdl;

pub use normalize::{normalize_axis, Calibration};

/// A raw controller snapshot plus the derived control channels.
#[derive(Clone, Debug, Default)]
pub struct ControllerState {
    pub connected: bool,
    pub name: String,
    /// Raw axis values, normalized to `[-1, 1]`.
    pub axes: Vec<f32>,
    pub buttons: Vec<bool>,
    pub hats: Vec<i8>,
    /// Derived channels, recomputed from the raw axes and the calibration
    /// on every axis event.
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

/// A button edge observed during [`Joystick::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: usize,
    pub pressed: bool,
}

/// Raw event produced by an input backend (or injected into the scripted
/// one).
#[derive(Clone, Debug, PartialEq)]
pub enum RawInputEvent {
    DeviceAdded { index: u32 },
    DeviceRemoved { instance: i32 },
    Axis { instance: i32, axis: usize, value: f32 },
    Button { instance: i32, button: usize, pressed: bool },
    Hat { instance: i32, hat: usize, value: i8 },
}

/// Description of an opened device.
#[derive(Clone, Debug)]
pub struct DeviceDesc {
    pub instance: i32,
    pub name: String,
    pub axes: usize,
    pub buttons: usize,
    pub hats: usize,
}

type ButtonCallback = Box<dyn FnMut(usize, bool)>;

/// A polled controller with instance-owned calibration.
pub struct Joystick {
    backend: InputBackend,
    calibration: Calibration,
    state: ControllerState,
    instance: Option<i32>,
    callback: Option<ButtonCallback>,
}

enum InputBackend {
    /// No input subsystem; controls read neutral forever.
    Null,
    Scripted(ScriptedPad),
    #[cfg(feature = "input-sdl2")]
    Sdl(sdl::SdlPad),
}

impl Joystick {
    /// Open the input subsystem and attach a device.
    ///
    /// Tries `device_index` first, then device 0, then proceeds without a
    /// device (neutral controls, hot-plug will attach later). An empty
    /// enumeration is not an error; only a failure to bring up the input
    /// subsystem itself is, and the caller decides what to do with it.
    /// Without a compiled-in input backend this always succeeds
    /// deviceless.
    #[allow(unused_variables)]
    pub fn open(calibration: Calibration, device_index: u32) -> Result<Self> {
        let calibration = calibration.sanitized();
        #[cfg(feature = "input-sdl2")]
        {
            let backend = sdl::SdlPad::init()?;
            let mut joystick = Self::with_backend(InputBackend::Sdl(backend), calibration);
            for (index, name) in joystick.device_names().iter().enumerate() {
                log::info!("  [{}] {}", index, name);
            }
            joystick.attach_initial(device_index);
            Ok(joystick)
        }
        #[cfg(not(feature = "input-sdl2"))]
        {
            log::info!("no input backend compiled in; controls read neutral");
            Ok(Self::with_backend(InputBackend::Null, calibration))
        }
    }

    /// A joystick with no backend at all. Controls read neutral forever.
    pub fn disconnected(calibration: Calibration) -> Self {
        Self::with_backend(InputBackend::Null, calibration.sanitized())
    }

    /// A scripted joystick for development and tests without hardware.
    /// One synthetic device is attached immediately; feed it with
    /// [`push_scripted`](Joystick::push_scripted).
    pub fn scripted(calibration: Calibration) -> Self {
        let mut joystick = Self::with_backend(
            InputBackend::Scripted(ScriptedPad::default()),
            calibration.sanitized(),
        );
        joystick.attach_initial(0);
        joystick
    }

    fn with_backend(backend: InputBackend, calibration: Calibration) -> Self {
        Self {
            backend,
            calibration,
            state: ControllerState::default(),
            instance: None,
            callback: None,
        }
    }

    /// Names of currently attached devices, for operator listings.
    pub fn device_names(&self) -> Vec<String> {
        match &self.backend {
            InputBackend::Null => Vec::new(),
            InputBackend::Scripted(pad) => pad.device_names(),
            #[cfg(feature = "input-sdl2")]
            InputBackend::Sdl(pad) => pad.device_names(),
        }
    }

    /// Register a callback invoked synchronously from [`poll`] on button
    /// *press* edges (releases are reported only through the returned
    /// events).
    ///
    /// [`poll`]: Joystick::poll
    pub fn set_button_callback(&mut self, callback: impl FnMut(usize, bool) + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Inject an event into the scripted backend. Ignored (with a log
    /// notice) on other backends.
    pub fn push_scripted(&mut self, event: RawInputEvent) {
        match &mut self.backend {
            InputBackend::Scripted(pad) => pad.queue.push_back(event),
            _ => log::warn!("push_scripted on a non-scripted input backend; ignored"),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Drain all pending backend events once and return the button edges
    /// observed, in order.
    pub fn poll(&mut self) -> Vec<ButtonEvent> {
        let events = match &mut self.backend {
            InputBackend::Null => Vec::new(),
            InputBackend::Scripted(pad) => pad.queue.drain(..).collect(),
            #[cfg(feature = "input-sdl2")]
            InputBackend::Sdl(pad) => pad.drain(),
        };

        let mut edges = Vec::new();
        for event in events {
            match event {
                RawInputEvent::DeviceAdded { index } => {
                    // Accepted only while no device is open.
                    if self.instance.is_none() {
                        self.attach(index);
                    }
                }
                RawInputEvent::DeviceRemoved { instance } => {
                    if self.instance == Some(instance) {
                        self.detach();
                    }
                }
                RawInputEvent::Axis {
                    instance,
                    axis,
                    value,
                } => {
                    if self.instance != Some(instance) {
                        continue;
                    }
                    if let Some(slot) = self.state.axes.get_mut(axis) {
                        *slot = value.clamp(-1.0, 1.0);
                    }
                    self.recompute_derived();
                }
                RawInputEvent::Button {
                    instance,
                    button,
                    pressed,
                } => {
                    if self.instance != Some(instance) {
                        continue;
                    }
                    if let Some(slot) = self.state.buttons.get_mut(button) {
                        *slot = pressed;
                    }
                    edges.push(ButtonEvent { button, pressed });
                    if pressed {
                        if let Some(callback) = &mut self.callback {
                            callback(button, pressed);
                        }
                    }
                }
                RawInputEvent::Hat {
                    instance,
                    hat,
                    value,
                } => {
                    if self.instance != Some(instance) {
                        continue;
                    }
                    if let Some(slot) = self.state.hats.get_mut(hat) {
                        *slot = value;
                    }
                }
            }
        }
        edges
    }

    fn attach_initial(&mut self, device_index: u32) {
        let count = self.device_count();
        if count == 0 {
            log::info!("no controllers attached; waiting for hot-plug");
            return;
        }
        if device_index < count {
            self.attach(device_index);
        } else {
            log::info!(
                "configured controller index {} not found, using device 0",
                device_index
            );
            self.attach(0);
        }
    }

    fn device_count(&self) -> u32 {
        match &self.backend {
            InputBackend::Null => 0,
            InputBackend::Scripted(pad) => pad.device_count(),
            #[cfg(feature = "input-sdl2")]
            InputBackend::Sdl(pad) => pad.device_count(),
        }
    }

    fn attach(&mut self, index: u32) {
        let opened = match &mut self.backend {
            InputBackend::Null => return,
            InputBackend::Scripted(pad) => pad.open_device(index),
            #[cfg(feature = "input-sdl2")]
            InputBackend::Sdl(pad) => pad.open_device(index),
        };
        match opened {
            Ok(desc) => {
                log::info!(
                    "controller connected: {} (axes: {}, buttons: {}, hats: {})",
                    desc.name,
                    desc.axes,
                    desc.buttons,
                    desc.hats
                );
                self.instance = Some(desc.instance);
                self.state = ControllerState {
                    connected: true,
                    name: desc.name,
                    axes: vec![0.0; desc.axes],
                    buttons: vec![false; desc.buttons],
                    hats: vec![0; desc.hats],
                    ..ControllerState::default()
                };
            }
            Err(err) => {
                log::warn!("failed to open controller {}: {:#}", index, err);
            }
        }
    }

    fn detach(&mut self) {
        log::info!("controller disconnected: {}", self.state.name);
        match &mut self.backend {
            InputBackend::Null => {}
            InputBackend::Scripted(pad) => pad.close_device(),
            #[cfg(feature = "input-sdl2")]
            InputBackend::Sdl(pad) => pad.close_device(),
        }
        self.instance = None;
        self.state = ControllerState::default();
    }

    /// Recompute pan/tilt/zoom from the raw axes. Called on every axis
    /// event rather than lazily on read, so a reader can never observe
    /// derived values stale relative to the axes.
    fn recompute_derived(&mut self) {
        let cal = &self.calibration;
        let axes = &self.state.axes;
        let axis = |index: usize| axes.get(index).copied().unwrap_or(0.0);
        let pan = normalize_axis(
            axis(cal.pan_axis),
            cal.deadzone,
            cal.sensitivity,
            cal.invert_pan,
        );
        let tilt = normalize_axis(
            axis(cal.tilt_axis),
            cal.deadzone,
            cal.sensitivity,
            cal.invert_tilt,
        );
        // Zoom has no inversion.
        let zoom = normalize_axis(axis(cal.zoom_axis), cal.deadzone, cal.sensitivity, false);
        self.state.pan = pan;
        self.state.tilt = tilt;
        self.state.zoom = zoom;
    }
}

// ----------------------------------------------------------------------------
// Scripted backend
// ----------------------------------------------------------------------------

/// Synthetic controller: events are whatever the caller queues, the
/// "hardware" is a fixed eight-axis pad.
#[derive(Default)]
struct ScriptedPad {
    queue: VecDeque<RawInputEvent>,
}

impl ScriptedPad {
    fn device_count(&self) -> u32 {
        1
    }

    fn device_names(&self) -> Vec<String> {
        vec!["scripted pad".to_string()]
    }

    fn open_device(&mut self, _index: u32) -> Result<DeviceDesc> {
        Ok(DeviceDesc {
            instance: 0,
            name: "scripted pad".to_string(),
            axes: 8,
            buttons: 12,
            hats: 1,
        })
    }

    fn close_device(&mut self) {}
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
