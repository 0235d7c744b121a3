//! SDL2 joystick backend.
//!
//! Translates SDL joystick events into [`RawInputEvent`]s and owns the
//! opened device handle. Device selection and hot-plug policy live in
//! `Joystick`; this layer only reports what the hardware does.

use anyhow::{anyhow, Result};
use sdl2::event::Event;

use super::{DeviceDesc, RawInputEvent};

pub(crate) struct SdlPad {
    _context: sdl2::Sdl,
    subsystem: sdl2::JoystickSubsystem,
    event_pump: sdl2::EventPump,
    device: Option<sdl2::joystick::Joystick>,
}

impl SdlPad {
    pub(crate) fn init() -> Result<Self> {
        // Required for certain controllers to deliver events on Windows.
        sdl2::hint::set("SDL_JOYSTICK_THREAD", "1");

        let context = sdl2::init().map_err(|e| anyhow!("initialize SDL: {}", e))?;
        let subsystem = context
            .joystick()
            .map_err(|e| anyhow!("initialize SDL joystick subsystem: {}", e))?;
        let event_pump = context
            .event_pump()
            .map_err(|e| anyhow!("create SDL event pump: {}", e))?;
        subsystem.set_event_state(true);

        Ok(Self {
            _context: context,
            subsystem,
            event_pump,
            device: None,
        })
    }

    pub(crate) fn device_count(&self) -> u32 {
        self.subsystem.num_joysticks().unwrap_or(0)
    }

    pub(crate) fn device_names(&self) -> Vec<String> {
        (0..self.device_count())
            .map(|index| {
                self.subsystem
                    .name_for_index(index)
                    .unwrap_or_else(|_| format!("device {}", index))
            })
            .collect()
    }

    pub(crate) fn open_device(&mut self, index: u32) -> Result<DeviceDesc> {
        let device = self
            .subsystem
            .open(index)
            .map_err(|e| anyhow!("open joystick {}: {}", index, e))?;
        let desc = DeviceDesc {
            instance: device.instance_id() as i32,
            name: device.name(),
            axes: device.num_axes() as usize,
            buttons: device.num_buttons() as usize,
            hats: device.num_hats() as usize,
        };
        self.device = Some(device);
        Ok(desc)
    }

    pub(crate) fn close_device(&mut self) {
        self.device = None;
    }

    pub(crate) fn drain(&mut self) -> Vec<RawInputEvent> {
        let mut events = Vec::new();
        for event in self.event_pump.poll_iter() {
            match event {
                Event::JoyDeviceAdded { which, .. } => {
                    events.push(RawInputEvent::DeviceAdded { index: which });
                }
                Event::JoyDeviceRemoved { which, .. } => {
                    events.push(RawInputEvent::DeviceRemoved {
                        instance: which as i32,
                    });
                }
                Event::JoyAxisMotion {
                    which,
                    axis_idx,
                    value,
                    ..
                } => {
                    events.push(RawInputEvent::Axis {
                        instance: which as i32,
                        axis: axis_idx as usize,
                        value: normalize_raw_axis(value),
                    });
                }
                Event::JoyButtonDown {
                    which, button_idx, ..
                } => {
                    events.push(RawInputEvent::Button {
                        instance: which as i32,
                        button: button_idx as usize,
                        pressed: true,
                    });
                }
                Event::JoyButtonUp {
                    which, button_idx, ..
                } => {
                    events.push(RawInputEvent::Button {
                        instance: which as i32,
                        button: button_idx as usize,
                        pressed: false,
                    });
                }
                Event::JoyHatMotion {
                    which,
                    hat_idx,
                    state,
                    ..
                } => {
                    events.push(RawInputEvent::Hat {
                        instance: which as i32,
                        hat: hat_idx as usize,
                        value: hat_state_raw(state),
                    });
                }
                _ => {}
            }
        }
        events
    }
}

/// Map SDL's i16 axis range onto `[-1, 1]`, clamping the asymmetric
/// minimum so full deflection reads the same magnitude in both
/// directions.
fn normalize_raw_axis(raw: i16) -> f32 {
    let clamped = (raw as i32).clamp(-32767, 32767) as f32;
    (clamped / 32767.0).clamp(-1.0, 1.0)
}

/// SDL hat positions as the classic bitmask (up=1, right=2, down=4,
/// left=8).
fn hat_state_raw(state: sdl2::joystick::HatState) -> i8 {
    use sdl2::joystick::HatState;
    match state {
        HatState::Centered => 0,
        HatState::Up => 1,
        HatState::Right => 2,
        HatState::Down => 4,
        HatState::Left => 8,
        HatState::RightUp => 3,
        HatState::RightDown => 6,
        HatState::LeftUp => 9,
        HatState::LeftDown => 12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_axis_normalization_is_symmetric() {
        assert_eq!(normalize_raw_axis(32767), 1.0);
        assert_eq!(normalize_raw_axis(-32768), -1.0);
        assert_eq!(normalize_raw_axis(0), 0.0);
    }
}
