//! Capture backends for the live feed.
//!
//! A capture handle is opened from a single string descriptor:
//! - `stub://...`: synthetic frames for development and tests, with
//!   optional failure scripting (see [`Capture::new`]).
//! - an all-digit string: a local capture device index
//!   (feature: capture-v4l2).
//! - anything else: a URI or file path decoded through GStreamer
//!   (feature: capture-gstreamer).
//!
//! The capture layer is responsible for:
//! - Establishing and releasing the upstream handle
//! - Negotiating geometry and frame rate, reporting the actual values
//! - Producing `Frame` instances from bounded blocking reads
//!
//! The capture layer does NOT reconnect on its own; read and open failures
//! surface as errors and the acquisition loop in `source` decides what to
//! do with them.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::frame::{Frame, DEFAULT_FPS};

#[cfg(feature = "capture-gstreamer")]
mod uri;
#[cfg(feature = "capture-v4l2")]
mod v4l2;

/// Requested capture parameters. The backing source may provide different
/// geometry or rate; the negotiated values are reported via [`StreamProps`].
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Source descriptor: device index, URI/path, or `stub://` scheme.
    pub source: String,
    /// Desired frame width (hint).
    pub width: u32,
    /// Desired frame height (hint).
    pub height: u32,
    /// Desired frame rate (hint).
    pub fps: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            width: 1280,
            height: 720,
            fps: 30.0,
        }
    }
}

/// Properties actually negotiated with the source on open.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamProps {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// A capture handle over one of the compiled-in backends.
///
/// Constructed once per source descriptor; `open` may be called repeatedly
/// (the reconnect loop does) and `close` releases the upstream handle
/// while keeping the backend and its scripting state alive.
pub struct Capture {
    backend: CaptureBackend,
}

enum CaptureBackend {
    Synthetic(SyntheticCapture),
    #[cfg(feature = "capture-v4l2")]
    V4l2(v4l2::V4l2Capture),
    #[cfg(feature = "capture-gstreamer")]
    Uri(uri::UriCapture),
}

impl Capture {
    /// Interpret `config.source` and build the matching backend.
    ///
    /// Synthetic descriptors accept failure scripting through query
    /// options: `stub://cam?fail_opens=3` makes the first three `open`
    /// calls fail, `stub://cam?max_frames=10` ends the stream after ten
    /// reads. Both exist to exercise the reconnect machinery.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        let descriptor = config.source.trim().to_string();
        if descriptor.is_empty() {
            return Err(anyhow!("capture source descriptor is empty"));
        }
        if descriptor.starts_with("stub://") {
            return Ok(Self {
                backend: CaptureBackend::Synthetic(SyntheticCapture::new(config)?),
            });
        }
        if descriptor.bytes().all(|b| b.is_ascii_digit()) {
            #[cfg(feature = "capture-v4l2")]
            {
                return Ok(Self {
                    backend: CaptureBackend::V4l2(v4l2::V4l2Capture::new(config)?),
                });
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                return Err(anyhow!(
                    "device-index capture requires the capture-v4l2 feature"
                ));
            }
        }
        #[cfg(feature = "capture-gstreamer")]
        {
            Ok(Self {
                backend: CaptureBackend::Uri(uri::UriCapture::new(config)?),
            })
        }
        #[cfg(not(feature = "capture-gstreamer"))]
        {
            Err(anyhow!(
                "URI capture requires the capture-gstreamer feature"
            ))
        }
    }

    /// (Re)establish the upstream handle and negotiate stream properties.
    pub fn open(&mut self) -> Result<StreamProps> {
        match &mut self.backend {
            CaptureBackend::Synthetic(capture) => capture.open(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::V4l2(capture) => capture.open(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureBackend::Uri(capture) => capture.open(),
        }
    }

    /// Release the upstream handle. The backend stays usable for a later
    /// `open`. No-op when already closed.
    pub fn close(&mut self) {
        match &mut self.backend {
            CaptureBackend::Synthetic(capture) => capture.close(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::V4l2(capture) => capture.close(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureBackend::Uri(capture) => capture.close(),
        }
    }

    pub fn is_open(&self) -> bool {
        match &self.backend {
            CaptureBackend::Synthetic(capture) => capture.is_open(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::V4l2(capture) => capture.is_open(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureBackend::Uri(capture) => capture.is_open(),
        }
    }

    /// Blocking read of the next frame, bounded by the backend's own
    /// timeout. An error means the stream failed or ended; the handle
    /// should be closed and reopened.
    pub fn read_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CaptureBackend::Synthetic(capture) => capture.read_frame(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::V4l2(capture) => capture.read_frame(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureBackend::Uri(capture) => capture.read_frame(),
        }
    }

    /// Source descriptor, for log lines.
    pub fn describe(&self) -> &str {
        match &self.backend {
            CaptureBackend::Synthetic(capture) => &capture.config.source,
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::V4l2(capture) => capture.describe(),
            #[cfg(feature = "capture-gstreamer")]
            CaptureBackend::Uri(capture) => capture.describe(),
        }
    }
}

/// Clamp a reported frame rate to something usable, falling back to the
/// requested rate and then to [`DEFAULT_FPS`].
pub(crate) fn effective_fps(reported: f64, requested: f64) -> f64 {
    if reported > 0.0 {
        reported
    } else if requested > 0.0 {
        requested
    } else {
        DEFAULT_FPS
    }
}

// ----------------------------------------------------------------------------
// Synthetic capture (stub://) for development and tests
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default)]
struct StubOptions {
    /// Fail this many `open` calls before the first success.
    fail_opens: u32,
    /// End the stream after this many frames per connection (0 = never).
    max_frames: u64,
}

struct SyntheticCapture {
    config: CaptureConfig,
    options: StubOptions,
    open_attempts: u32,
    connected: bool,
    /// Frames produced since the current connection was opened.
    frames_this_connection: u64,
    props: StreamProps,
}

impl SyntheticCapture {
    fn new(config: CaptureConfig) -> Result<Self> {
        let options = parse_stub_options(&config.source)?;
        let props = StreamProps {
            width: config.width.max(1),
            height: config.height.max(1),
            fps: effective_fps(0.0, config.fps),
        };
        Ok(Self {
            config,
            options,
            open_attempts: 0,
            connected: false,
            frames_this_connection: 0,
            props,
        })
    }

    fn open(&mut self) -> Result<StreamProps> {
        self.open_attempts += 1;
        if self.open_attempts <= self.options.fail_opens {
            return Err(anyhow!(
                "synthetic open scripted to fail (attempt {} of {})",
                self.open_attempts,
                self.options.fail_opens
            ));
        }
        self.connected = true;
        self.frames_this_connection = 0;
        log::info!("capture: connected to {} (synthetic)", self.config.source);
        Ok(self.props)
    }

    fn close(&mut self) {
        self.connected = false;
    }

    fn is_open(&self) -> bool {
        self.connected
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic capture is not open"));
        }
        if self.options.max_frames > 0 && self.frames_this_connection >= self.options.max_frames {
            return Err(anyhow!("synthetic stream ended"));
        }

        // Pace reads like a real device would.
        let interval_ms = (1000.0 / self.props.fps).clamp(0.0, 1000.0) as u64;
        std::thread::sleep(Duration::from_millis(interval_ms));

        self.frames_this_connection += 1;
        let seq = self.frames_this_connection;
        Ok(Frame::new(
            self.props.width,
            self.props.height,
            seq,
            self.generate_pixels(seq),
        ))
    }

    /// A diagonal gradient that drifts with the sequence number, so
    /// consecutive frames differ but remain cheap to generate.
    fn generate_pixels(&self, seq: u64) -> Vec<u8> {
        let width = self.props.width as usize;
        let height = self.props.height as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for y in 0..height {
            for x in 0..width {
                let shade = ((x + y + seq as usize) % 256) as u8;
                let offset = (y * width + x) * 3;
                pixels[offset] = shade;
                pixels[offset + 1] = shade.wrapping_add(64);
                pixels[offset + 2] = shade.wrapping_add(128);
            }
        }
        pixels
    }
}

fn parse_stub_options(descriptor: &str) -> Result<StubOptions> {
    let mut options = StubOptions::default();
    let Some((_, query)) = descriptor.split_once('?') else {
        return Ok(options);
    };
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("stub option '{}' is missing a value", pair))?;
        match key {
            "fail_opens" => {
                options.fail_opens = value
                    .parse()
                    .map_err(|_| anyhow!("stub option fail_opens must be an integer"))?;
            }
            "max_frames" => {
                options.max_frames = value
                    .parse()
                    .map_err(|_| anyhow!("stub option max_frames must be an integer"))?;
            }
            other => return Err(anyhow!("unknown stub option '{}'", other)),
        }
    }
    Ok(options)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(source: &str) -> CaptureConfig {
        CaptureConfig {
            source: source.to_string(),
            width: 32,
            height: 16,
            fps: 500.0,
        }
    }

    #[test]
    fn synthetic_capture_produces_frames() -> Result<()> {
        let mut capture = Capture::new(stub_config("stub://cam"))?;
        let props = capture.open()?;
        assert_eq!(props.width, 32);
        assert_eq!(props.height, 16);

        let frame = capture.read_frame()?;
        assert_eq!(frame.width, 32);
        assert_eq!(frame.data.len(), frame.expected_len());
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut capture = Capture::new(stub_config("stub://cam"))?;
        capture.open()?;
        let a = capture.read_frame()?;
        let b = capture.read_frame()?;
        assert_ne!(a.data, b.data);
        Ok(())
    }

    #[test]
    fn scripted_open_failures_then_success() -> Result<()> {
        let mut capture = Capture::new(stub_config("stub://cam?fail_opens=2"))?;
        assert!(capture.open().is_err());
        assert!(capture.open().is_err());
        assert!(capture.open().is_ok());
        assert!(capture.is_open());
        Ok(())
    }

    #[test]
    fn scripted_stream_end_after_max_frames() -> Result<()> {
        let mut capture = Capture::new(stub_config("stub://cam?max_frames=2"))?;
        capture.open()?;
        assert!(capture.read_frame().is_ok());
        assert!(capture.read_frame().is_ok());
        assert!(capture.read_frame().is_err());

        // Reopening resets the per-connection frame limit.
        capture.close();
        capture.open()?;
        assert!(capture.read_frame().is_ok());
        Ok(())
    }

    #[test]
    fn zero_fps_hint_falls_back_to_default() -> Result<()> {
        let mut config = stub_config("stub://cam");
        config.fps = 0.0;
        let mut capture = Capture::new(config)?;
        let props = capture.open()?;
        assert_eq!(props.fps, DEFAULT_FPS);
        Ok(())
    }

    #[test]
    fn read_before_open_is_an_error() -> Result<()> {
        let mut capture = Capture::new(stub_config("stub://cam"))?;
        assert!(capture.read_frame().is_err());
        Ok(())
    }

    #[test]
    fn unknown_stub_option_is_rejected() {
        assert!(Capture::new(stub_config("stub://cam?bogus=1")).is_err());
    }

    #[test]
    fn empty_descriptor_is_rejected() {
        assert!(Capture::new(stub_config("  ")).is_err());
    }

    #[test]
    fn effective_fps_prefers_reported_then_requested() {
        assert_eq!(effective_fps(25.0, 30.0), 25.0);
        assert_eq!(effective_fps(0.0, 15.0), 15.0);
        assert_eq!(effective_fps(-1.0, 0.0), DEFAULT_FPS);
    }
}
