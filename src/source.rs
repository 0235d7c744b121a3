//! Live-feed acquisition.
//!
//! `FrameSource` owns the capture handle and a dedicated background thread
//! that keeps the feed alive for the lifetime of the component:
//!
//! ```text
//! Closed -> Opening -> Streaming -> (failure) -> Reconnecting -> Opening -> ...
//! ```
//!
//! Every capture error is non-fatal: open and read failures are logged,
//! the handle is released, and the thread retries forever with a fixed
//! delay. A training session is expected to ride out transient link drops
//! without operator intervention; callers needing a retry bound must
//! impose one externally.
//!
//! Shutdown is cooperative: a stop flag checked once per loop iteration,
//! then a join. The capture handle lives on the acquisition thread and is
//! released before the join returns, so no other thread can ever touch a
//! closed handle.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{Capture, CaptureConfig};
use crate::frame::FrameChannel;

/// Connection state of the live feed, readable from any thread.
/// Transitions happen only on the acquisition thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Disconnected,
    Connected,
}

/// Configuration for a [`FrameSource`].
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source descriptor: device index, URI/path, or `stub://` scheme.
    pub source: String,
    /// Desired frame width (hint; the source may negotiate differently).
    pub width: u32,
    /// Desired frame height (hint).
    pub height: u32,
    /// Desired frame rate (hint).
    pub fps: f64,
    /// Delay between reconnect attempts after a failure.
    pub reconnect_delay: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            width: 1280,
            height: 720,
            fps: 30.0,
            reconnect_delay: Duration::from_millis(3000),
        }
    }
}

#[derive(Default)]
struct SharedProps {
    connected: AtomicBool,
    width: AtomicU32,
    height: AtomicU32,
    fps_bits: AtomicU64,
    frames_published: AtomicU64,
}

impl SharedProps {
    fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }
}

/// Background acquisition thread feeding a [`FrameChannel`].
///
/// Construction starts the thread; [`shutdown`](FrameSource::shutdown)
/// (also run on drop) signals it, joins it, and releases the handle on
/// every exit path.
pub struct FrameSource {
    shared: Arc<SharedProps>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Build the capture backend for `config.source` and start acquiring
    /// into `channel`.
    ///
    /// The first open attempt happens immediately on the background
    /// thread. Failure to open is not an error here: the source stays
    /// [`Disconnected`](AcquisitionState::Disconnected) and keeps
    /// retrying while the caller proceeds in degraded mode. The only
    /// construction error is a descriptor no compiled-in backend can
    /// serve.
    pub fn spawn(config: SourceConfig, channel: FrameChannel) -> Result<Self> {
        let capture = Capture::new(CaptureConfig {
            source: config.source.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
        })?;

        let shared = Arc::new(SharedProps::default());
        let stop = Arc::new(AtomicBool::new(false));
        let join = {
            let shared = shared.clone();
            let stop = stop.clone();
            let reconnect_delay = config.reconnect_delay;
            std::thread::spawn(move || {
                acquisition_loop(capture, channel, shared, stop, reconnect_delay);
            })
        };

        Ok(Self {
            shared,
            stop,
            join: Some(join),
        })
    }

    pub fn state(&self) -> AcquisitionState {
        if self.shared.connected.load(Ordering::Relaxed) {
            AcquisitionState::Connected
        } else {
            AcquisitionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == AcquisitionState::Connected
    }

    /// Negotiated frame width; 0 until the first successful open.
    pub fn width(&self) -> u32 {
        self.shared.width.load(Ordering::Relaxed)
    }

    /// Negotiated frame height; 0 until the first successful open.
    pub fn height(&self) -> u32 {
        self.shared.height.load(Ordering::Relaxed)
    }

    /// Negotiated frame rate; 0.0 until the first successful open.
    /// Recording must be started with these values for consistent output.
    pub fn fps(&self) -> f64 {
        self.shared.fps()
    }

    /// Total frames published across all connections.
    pub fn frames_published(&self) -> u64 {
        self.shared.frames_published.load(Ordering::Relaxed)
    }

    /// Signal the acquisition thread and join it. The capture handle is
    /// released by the thread before this returns. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("acquisition thread panicked during shutdown");
            }
        }
        self.shared.connected.store(false, Ordering::Relaxed);
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn acquisition_loop(
    mut capture: Capture,
    channel: FrameChannel,
    shared: Arc<SharedProps>,
    stop: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        if !capture.is_open() {
            match capture.open() {
                Ok(props) => {
                    shared.width.store(props.width, Ordering::Relaxed);
                    shared.height.store(props.height, Ordering::Relaxed);
                    shared.set_fps(props.fps);
                    shared.connected.store(true, Ordering::Relaxed);
                }
                Err(err) => {
                    log::debug!("live feed open failed: {:#}", err);
                    std::thread::sleep(reconnect_delay);
                }
            }
            continue;
        }

        match capture.read_frame() {
            Ok(frame) => {
                channel.publish(frame);
                shared.frames_published.fetch_add(1, Ordering::Relaxed);
                // Brief idle between reads bounds CPU without hurting latency.
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => {
                log::warn!(
                    "live feed {} dropped: {:#}; reconnecting",
                    capture.describe(),
                    err
                );
                capture.close();
                shared.connected.store(false, Ordering::Relaxed);
            }
        }
    }

    // Release the handle on the owning thread, before shutdown's join
    // returns.
    capture.close();
    shared.connected.store(false, Ordering::Relaxed);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn stub_source(descriptor: &str) -> SourceConfig {
        SourceConfig {
            source: descriptor.to_string(),
            width: 32,
            height: 16,
            fps: 500.0,
            reconnect_delay: Duration::from_millis(5),
        }
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn streams_frames_into_the_channel() -> Result<()> {
        let channel = FrameChannel::new();
        let mut source = FrameSource::spawn(stub_source("stub://cam"), channel.clone())?;

        assert!(wait_until(Duration::from_secs(2), || channel
            .latest()
            .is_some()));
        assert!(source.is_connected());
        assert_eq!(source.width(), 32);
        assert_eq!(source.height(), 16);
        assert!(source.fps() > 0.0);

        source.shutdown();
        Ok(())
    }

    #[test]
    fn recovers_after_scripted_open_failures() -> Result<()> {
        let channel = FrameChannel::new();
        let mut source = FrameSource::spawn(stub_source("stub://cam?fail_opens=3"), channel)?;

        // Three failed opens, three reconnect delays, then Streaming.
        assert!(wait_until(Duration::from_secs(2), || source.is_connected()));
        assert!(wait_until(Duration::from_secs(2), || {
            source.frames_published() > 0
        }));

        source.shutdown();
        assert_eq!(source.state(), AcquisitionState::Disconnected);
        Ok(())
    }

    #[test]
    fn reconnects_after_stream_end() -> Result<()> {
        let channel = FrameChannel::new();
        let mut source = FrameSource::spawn(stub_source("stub://cam?max_frames=3"), channel)?;

        // More frames than one connection can deliver proves a reconnect.
        assert!(wait_until(Duration::from_secs(4), || {
            source.frames_published() > 6
        }));

        source.shutdown();
        Ok(())
    }

    #[test]
    fn shutdown_while_disconnected_joins_cleanly() -> Result<()> {
        let channel = FrameChannel::new();
        let mut source = FrameSource::spawn(stub_source("stub://cam?fail_opens=100000"), channel)?;

        std::thread::sleep(Duration::from_millis(20));
        assert!(!source.is_connected());
        source.shutdown();
        // Idempotent.
        source.shutdown();
        Ok(())
    }

    #[test]
    fn zero_fps_hint_reports_default_rate() -> Result<()> {
        let channel = FrameChannel::new();
        let mut config = stub_source("stub://cam");
        config.fps = 0.0;
        let mut source = FrameSource::spawn(config, channel)?;

        assert!(wait_until(Duration::from_secs(2), || source.is_connected()));
        assert_eq!(source.fps(), crate::frame::DEFAULT_FPS);

        source.shutdown();
        Ok(())
    }

    #[test]
    fn unsupported_descriptor_fails_at_spawn() {
        let channel = FrameChannel::new();
        let result = FrameSource::spawn(stub_source("stub://cam?bogus=1"), channel);
        assert!(result.is_err());
    }
}
