//! Frame container and the single-slot live-feed handoff.
//!
//! This module provides:
//! - `Frame`: an owned RGB24 frame produced by the capture layer.
//! - `FrameChannel`: a single-slot, latest-wins buffer shared between the
//!   acquisition thread (sole publisher) and any number of readers.
//!
//! The channel is deliberately lossy: a publish unconditionally replaces
//! whatever the slot held. Readers always receive a full copy of a fully
//! published frame; there is no queueing and no backpressure onto the
//! publisher.

use std::sync::{Arc, Mutex, PoisonError};

/// Fallback frame rate when a source reports a nonsensical value.
pub const DEFAULT_FPS: f64 = 30.0;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// An owned video frame in packed RGB24 layout.
///
/// Frames are copied across the thread boundary; nothing ever aliases the
/// pixel data of a frame held by another thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Monotonic capture sequence number, per source connection.
    pub seq: u64,
    /// Packed RGB24 pixels, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, seq: u64, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            seq,
            data,
        }
    }

    /// Expected byte length of the pixel buffer for the frame's geometry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

// ----------------------------------------------------------------------------
// FrameChannel
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    fresh: bool,
}

/// Single-slot, mutex-protected "latest frame wins" channel.
///
/// Exactly one producer (the acquisition thread) calls [`publish`]; any
/// number of readers call [`latest`] or [`latest_fresh`]. The lock is held
/// only for a bounded-cost move or clone, never across I/O, so the
/// publisher is never blocked on a slow consumer.
///
/// [`publish`]: FrameChannel::publish
/// [`latest`]: FrameChannel::latest
/// [`latest_fresh`]: FrameChannel::latest_fresh
#[derive(Clone, Default)]
pub struct FrameChannel {
    slot: Arc<Mutex<Slot>>,
}

impl FrameChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot contents with `frame`, marking it fresh.
    ///
    /// Lossy: an unread previous frame is dropped. Never blocks on readers
    /// beyond the slot mutex.
    pub fn publish(&self, frame: Frame) {
        let mut slot = self.lock();
        slot.frame = Some(frame);
        slot.fresh = true;
    }

    /// Copy of the current slot contents, or `None` if nothing has ever
    /// been published. Does not consume the slot; repeated calls return
    /// the same frame until the next publish.
    pub fn latest(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    /// Like [`latest`], but returns the frame only when it is new since
    /// the previous `latest_fresh` call, then clears the freshness mark.
    ///
    /// Reading a stale frame through [`latest`] is always safe; this is
    /// for callers that want to skip work on repeats.
    ///
    /// [`latest`]: FrameChannel::latest
    pub fn latest_fresh(&self) -> Option<Frame> {
        let mut slot = self.lock();
        if !slot.fresh {
            return None;
        }
        slot.fresh = false;
        slot.frame.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        // A poisoned slot still holds a fully published frame; recover it.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn solid_frame(byte: u8, seq: u64) -> Frame {
        Frame::new(4, 2, seq, vec![byte; 4 * 2 * 3])
    }

    #[test]
    fn empty_channel_reads_none() {
        let channel = FrameChannel::new();
        assert!(channel.latest().is_none());
        assert!(channel.latest_fresh().is_none());
    }

    #[test]
    fn latest_wins_over_unread_frames() {
        let channel = FrameChannel::new();
        channel.publish(solid_frame(1, 1));
        channel.publish(solid_frame(2, 2));
        channel.publish(solid_frame(3, 3));

        // The slot holds only the last publish, observed fresh exactly once.
        let frame = channel.latest_fresh().unwrap();
        assert_eq!(frame.seq, 3);
        assert!(channel.latest_fresh().is_none());

        // Non-consuming reads still see it.
        assert_eq!(channel.latest().unwrap().seq, 3);
    }

    #[test]
    fn publish_restores_freshness() {
        let channel = FrameChannel::new();
        channel.publish(solid_frame(1, 1));
        assert!(channel.latest_fresh().is_some());
        channel.publish(solid_frame(2, 2));
        assert_eq!(channel.latest_fresh().unwrap().seq, 2);
    }

    #[test]
    fn multiple_readers_see_the_same_frame() {
        let channel = FrameChannel::new();
        channel.publish(solid_frame(7, 42));
        let a = channel.latest().unwrap();
        let b = channel.latest().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn concurrent_reads_never_observe_torn_frames() {
        let channel = FrameChannel::new();
        channel.publish(solid_frame(0, 0));

        let publisher = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 1..500u64 {
                    channel.publish(solid_frame((i % 256) as u8, i));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let frame = channel.latest().expect("slot published");
                        // Every byte must come from the same publish.
                        let first = frame.data[0];
                        assert!(frame.data.iter().all(|&b| b == first));
                        assert_eq!(first as u64, frame.seq % 256);
                        assert_eq!(frame.data.len(), frame.expected_len());
                    }
                })
            })
            .collect();

        publisher.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
