//! Session recording and snapshots.
//!
//! `Recorder` is a two-state machine (Idle / Active) around a frame
//! writer. A session exists only while Active: `start` creates the output
//! file and the writer, `stop` flushes and closes both. At most one
//! session ever exists; starting while Active reports failure and leaves
//! the running session untouched.
//!
//! Writers:
//! - `record-gstreamer` feature: encodes through a GStreamer appsrc
//!   pipeline using the configured codec and container.
//! - built-in fallback: an MJPEG stream (concatenated JPEG frames),
//!   playable by common tooling, with no native dependencies.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

const SESSION_PREFIX: &str = "sar";
const SNAPSHOT_PREFIX: &str = "snapshot";
const JPEG_QUALITY: u8 = 85;

// ----------------------------------------------------------------------------
// Codec mapping
// ----------------------------------------------------------------------------

/// Fixed mapping from configured codec names to encoders. Unrecognized
/// names fall back to MPEG-4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Mpeg4,
    H264,
    Xvid,
    Mjpeg,
}

impl Codec {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "mp4v" => Codec::Mpeg4,
            "avc1" | "h264" => Codec::H264,
            "xvid" => Codec::Xvid,
            "mjpg" | "mjpeg" => Codec::Mjpeg,
            other => {
                log::warn!("unknown codec '{}', falling back to mp4v", other);
                Codec::Mpeg4
            }
        }
    }

    /// GStreamer encoder element for this codec.
    #[cfg(feature = "record-gstreamer")]
    fn gst_encoder(self) -> &'static str {
        match self {
            // Xvid is MPEG-4 part 2; the stock encoder covers both names.
            Codec::Mpeg4 | Codec::Xvid => "avenc_mpeg4",
            Codec::H264 => "x264enc",
            Codec::Mjpeg => "jpegenc",
        }
    }
}

// ----------------------------------------------------------------------------
// Recorder
// ----------------------------------------------------------------------------

/// Recording configuration, resolved from the application config.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub output_dir: PathBuf,
    /// Container format used for session filenames ("mp4", "avi", ...).
    pub container: String,
    /// Codec name, resolved through [`Codec::from_name`].
    pub codec: String,
    /// Whether the overlay-composited frame is recorded instead of the
    /// clean feed.
    pub include_overlay: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("./recordings"),
            container: "mp4".to_string(),
            codec: "mp4v".to_string(),
            include_overlay: true,
        }
    }
}

struct RecordingSession {
    path: PathBuf,
    writer: Box<dyn FrameWriter>,
}

/// Idle/Active state machine around a frame writer.
pub struct Recorder {
    config: RecorderConfig,
    session: Option<RecordingSession>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        if config.enabled {
            if let Err(err) = std::fs::create_dir_all(&config.output_dir) {
                log::warn!(
                    "could not create recording directory {}: {}",
                    config.output_dir.display(),
                    err
                );
            }
        }
        Self {
            config,
            session: None,
        }
    }

    /// Open a new session at the given geometry and rate.
    ///
    /// Returns `false` without side effects when already Active, when
    /// recording is disabled, or when the writer cannot be opened. The
    /// geometry should be the source's negotiated values; frames passed
    /// to [`write_frame`](Recorder::write_frame) must match it.
    pub fn start(&mut self, width: u32, height: u32, fps: f64) -> bool {
        if self.session.is_some() {
            log::info!("recording already active");
            return false;
        }
        if !self.config.enabled {
            log::info!("recording is disabled by configuration");
            return false;
        }
        if width == 0 || height == 0 {
            log::warn!("refusing to record a {}x{} stream", width, height);
            return false;
        }

        let path = unique_path(
            &self.config.output_dir,
            SESSION_PREFIX,
            &session_extension(&self.config),
        );
        match open_writer(&self.config, &path, width, height, fps) {
            Ok(writer) => {
                log::info!("recording started: {}", path.display());
                self.session = Some(RecordingSession { path, writer });
                true
            }
            Err(err) => {
                log::error!("failed to open video writer {}: {:#}", path.display(), err);
                false
            }
        }
    }

    /// Flush and close the current session. Safe no-op when Idle.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Err(err) = session.writer.finish() {
            log::error!(
                "failed to finalize recording {}: {:#}",
                session.path.display(),
                err
            );
        }
        log::info!("recording stopped: {}", session.path.display());
    }

    /// Append a frame to the active session. No-op when Idle. The frame's
    /// geometry matching the `start` geometry is a caller precondition.
    pub fn write_frame(&mut self, frame: &Frame) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(err) = session.writer.append(frame) {
            log::error!(
                "failed to write frame to {}: {:#}; stopping recording",
                session.path.display(),
                err
            );
            self.stop();
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Output path of the active session, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|session| session.path.as_path())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Writers
// ----------------------------------------------------------------------------

trait FrameWriter {
    fn append(&mut self, frame: &Frame) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

#[cfg(feature = "record-gstreamer")]
fn open_writer(
    config: &RecorderConfig,
    path: &Path,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<Box<dyn FrameWriter>> {
    Ok(Box::new(gst_writer::GstWriter::create(
        path,
        Codec::from_name(&config.codec),
        &config.container,
        width,
        height,
        fps,
    )?))
}

#[cfg(not(feature = "record-gstreamer"))]
fn open_writer(
    config: &RecorderConfig,
    path: &Path,
    _width: u32,
    _height: u32,
    _fps: f64,
) -> Result<Box<dyn FrameWriter>> {
    let codec = Codec::from_name(&config.codec);
    if codec != Codec::Mjpeg {
        log::info!(
            "codec '{}' needs the record-gstreamer feature; writing MJPEG instead",
            config.codec
        );
    }
    Ok(Box::new(MjpegWriter::create(path)?))
}

fn session_extension(config: &RecorderConfig) -> String {
    #[cfg(feature = "record-gstreamer")]
    {
        config.container.clone()
    }
    #[cfg(not(feature = "record-gstreamer"))]
    {
        if config.container != "mjpeg" {
            log::debug!(
                "container '{}' needs the record-gstreamer feature; using .mjpeg",
                config.container
            );
        }
        "mjpeg".to_string()
    }
}

/// Concatenated-JPEG stream writer. Every frame is a complete JPEG image,
/// which is exactly what an MJPEG elementary stream is.
struct MjpegWriter {
    out: BufWriter<File>,
}

impl MjpegWriter {
    fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }
}

impl FrameWriter for MjpegWriter {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut self.out, JPEG_QUALITY)
            .encode(
                &frame.data,
                frame.width,
                frame.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode frame as JPEG")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().context("flush recording")?;
        Ok(())
    }
}

#[cfg(feature = "record-gstreamer")]
mod gst_writer {
    //! GStreamer encoding writer: appsrc -> videoconvert -> encoder ->
    //! muxer -> filesink.

    use anyhow::{anyhow, Context, Result};
    use gstreamer::prelude::*;
    use std::path::Path;

    use super::{Codec, FrameWriter};
    use crate::frame::Frame;

    pub(super) struct GstWriter {
        pipeline: gstreamer::Pipeline,
        appsrc: gstreamer_app::AppSrc,
        frame_duration: gstreamer::ClockTime,
        frames_written: u64,
        finished: bool,
    }

    impl GstWriter {
        pub(super) fn create(
            path: &Path,
            codec: Codec,
            container: &str,
            width: u32,
            height: u32,
            fps: f64,
        ) -> Result<Self> {
            gstreamer::init().context("initialize gstreamer")?;

            let fps_n = (fps.max(1.0) * 1000.0).round() as i32;
            let description = format!(
                "appsrc name=src is-live=true format=time ! videoconvert ! {} ! {} ! \
                 filesink location={}",
                codec.gst_encoder(),
                muxer_for(container),
                path.display()
            );
            let pipeline = gstreamer::parse::launch(&description)
                .context("build recording pipeline")?
                .downcast::<gstreamer::Pipeline>()
                .map_err(|_| anyhow!("recording pipeline is not a Pipeline"))?;
            let appsrc = pipeline
                .by_name("src")
                .context("appsrc element missing from pipeline")?
                .downcast::<gstreamer_app::AppSrc>()
                .map_err(|_| anyhow!("appsrc element has unexpected type"))?;

            let caps = gstreamer_video::VideoInfo::builder(
                gstreamer_video::VideoFormat::Rgb,
                width,
                height,
            )
            .fps(gstreamer::Fraction::new(fps_n, 1000))
            .build()
            .context("build recording caps")?
            .to_caps()
            .context("convert recording caps")?;
            appsrc.set_caps(Some(&caps));

            pipeline
                .set_state(gstreamer::State::Playing)
                .context("set recording pipeline to Playing")?;

            let frame_duration =
                gstreamer::ClockTime::from_nseconds((1_000_000_000.0 / fps.max(1.0)) as u64);
            Ok(Self {
                pipeline,
                appsrc,
                frame_duration,
                frames_written: 0,
                finished: false,
            })
        }
    }

    impl FrameWriter for GstWriter {
        fn append(&mut self, frame: &Frame) -> Result<()> {
            let mut buffer = gstreamer::Buffer::with_size(frame.data.len())
                .context("allocate recording buffer")?;
            {
                let buffer = buffer
                    .get_mut()
                    .ok_or_else(|| anyhow!("recording buffer is not writable"))?;
                buffer.set_pts(self.frame_duration * self.frames_written);
                buffer.set_duration(self.frame_duration);
                let mut map = buffer.map_writable().context("map recording buffer")?;
                map.as_mut_slice().copy_from_slice(&frame.data);
            }
            self.appsrc
                .push_buffer(buffer)
                .map_err(|err| anyhow!("push frame to encoder: {}", err))?;
            self.frames_written += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            if self.finished {
                return Ok(());
            }
            self.finished = true;
            self.appsrc
                .end_of_stream()
                .map_err(|err| anyhow!("signal end of stream: {}", err))?;
            if let Some(bus) = self.pipeline.bus() {
                use gstreamer::MessageView;
                while let Some(message) =
                    bus.timed_pop(gstreamer::ClockTime::from_seconds(5))
                {
                    match message.view() {
                        MessageView::Eos(..) => break,
                        MessageView::Error(err) => {
                            let _ = self.pipeline.set_state(gstreamer::State::Null);
                            return Err(anyhow!("finalize recording: {}", err.error()));
                        }
                        _ => {}
                    }
                }
            }
            self.pipeline
                .set_state(gstreamer::State::Null)
                .context("stop recording pipeline")?;
            Ok(())
        }
    }

    impl Drop for GstWriter {
        fn drop(&mut self) {
            if !self.finished {
                let _ = self.pipeline.set_state(gstreamer::State::Null);
            }
        }
    }

    fn muxer_for(container: &str) -> &'static str {
        match container.to_ascii_lowercase().as_str() {
            "mp4" => "mp4mux",
            "avi" => "avimux",
            "mkv" => "matroskamux",
            "mov" => "qtmux",
            other => {
                log::warn!("unknown container '{}', falling back to mp4", other);
                "mp4mux"
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Artifact naming
// ----------------------------------------------------------------------------

/// Timestamped, collision-avoided path under `dir`.
fn unique_path(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let base = format!("{}_{}", prefix, stamp);
    let mut candidate = dir.join(format!("{}.{}", base, extension));
    let mut suffix = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.{}", base, suffix, extension));
        suffix += 1;
    }
    candidate
}

/// Write a still snapshot of `frame` as PNG under `dir`, returning the
/// path.
pub fn save_snapshot(frame: &Frame, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create snapshot directory {}", dir.display()))?;
    let path = unique_path(dir, SNAPSHOT_PREFIX, "png");
    image::save_buffer(
        &path,
        &frame.data,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgb8,
    )
    .with_context(|| format!("write snapshot {}", path.display()))?;
    log::info!("snapshot saved: {}", path.display());
    Ok(path)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(width: u32, height: u32) -> Frame {
        let mut data = vec![0u8; (width * height * 3) as usize];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        Frame::new(width, height, 1, data)
    }

    fn test_recorder(dir: &Path) -> Recorder {
        Recorder::new(RecorderConfig {
            output_dir: dir.to_path_buf(),
            ..RecorderConfig::default()
        })
    }

    #[test]
    fn start_write_stop_produces_a_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = test_recorder(dir.path());

        assert!(recorder.start(64, 48, 30.0));
        assert!(recorder.is_recording());
        let path = recorder.current_path().unwrap().to_path_buf();

        recorder.write_frame(&test_frame(64, 48));
        recorder.write_frame(&test_frame(64, 48));
        recorder.stop();

        assert!(!recorder.is_recording());
        assert!(recorder.current_path().is_none());
        let bytes = std::fs::read(&path)?;
        assert!(!bytes.is_empty());
        // Built-in writer emits an MJPEG stream: frames start with the
        // JPEG start-of-image marker.
        #[cfg(not(feature = "record-gstreamer"))]
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn start_while_active_fails_and_keeps_the_session() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = test_recorder(dir.path());

        assert!(recorder.start(64, 48, 30.0));
        let first = recorder.current_path().unwrap().to_path_buf();

        assert!(!recorder.start(128, 96, 25.0));
        assert_eq!(recorder.current_path().unwrap(), first.as_path());
        assert!(recorder.is_recording());

        recorder.stop();
        Ok(())
    }

    #[test]
    fn stop_while_idle_is_a_safe_noop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = test_recorder(dir.path());
        recorder.stop();
        recorder.stop();
        assert!(!recorder.is_recording());
        Ok(())
    }

    #[test]
    fn write_frame_while_idle_is_a_noop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = test_recorder(dir.path());
        recorder.write_frame(&test_frame(64, 48));
        assert!(!recorder.is_recording());
        Ok(())
    }

    #[test]
    fn disabled_recording_rejects_start() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = Recorder::new(RecorderConfig {
            enabled: false,
            output_dir: dir.path().to_path_buf(),
            ..RecorderConfig::default()
        });
        assert!(!recorder.start(64, 48, 30.0));
        assert!(!recorder.is_recording());
        Ok(())
    }

    #[test]
    fn zero_geometry_rejects_start() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = test_recorder(dir.path());
        assert!(!recorder.start(0, 0, 30.0));
        Ok(())
    }

    #[test]
    fn back_to_back_sessions_get_distinct_paths() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = test_recorder(dir.path());

        assert!(recorder.start(64, 48, 30.0));
        let first = recorder.current_path().unwrap().to_path_buf();
        recorder.stop();

        assert!(recorder.start(64, 48, 30.0));
        let second = recorder.current_path().unwrap().to_path_buf();
        recorder.stop();

        // Same-second restarts collide on the timestamp; the suffix
        // disambiguates.
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn unwritable_output_directory_fails_start() {
        let mut recorder = Recorder::new(RecorderConfig {
            output_dir: PathBuf::from("/proc/definitely/not/writable"),
            ..RecorderConfig::default()
        });
        assert!(!recorder.start(64, 48, 30.0));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn snapshot_writes_a_png() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = save_snapshot(&test_frame(32, 24), dir.path())?;
        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
        Ok(())
    }

    #[test]
    fn codec_names_resolve_with_fallback() {
        assert_eq!(Codec::from_name("mp4v"), Codec::Mpeg4);
        assert_eq!(Codec::from_name("h264"), Codec::H264);
        assert_eq!(Codec::from_name("AVC1"), Codec::H264);
        assert_eq!(Codec::from_name("xvid"), Codec::Xvid);
        assert_eq!(Codec::from_name("mjpg"), Codec::Mjpeg);
        assert_eq!(Codec::from_name("definitely-not-a-codec"), Codec::Mpeg4);
    }
}
