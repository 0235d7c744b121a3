//! GStreamer capture backend for URI and file sources.
//!
//! Decodes any URI GStreamer understands (RTSP, HTTP, local files) into
//! packed RGB frames through a `uridecodebin ! videoconvert ! videoscale
//! ! appsink` pipeline. The appsink is configured lossy (`max-buffers=1
//! drop=true`) so a slow consumer watches the newest frame instead of
//! building a backlog.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::Duration;

use super::{effective_fps, CaptureConfig, StreamProps};
use crate::frame::Frame;

pub(crate) struct UriCapture {
    config: CaptureConfig,
    uri: String,
    active: Option<ActivePipeline>,
    frame_count: u64,
}

struct ActivePipeline {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    props: StreamProps,
    /// First decoded frame, pulled during open to learn negotiated caps.
    pending: Option<Frame>,
}

impl UriCapture {
    pub(crate) fn new(config: CaptureConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        let uri = normalize_uri(&config.source)?;
        Ok(Self {
            config,
            uri,
            active: None,
            frame_count: 0,
        })
    }

    pub(crate) fn open(&mut self) -> Result<StreamProps> {
        self.close();

        let mut caps = String::from("video/x-raw,format=RGB");
        if self.config.width > 0 && self.config.height > 0 {
            caps.push_str(&format!(
                ",width={},height={}",
                self.config.width, self.config.height
            ));
        }
        let description = format!(
            "uridecodebin uri={} ! videoconvert ! videoscale ! {} ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            self.uri, caps
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;
        let appsink = pipeline
            .by_name("sink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set capture pipeline to Playing")?;

        // Pull the first sample so the negotiated geometry and rate are
        // known before the source is reported Connected.
        let sample = match appsink.try_pull_sample(gstreamer::ClockTime::from_seconds(5)) {
            Some(sample) => sample,
            None => {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(pipeline_error(&pipeline)
                    .unwrap_or_else(|| anyhow!("no frame within 5s of opening {}", self.uri)));
            }
        };

        self.frame_count = 0;
        let (frame, props) = self.sample_to_frame(&sample)?;
        self.frame_count = 1;
        log::info!(
            "capture: connected to {} ({}x{} @ {:.1} fps)",
            self.uri,
            props.width,
            props.height,
            props.fps
        );
        self.active = Some(ActivePipeline {
            pipeline,
            appsink,
            props,
            pending: Some(frame),
        });
        Ok(props)
    }

    pub(crate) fn close(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.pipeline.set_state(gstreamer::State::Null);
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub(crate) fn read_frame(&mut self) -> Result<Frame> {
        let timeout = self.read_timeout();
        let active = self.active.as_mut().context("capture is not open")?;
        if let Some(frame) = active.pending.take() {
            return Ok(frame);
        }

        let sample = active
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                timeout.as_millis() as u64
            ))
            .ok_or_else(|| {
                pipeline_error(&active.pipeline).unwrap_or_else(|| anyhow!("stream stalled"))
            })?;

        let active_props = active.props;
        let (frame, _) = self
            .sample_to_frame_with(&sample, active_props)
            .context("decode capture sample")?;
        self.frame_count += 1;
        Ok(frame)
    }

    pub(crate) fn describe(&self) -> &str {
        &self.uri
    }

    fn read_timeout(&self) -> Duration {
        let fps = self
            .active
            .as_ref()
            .map(|active| active.props.fps)
            .unwrap_or(self.config.fps);
        let base_ms = if fps > 0.0 {
            ((1000.0 / fps) * 4.0) as u64
        } else {
            500
        };
        Duration::from_millis(base_ms.max(500))
    }

    fn sample_to_frame(&mut self, sample: &gstreamer::Sample) -> Result<(Frame, StreamProps)> {
        let caps = sample.caps().context("capture sample missing caps")?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .context("parse capture caps as video info")?;
        let fps = {
            let fraction = info.fps();
            if fraction.denom() > 0 {
                fraction.numer() as f64 / fraction.denom() as f64
            } else {
                0.0
            }
        };
        let props = StreamProps {
            width: info.width(),
            height: info.height(),
            fps: effective_fps(fps, self.config.fps),
        };
        self.sample_to_frame_with(sample, props)
    }

    fn sample_to_frame_with(
        &mut self,
        sample: &gstreamer::Sample,
        props: StreamProps,
    ) -> Result<(Frame, StreamProps)> {
        let buffer = sample.buffer().context("capture sample missing buffer")?;
        let caps = sample.caps().context("capture sample missing caps")?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .context("parse capture caps as video info")?;

        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * 3;
        let stride = info.stride()[0] as usize;

        let map = buffer.map_readable().context("map capture buffer")?;
        let data = map.as_slice();

        let pixels = if stride == row_bytes {
            data.get(..row_bytes * height as usize)
                .context("capture buffer is too short")?
                .to_vec()
        } else {
            let mut pixels = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                let end = start + row_bytes;
                pixels.extend_from_slice(
                    data.get(start..end)
                        .context("capture buffer row is out of bounds")?,
                );
            }
            pixels
        };

        Ok((
            Frame::new(width, height, self.frame_count + 1, pixels),
            props,
        ))
    }
}

fn pipeline_error(pipeline: &gstreamer::Pipeline) -> Option<anyhow::Error> {
    let bus = pipeline.bus()?;
    while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
        use gstreamer::MessageView;
        match message.view() {
            MessageView::Error(err) => {
                return Some(anyhow!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ));
            }
            MessageView::Eos(..) => {
                return Some(anyhow!("stream reached end of stream"));
            }
            _ => {}
        }
    }
    None
}

/// Accept both URIs and bare filesystem paths.
fn normalize_uri(descriptor: &str) -> Result<String> {
    if descriptor.contains("://") {
        return Ok(descriptor.to_string());
    }
    let absolute = std::fs::canonicalize(descriptor)
        .with_context(|| format!("resolve capture path {}", descriptor))?;
    Ok(format!("file://{}", absolute.display()))
}
