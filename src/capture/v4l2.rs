//! V4L2 capture backend for local device indices.
//!
//! Opens `/dev/video<N>` style devices through libv4l, requests packed
//! RGB at the configured geometry and rate, and accepts whatever the
//! driver actually provides. The mmap stream borrows from the device
//! handle, so the two are kept together in a self-referencing cell.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{effective_fps, CaptureConfig, StreamProps};
use crate::frame::Frame;

pub(crate) struct V4l2Capture {
    config: CaptureConfig,
    path: String,
    state: Option<V4l2State>,
    props: StreamProps,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Capture {
    pub(crate) fn new(config: CaptureConfig) -> Result<Self> {
        let index: usize = config
            .source
            .trim()
            .parse()
            .map_err(|_| anyhow!("device index '{}' is not a number", config.source))?;
        let path = format!("/dev/video{}", index);
        let props = StreamProps {
            width: config.width,
            height: config.height,
            fps: effective_fps(0.0, config.fps),
        };
        Ok(Self {
            config,
            path,
            state: None,
            props,
            frame_count: 0,
        })
    }

    pub(crate) fn open(&mut self) -> Result<StreamProps> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.close();

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open capture device {}", self.path))?;

        let mut format = device.format().context("read device format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("capture: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read device format after set failure")?
            }
        };

        let mut reported_fps = 0.0;
        if self.config.fps > 0.0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.fps as u32);
            if let Err(err) = device.set_params(&params) {
                log::warn!("capture: failed to set fps on {}: {}", self.path, err);
            }
        }
        if let Ok(params) = device.params() {
            let interval = params.interval;
            if interval.numerator > 0 {
                reported_fps = interval.denominator as f64 / interval.numerator as f64;
            }
        }

        self.props = StreamProps {
            width: format.width,
            height: format.height,
            fps: effective_fps(reported_fps, self.config.fps),
        };

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create capture buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        self.frame_count = 0;

        log::info!(
            "capture: connected to {} ({}x{} @ {:.1} fps)",
            self.path,
            self.props.width,
            self.props.height,
            self.props.fps
        );
        Ok(self.props)
    }

    pub(crate) fn close(&mut self) {
        self.state = None;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub(crate) fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("capture device is not open")?;
        let expected = self.props.width as usize * self.props.height as usize * 3;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .context("read device frame")?;
        if buf.len() < expected {
            return Err(anyhow!(
                "device frame too short: expected {} bytes, got {}",
                expected,
                buf.len()
            ));
        }

        self.frame_count += 1;
        Ok(Frame::new(
            self.props.width,
            self.props.height,
            self.frame_count,
            buf[..expected].to_vec(),
        ))
    }

    pub(crate) fn describe(&self) -> &str {
        &self.path
    }
}
