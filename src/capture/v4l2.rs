//! V4L2 camera port: mmap streaming, copied into pooled buffers

use std::collections::VecDeque;

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::FrameFormat;
use super::port::{PortBuffer, SendError, VideoPort};
use super::CaptureError;
use crate::CaptureConfig;

pub struct V4l2Port {
    path: String,
    device: Device,
    stream: Option<MmapStream<'static>>,
    queued: VecDeque<PortBuffer>,
    format: Option<FrameFormat>,
}

impl V4l2Port {
    #[instrument]
    pub fn open(path: &str) -> Result<Self, CaptureError> {
        let device = Device::with_path(path).map_err(|source| CaptureError::Open {
            path: path.to_string(),
            source,
        })?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::NotCapture(path.to_string()));
        }

        Ok(Self {
            path: path.to_string(),
            device,
            stream: None,
            queued: VecDeque::new(),
            format: None,
        })
    }
}

impl VideoPort for V4l2Port {
    #[instrument(skip_all, fields(device = %self.path))]
    fn configure(&mut self, config: &CaptureConfig) -> Result<FrameFormat, CaptureError> {
        let requested = FourCC::new(&config.format.fourcc());
        let mut fmt = self.device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = requested;

        let actual = self.device.set_format(&fmt)?;
        if actual.fourcc != requested {
            return Err(CaptureError::FormatRejected {
                requested: format!("{} {}x{}", requested, config.width, config.height),
                actual: format!("{} {}x{}", actual.fourcc, actual.width, actual.height),
            });
        }

        if let Err(err) = self.device.set_params(&Parameters::with_fps(config.fps)) {
            warn!(error = %err, fps = config.fps, "frame rate not accepted, using driver default");
        }

        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, config.driver_buffers)?;
        self.stream = Some(stream);
        info!(
            "Capture stream started with {} driver buffers",
            config.driver_buffers
        );

        let format = FrameFormat {
            width: actual.width,
            height: actual.height,
            stride: actual.stride,
            format: config.format,
        };
        self.format = Some(format);
        Ok(format)
    }

    fn send_buffer(&mut self, buffer: PortBuffer) -> Result<(), SendError> {
        self.queued.push_back(buffer);
        Ok(())
    }

    fn next_filled(&mut self) -> Result<PortBuffer, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::NotConfigured)?;
        if self.queued.is_empty() {
            return Err(CaptureError::Starved);
        }

        let (data, meta) = stream.next()?;
        let used = match meta.bytesused as usize {
            0 => data.len(),
            n => n.min(data.len()),
        };

        let mut buffer = self.queued.pop_front().ok_or(CaptureError::Starved)?;
        if buffer.data.len() < used {
            buffer.data.resize(used, 0);
        }
        buffer.data[..used].copy_from_slice(&data[..used]);
        buffer.bytes_used = used;
        buffer.sequence = u64::from(meta.sequence);
        Ok(buffer)
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        // dropping the stream turns streaming off and unmaps the buffers
        self.stream = None;
        info!(device = %self.path, "capture stream stopped");
        Ok(())
    }
}
