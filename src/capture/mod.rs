pub mod frame;
pub mod port;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use thiserror::Error;

pub use frame::{FrameFormat, FrameSnapshot, PixelFormat};
pub use port::{BufferPool, PortBuffer, SendError, VideoPort};
pub use source::{FrameSource, ProducerSummary};
pub use synthetic::SyntheticPort;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Port;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open video device {path}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no video capture device found")]
    NoDevice,
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("device rejected format: requested {requested}, got {actual}")]
    FormatRejected { requested: String, actual: String },
    #[error("video port not configured")]
    NotConfigured,
    #[error("buffer pool: {0}")]
    Pool(String),
    #[error("buffer holds {actual} bytes, frame needs {expected}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("no buffer queued on the video port")]
    Starved,
    #[error("video stream ended")]
    EndOfStream,
    #[error("failed to spawn capture thread")]
    Spawn(#[source] std::io::Error),
    #[error("cannot load still image")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
