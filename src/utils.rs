use std::path::Path;

use tracing::info;
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::frame::PixelFormat;
use crate::capture::CaptureError;

/// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

/// Formats in order of preference: luma-first layouts need no conversion
const PREFERRED: [PixelFormat; 4] = [
    PixelFormat::Grey,
    PixelFormat::Nv12,
    PixelFormat::I420,
    PixelFormat::Yuyv,
];

/// Auto-detect the first capture device offering a usable format
pub fn auto_detect_device() -> Result<FoundDevice, CaptureError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        let offered: Vec<PixelFormat> = formats
            .iter()
            .filter_map(|f| PixelFormat::from_fourcc(&f.fourcc.repr))
            .collect();
        if let Some(format) = PREFERRED.into_iter().find(|p| offered.contains(p)) {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            return Ok(FoundDevice { path, format });
        }
    }

    Err(CaptureError::NoDevice)
}
