use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::CaptureError;

/// Pixel formats a video port can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit luma only
    Grey,
    /// Planar Y, U, V (4:2:0)
    I420,
    /// Y plane followed by interleaved UV (4:2:0)
    Nv12,
    /// Packed Y0 U Y1 V (4:2:2)
    Yuyv,
}

impl PixelFormat {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            Self::Grey => *b"GREY",
            Self::I420 => *b"YU12",
            Self::Nv12 => *b"NV12",
            Self::Yuyv => *b"YUYV",
        }
    }

    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"GREY" => Some(Self::Grey),
            b"YU12" => Some(Self::I420),
            b"NV12" => Some(Self::Nv12),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    /// Bytes per pixel on a luma row
    pub fn luma_step(self) -> usize {
        match self {
            Self::Yuyv => 2,
            _ => 1,
        }
    }
}

/// Geometry agreed with the video port at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the luma plane (or of the packed image)
    pub stride: u32,
    pub format: PixelFormat,
}

impl FrameFormat {
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: width * format.luma_step() as u32,
            format,
        }
    }

    /// Size of one complete hardware buffer
    pub fn buffer_len(&self) -> usize {
        let luma = self.stride as usize * self.height as usize;
        match self.format {
            PixelFormat::Grey | PixelFormat::Yuyv => luma,
            PixelFormat::I420 | PixelFormat::Nv12 => luma + luma / 2,
        }
    }

    /// Bytes that must be present to read the whole luma plane
    fn luma_len(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        let row = self.width as usize * self.format.luma_step();
        self.stride as usize * (self.height as usize - 1) + row
    }
}

/// Pixel layout of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Luma8,
}

/// An isolated copy of one frame's luma plane
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub width: u32,
    pub height: u32,
    pub format: SnapshotFormat,
    /// Tightly packed rows, `width * height` bytes
    pub data: Bytes,
    pub captured_at: Instant,
}

impl FrameSnapshot {
    pub fn luma(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            format: SnapshotFormat::Luma8,
            data,
            captured_at: Instant::now(),
        }
    }

    /// Copies the luma plane out of a raw hardware buffer. The result shares
    /// nothing with `raw`, so the buffer can go straight back to the port.
    pub fn copy_from_buffer(format: &FrameFormat, raw: &[u8]) -> Result<Self, CaptureError> {
        let needed = format.luma_len();
        if raw.len() < needed {
            return Err(CaptureError::ShortBuffer {
                expected: needed,
                actual: raw.len(),
            });
        }

        let width = format.width as usize;
        let stride = format.stride as usize;
        let data = match format.format {
            PixelFormat::Grey | PixelFormat::I420 | PixelFormat::Nv12 if stride == width => {
                Bytes::copy_from_slice(&raw[..width * format.height as usize])
            }
            PixelFormat::Grey | PixelFormat::I420 | PixelFormat::Nv12 => {
                let mut luma = Vec::with_capacity(width * format.height as usize);
                for row in raw.chunks(stride).take(format.height as usize) {
                    luma.extend_from_slice(&row[..width]);
                }
                Bytes::from(luma)
            }
            PixelFormat::Yuyv => {
                let mut luma = Vec::with_capacity(width * format.height as usize);
                for row in raw.chunks(stride).take(format.height as usize) {
                    luma.extend(row[..width * 2].iter().step_by(2));
                }
                Bytes::from(luma)
            }
        };

        Ok(Self::luma(format.width, format.height, data))
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
