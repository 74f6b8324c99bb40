//! Generated video source: rendered chessboards, flat and noisy frames, or a
//! still image, delivered through the same port contract as a camera.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use tracing::{info, instrument};

use super::frame::{FrameFormat, PixelFormat};
use super::port::{PortBuffer, SendError, VideoPort};
use super::CaptureError;
use crate::detect::{GridSize, Point2};
use crate::CaptureConfig;

pub const BLACK: u8 = 20;
pub const WHITE: u8 = 235;

/// Content of one synthetic frame
#[derive(Debug, Clone)]
pub enum Scene {
    Blank(u8),
    /// Horizontal ramp, dark to light
    Gradient,
    Noise(u64),
    /// Board whose first inner corner sits at `origin`
    Chessboard { origin: Point2, square: f32 },
    Image(Arc<GrayImage>),
}

/// Render a board with `grid` inner corners on a white margin.
///
/// Pixel centres are at integer coordinates, so corners placed on `.5`
/// positions fall exactly between pixels and the image is alias-free.
pub fn render_chessboard(
    width: u32,
    height: u32,
    grid: GridSize,
    origin: Point2,
    square: f32,
) -> GrayImage {
    let cols = grid.cols as i64;
    let rows = grid.rows as i64;
    GrayImage::from_fn(width, height, |x, y| {
        let u = ((x as f32 - origin.x) / square).floor() as i64;
        let v = ((y as f32 - origin.y) / square).floor() as i64;
        let on_board = (-1..cols).contains(&u) && (-1..rows).contains(&v);
        if on_board && (u + v).rem_euclid(2) == 0 {
            Luma([BLACK])
        } else {
            Luma([WHITE])
        }
    })
}

/// Inner corners of a board drawn by [`render_chessboard`], row by row
pub fn chessboard_corners(grid: GridSize, origin: Point2, square: f32) -> Vec<Point2> {
    (0..grid.rows)
        .flat_map(|r| {
            (0..grid.cols).map(move |c| Point2 {
                x: origin.x + c as f32 * square,
                y: origin.y + r as f32 * square,
            })
        })
        .collect()
}

/// Uniform noise from a xorshift generator
pub fn render_noise(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut state = seed | 1;
    GrayImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        Luma([(state >> 56) as u8])
    })
}

pub fn render_scene(scene: &Scene, width: u32, height: u32, grid: GridSize) -> GrayImage {
    match scene {
        Scene::Blank(level) => GrayImage::from_pixel(width, height, Luma([*level])),
        Scene::Gradient => {
            GrayImage::from_fn(width, height, |x, _| Luma([(x * 255 / width.max(1)) as u8]))
        }
        Scene::Noise(seed) => render_noise(width, height, *seed),
        Scene::Chessboard { origin, square } => {
            render_chessboard(width, height, grid, *origin, *square)
        }
        Scene::Image(img) if img.dimensions() == (width, height) => (**img).clone(),
        Scene::Image(img) => imageops::resize(&**img, width, height, FilterType::Triangle),
    }
}

/// Lay a luma image out as a raw buffer in `format`, neutral chroma
fn encode(luma: &GrayImage, format: &FrameFormat) -> Vec<u8> {
    let pixels = luma.as_raw();
    match format.format {
        PixelFormat::Grey => pixels.clone(),
        PixelFormat::I420 | PixelFormat::Nv12 => {
            let mut out = Vec::with_capacity(format.buffer_len());
            out.extend_from_slice(pixels);
            out.resize(format.buffer_len(), 128);
            out
        }
        PixelFormat::Yuyv => pixels.iter().flat_map(|&y| [y, 128]).collect(),
    }
}

/// Video port that plays back a list of scenes
pub struct SyntheticPort {
    scenes: Vec<Scene>,
    encoded: Vec<Option<Vec<u8>>>,
    grid: GridSize,
    repeat: bool,
    paced: bool,
    interval: Option<Duration>,
    next_due: Option<Instant>,
    format: Option<FrameFormat>,
    queued: VecDeque<PortBuffer>,
    cursor: usize,
}

impl SyntheticPort {
    /// Plays `scenes` once, as fast as buffers come back
    pub fn new(scenes: Vec<Scene>, grid: GridSize) -> Self {
        Self {
            encoded: vec![None; scenes.len()],
            scenes,
            grid,
            repeat: false,
            paced: false,
            interval: None,
            next_due: None,
            format: None,
            queued: VecDeque::new(),
            cursor: 0,
        }
    }

    /// Loop over the scenes forever
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Deliver at the configured frame rate
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// A board drifting around the frame, absent one frame in three
    pub fn demo(grid: GridSize, width: u32, height: u32) -> Self {
        const FRAMES: usize = 48;
        let square = (width.min(height) as usize / (grid.rows.max(grid.cols) + 3)).max(8) as f32;
        let room_x = (width as f32 - (grid.cols as f32 + 1.0) * square - 3.0).max(0.0);
        let room_y = (height as f32 - (grid.rows as f32 + 1.0) * square - 3.0).max(0.0);

        let scenes = (0..FRAMES)
            .map(|k| {
                if k % 3 == 2 {
                    return Scene::Blank(128);
                }
                let phase = k as f32 / FRAMES as f32 * std::f32::consts::TAU;
                let origin = Point2 {
                    x: square + 1.5 + (room_x * (0.5 + 0.5 * phase.cos())).floor(),
                    y: square + 1.5 + (room_y * (0.5 + 0.5 * phase.sin())).floor(),
                };
                Scene::Chessboard { origin, square }
            })
            .collect();
        Self::new(scenes, grid).repeating().paced()
    }

    /// Replay one image file at the configured rate
    #[instrument]
    pub fn still(path: &Path, grid: GridSize) -> Result<Self, CaptureError> {
        let img = image::open(path)?.to_luma8();
        info!(width = img.width(), height = img.height(), "still image loaded");
        Ok(Self::new(vec![Scene::Image(Arc::new(img))], grid)
            .repeating()
            .paced())
    }

    fn wait_for_slot(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }
}

impl VideoPort for SyntheticPort {
    fn configure(&mut self, config: &CaptureConfig) -> Result<FrameFormat, CaptureError> {
        let format = FrameFormat::packed(config.width, config.height, config.format);
        if self.paced {
            self.interval = Some(Duration::from_secs_f64(1.0 / f64::from(config.fps)));
        }
        self.format = Some(format);
        self.encoded.iter_mut().for_each(|slot| *slot = None);
        Ok(format)
    }

    fn send_buffer(&mut self, buffer: PortBuffer) -> Result<(), SendError> {
        self.queued.push_back(buffer);
        Ok(())
    }

    fn next_filled(&mut self) -> Result<PortBuffer, CaptureError> {
        let format = self.format.ok_or(CaptureError::NotConfigured)?;
        if self.scenes.is_empty() || (!self.repeat && self.cursor >= self.scenes.len()) {
            return Err(CaptureError::EndOfStream);
        }
        let mut buffer = self.queued.pop_front().ok_or(CaptureError::Starved)?;
        self.wait_for_slot();

        let index = self.cursor % self.scenes.len();
        let (scenes, grid) = (&self.scenes, self.grid);
        let raw = self.encoded[index].get_or_insert_with(|| {
            encode(&render_scene(&scenes[index], format.width, format.height, grid), &format)
        });

        if buffer.data.len() < raw.len() {
            buffer.data.resize(raw.len(), 0);
        }
        buffer.data[..raw.len()].copy_from_slice(raw);
        buffer.bytes_used = raw.len();
        buffer.sequence = self.cursor as u64;
        self.cursor += 1;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSnapshot;

    #[test]
    fn board_squares_meet_at_listed_corners() {
        let grid = GridSize::new(3, 4);
        let origin = Point2 { x: 40.5, y: 30.5 };
        let img = render_chessboard(160, 120, grid, origin, 10.0);
        let corners = chessboard_corners(grid, origin, 10.0);
        assert_eq!(corners.len(), 12);

        for c in &corners {
            let (x, y) = (c.x as u32, c.y as u32);
            // the four pixels around a corner form a 2x2 checker
            let tl = img.get_pixel(x, y)[0];
            let br = img.get_pixel(x + 1, y + 1)[0];
            let tr = img.get_pixel(x + 1, y)[0];
            assert_eq!(tl, br);
            assert_ne!(tl, tr);
        }
        assert_eq!(img.get_pixel(0, 0)[0], WHITE);
        assert_eq!(img.get_pixel(31, 21)[0], BLACK, "outer corner square is dark");
    }

    #[test]
    fn port_plays_scenes_once_then_ends() {
        let config = CaptureConfig {
            width: 16,
            height: 8,
            format: PixelFormat::Yuyv,
            ..CaptureConfig::default()
        };
        let mut port = SyntheticPort::new(vec![Scene::Blank(9), Scene::Gradient], GridSize::new(2, 2));
        let format = port.configure(&config).unwrap();
        assert_eq!(format.stride, 32);

        assert!(matches!(port.next_filled(), Err(CaptureError::Starved)));
        port.send_buffer(PortBuffer::with_len(format.buffer_len())).unwrap();
        let first = port.next_filled().unwrap();
        let snap = FrameSnapshot::copy_from_buffer(&format, first.filled()).unwrap();
        assert!(snap.as_slice().iter().all(|&p| p == 9));

        port.send_buffer(first).unwrap();
        let second = port.next_filled().unwrap();
        port.send_buffer(second).unwrap();
        assert!(matches!(port.next_filled(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn demo_boards_stay_inside_the_frame() {
        let grid = GridSize::new(7, 7);
        let port = SyntheticPort::demo(grid, 640, 480);
        for scene in &port.scenes {
            if let Scene::Chessboard { origin, square } = scene {
                assert!(origin.x - square >= 0.0 && origin.y - square >= 0.0);
                assert!(origin.x + 7.0 * square < 640.0);
                assert!(origin.y + 7.0 * square < 480.0);
                assert_eq!(origin.x.fract(), 0.5);
            }
        }
    }
}
