//! Diagnostic overlay: corner markers and a status line, repainted every cycle.

use tracing::trace;

use super::DisplayError;
use crate::capture::FrameSnapshot;
use crate::detect::Point2;
use crate::OverlayConfig;

/// Straight (non-premultiplied) RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba([0, 0, 0, 0]);
    /// Translucent yellow
    pub const MARKER: Rgba = Rgba([0xff, 0xff, 0x00, 0x88]);
    pub const STATUS: Rgba = Rgba([0x00, 0xff, 0x00, 0xff]);
}

/// Rectangle in surface pixels; may extend past the surface edges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// CPU-side RGBA drawing surface, row-major, 4 bytes per pixel
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// A fully transparent surface
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch in bytes
    pub fn pitch(&self) -> usize {
        self.width as usize * 4
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Fill `rect`, clipped to the surface
    pub fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let x0 = rect.x.max(0) as i64;
        let y0 = rect.y.max(0) as i64;
        let x1 = (i64::from(rect.x) + i64::from(rect.width)).min(i64::from(self.width));
        let y1 = (i64::from(rect.y) + i64::from(rect.height)).min(i64::from(self.height));
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let pitch = self.pitch();
        for y in y0 as usize..y1 as usize {
            let row = &mut self.pixels[y * pitch..(y + 1) * pitch];
            for px in row[x0 as usize * 4..x1 as usize * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&color.0);
            }
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let mut px = [0; 4];
        px.copy_from_slice(&self.pixels[i..i + 4]);
        Rgba(px)
    }

    pub fn is_clear(&self) -> bool {
        self.pixels.iter().all(|&b| b == 0)
    }
}

/// Where a surface lands on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Stacking order above the preview; higher is on top
    pub layer: u8,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub foreground: Rgba,
    pub background: Rgba,
    pub size: u32,
}

/// Puts surfaces (and the live preview) on screen.
pub trait Compositor {
    /// Queue `surface` for the next present at `placement`.
    fn composite(&mut self, surface: &Surface, placement: Placement) -> Result<(), DisplayError>;

    /// Show everything queued since the last present.
    fn present(&mut self) -> Result<(), DisplayError>;

    /// Show a camera frame underneath the overlays.
    fn preview(&mut self, _frame: &FrameSnapshot) -> Result<(), DisplayError> {
        Ok(())
    }

    /// True once the user asked to close the display.
    fn quit_requested(&mut self) -> bool {
        false
    }

    fn display_size(&self) -> (u32, u32);
}

/// Glyph rendering into a surface region.
pub trait TextPainter {
    fn paint_text(
        &mut self,
        surface: &mut Surface,
        area: Rect,
        text: &str,
        style: TextStyle,
    ) -> Result<(), DisplayError>;
}

/// Values shown on the status line
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OverlayStats {
    pub cycles: u64,
    pub video_fps: f64,
    pub consumer_fps: f64,
    pub calibration_frames: u64,
}

impl OverlayStats {
    pub fn status_line(&self) -> String {
        format!(
            "{:5} Video = {:.2} FPS, OpenCV = {:.2} FPS; {} calibration frames",
            self.cycles, self.video_fps, self.consumer_fps, self.calibration_frames
        )
    }
}

/// Owns the marker and text surfaces and repaints both every cycle.
pub struct OverlayRenderer {
    config: OverlayConfig,
    frame_width: u32,
    markers: Surface,
    text: Surface,
    status: String,
    compositor: Box<dyn Compositor>,
    painter: Box<dyn TextPainter>,
}

impl OverlayRenderer {
    pub fn new(
        config: &OverlayConfig,
        frame_width: u32,
        compositor: Box<dyn Compositor>,
        painter: Box<dyn TextPainter>,
    ) -> Self {
        Self {
            markers: Surface::new(config.marker_width, config.marker_height),
            text: Surface::new(config.text_width, config.text_height),
            config: config.clone(),
            frame_width,
            status: String::new(),
            compositor,
            painter,
        }
    }

    /// Top-left corner of the marker for a frame point, in marker-surface pixels
    pub fn marker_origin(&self, point: Point2) -> (i32, i32) {
        let half = self.config.marker_size as f32 / 2.0;
        let x = if self.config.mirror {
            self.frame_width as f32 - point.x
        } else {
            point.x
        };
        let y = point.y + self.config.marker_y_offset as f32;
        ((x - half).floor() as i32, (y - half).floor() as i32)
    }

    /// Hand the raw frame to the compositor as the preview layer.
    pub fn preview(&mut self, frame: &FrameSnapshot) -> Result<(), DisplayError> {
        self.compositor.preview(frame)
    }

    /// Full repaint: markers for `points`, status text for `stats`, then
    /// composite both and present.
    pub fn render(&mut self, points: &[Point2], stats: &OverlayStats) -> Result<(), DisplayError> {
        self.markers.clear();
        self.text.clear();

        let size = self.config.marker_size;
        for &point in points {
            let (x, y) = self.marker_origin(point);
            self.markers.fill_rect(Rect::new(x, y, size, size), Rgba::MARKER);
        }

        self.status = stats.status_line();
        let area = Rect::new(0, 0, self.text.width(), self.text.height());
        let style = TextStyle {
            foreground: Rgba::STATUS,
            background: Rgba::TRANSPARENT,
            size: self.config.font_size,
        };
        self.painter.paint_text(&mut self.text, area, &self.status, style)?;

        let (display_w, display_h) = self.compositor.display_size();
        self.compositor.composite(
            &self.markers,
            Placement {
                layer: 1,
                x: 0,
                y: 0,
                width: display_w,
                height: display_h,
            },
        )?;
        self.compositor.composite(
            &self.text,
            Placement {
                layer: 2,
                x: 0,
                // offset follows the display width, not its height
                y: (display_w / 16) as i32,
                width: self.text.width(),
                height: self.text.height(),
            },
        )?;
        self.compositor.present()?;

        trace!(markers = points.len(), "overlay presented");
        Ok(())
    }

    pub fn quit_requested(&mut self) -> bool {
        self.compositor.quit_requested()
    }

    /// Text painted by the last [`OverlayRenderer::render`]
    pub fn status_text(&self) -> &str {
        &self.status
    }

    pub fn markers(&self) -> &Surface {
        &self.markers
    }

    pub fn text_surface(&self) -> &Surface {
        &self.text
    }
}
