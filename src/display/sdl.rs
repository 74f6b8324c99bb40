//! SDL2 window: mirrored camera preview with the overlay layers on top.

use std::collections::BTreeMap;
use std::path::Path;

use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::render::{BlendMode, TextureCreator, WindowCanvas};
use sdl2::ttf::{Font, Sdl2TtfContext};
use sdl2::video::WindowContext;
use sdl2::EventPump;
use tracing::info;

use super::overlay::{Compositor, Placement, Rect, Surface, TextPainter, TextStyle};
use super::DisplayError;
use crate::capture::FrameSnapshot;
use crate::DisplayConfig;

/// Byte order R, G, B, A on little-endian hosts, matching [`Surface`]
const SURFACE_FORMAT: PixelFormatEnum = PixelFormatEnum::ABGR8888;

struct Preview {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

/// SDL2 window display.
/// The preview is flipped horizontally when `mirror` is set; overlay layers are
/// drawn unflipped in layer order.
pub struct Sdl2Display {
    _sdl: sdl2::Sdl,
    canvas: WindowCanvas,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    pending: BTreeMap<u8, (Placement, Surface)>,
    preview: Option<Preview>,
    mirror: bool,
    width: u32,
    height: u32,
    quit: bool,
}

impl Sdl2Display {
    pub fn new(config: &DisplayConfig, mirror: bool) -> Result<Self, DisplayError> {
        let sdl = sdl2::init().map_err(DisplayError::Sdl)?;
        let video = sdl.video().map_err(DisplayError::Sdl)?;

        let window = video
            .window("camcal", config.width, config.height)
            .position_centered()
            .build()
            .map_err(|e| DisplayError::Sdl(e.to_string()))?;
        let mut canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(|e| DisplayError::Sdl(e.to_string()))?;
        canvas.set_blend_mode(BlendMode::Blend);
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl.event_pump().map_err(DisplayError::Sdl)?;

        info!(width = config.width, height = config.height, mirror, "display window open");
        Ok(Self {
            _sdl: sdl,
            canvas,
            texture_creator,
            event_pump,
            pending: BTreeMap::new(),
            preview: None,
            mirror,
            width: config.width,
            height: config.height,
            quit: false,
        })
    }

    fn draw_preview(&mut self) -> Result<(), DisplayError> {
        let Some(preview) = &self.preview else {
            return Ok(());
        };
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, preview.width, preview.height)
            .map_err(|e| DisplayError::Texture(e.to_string()))?;
        texture
            .update(None, &preview.rgb, preview.width as usize * 3)
            .map_err(|e| DisplayError::Texture(e.to_string()))?;
        self.canvas
            .copy_ex(&texture, None, None, 0.0, None, self.mirror, false)
            .map_err(DisplayError::Texture)
    }

    fn draw_layers(&mut self) -> Result<(), DisplayError> {
        for (placement, surface) in self.pending.values() {
            let mut texture = self
                .texture_creator
                .create_texture_streaming(SURFACE_FORMAT, surface.width(), surface.height())
                .map_err(|e| DisplayError::Texture(e.to_string()))?;
            texture.set_blend_mode(BlendMode::Blend);
            texture
                .update(None, surface.as_bytes(), surface.pitch())
                .map_err(|e| DisplayError::Texture(e.to_string()))?;

            let dst = sdl2::rect::Rect::new(placement.x, placement.y, placement.width, placement.height);
            self.canvas
                .copy(&texture, None, Some(dst))
                .map_err(DisplayError::Texture)?;
        }
        Ok(())
    }
}

impl Compositor for Sdl2Display {
    fn composite(&mut self, surface: &Surface, placement: Placement) -> Result<(), DisplayError> {
        self.pending.insert(placement.layer, (placement, surface.clone()));
        Ok(())
    }

    fn present(&mut self) -> Result<(), DisplayError> {
        self.canvas.set_draw_color(Color::RGB(0, 0, 0));
        self.canvas.clear();
        self.draw_preview()?;
        self.draw_layers()?;
        self.canvas.present();
        Ok(())
    }

    fn preview(&mut self, frame: &FrameSnapshot) -> Result<(), DisplayError> {
        let rgb = frame.as_slice().iter().flat_map(|&y| [y, y, y]).collect();
        self.preview = Some(Preview {
            width: frame.width,
            height: frame.height,
            rgb,
        });
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape | Keycode::Q),
                    ..
                } => {
                    info!("Quit event received");
                    self.quit = true;
                }
                _ => {}
            }
        }
        self.quit
    }

    fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// SDL2_ttf glyph rendering
pub struct TtfTextPainter {
    font: Font<'static, 'static>,
}

impl TtfTextPainter {
    pub fn new(path: &Path, size: u32) -> Result<Self, DisplayError> {
        let font_error = |message: String| DisplayError::Font {
            path: path.to_path_buf(),
            message,
        };
        let context = sdl2::ttf::init().map_err(|e| font_error(e.to_string()))?;
        // the context must outlive every font loaded from it; one per process
        let context: &'static Sdl2TtfContext = Box::leak(Box::new(context));
        let point_size = u16::try_from(size).map_err(|_| font_error(format!("font size {size} too large")))?;
        let font = context.load_font(path, point_size).map_err(font_error)?;
        info!(path = %path.display(), size, "font loaded");
        Ok(Self { font })
    }
}

impl TextPainter for TtfTextPainter {
    fn paint_text(
        &mut self,
        surface: &mut Surface,
        area: Rect,
        text: &str,
        style: TextStyle,
    ) -> Result<(), DisplayError> {
        surface.fill_rect(area, style.background);
        if text.is_empty() {
            return Ok(());
        }

        let [r, g, b, a] = style.foreground.0;
        let glyphs = self
            .font
            .render(text)
            .blended(Color::RGBA(r, g, b, a))
            .map_err(|e| DisplayError::Text(e.to_string()))?
            .convert_format(SURFACE_FORMAT)
            .map_err(DisplayError::Text)?;

        let (gw, gh) = (glyphs.width() as usize, glyphs.height() as usize);
        let glyph_pitch = glyphs.pitch() as usize;
        let cols = gw.min(area.width as usize);
        let rows = gh.min(area.height as usize);
        let (sw, sh) = (surface.width() as i64, surface.height() as i64);
        let dst_pitch = surface.pitch();
        let dst = surface.as_bytes_mut();

        glyphs.with_lock(|src| {
            for y in 0..rows {
                let dy = i64::from(area.y) + y as i64;
                if !(0..sh).contains(&dy) {
                    continue;
                }
                for x in 0..cols {
                    let dx = i64::from(area.x) + x as i64;
                    if !(0..sw).contains(&dx) {
                        continue;
                    }
                    let s = y * glyph_pitch + x * 4;
                    if src[s + 3] == 0 {
                        continue;
                    }
                    let d = dy as usize * dst_pitch + dx as usize * 4;
                    dst[d..d + 4].copy_from_slice(&src[s..s + 4]);
                }
            }
        });
        Ok(())
    }
}
