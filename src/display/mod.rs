pub mod headless;
pub mod overlay;
#[cfg(feature = "sdl")]
pub mod sdl;

use std::path::PathBuf;

use thiserror::Error;

pub use headless::{HeadlessDisplay, HeadlessText};
pub use overlay::{
    Compositor, OverlayRenderer, OverlayStats, Placement, Rect, Rgba, Surface, TextPainter,
    TextStyle,
};
#[cfg(feature = "sdl")]
pub use sdl::{Sdl2Display, TtfTextPainter};

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("SDL: {0}")]
    Sdl(String),
    #[error("texture upload failed: {0}")]
    Texture(String),
    #[error("cannot load font {}: {message}", path.display())]
    Font { path: PathBuf, message: String },
    #[error("text rendering failed: {0}")]
    Text(String),
}
