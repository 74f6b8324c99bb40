pub mod calib_log;
pub mod capture;
pub mod detect;
pub mod display;
pub mod pipeline;
#[cfg(feature = "v4l2")]
pub mod utils;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::frame::PixelFormat;
use crate::detect::GridSize;

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "CAMCAL_CONFIG";

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "camcal.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pattern: PatternConfig,
    pub overlay: OverlayConfig,
    pub display: DisplayConfig,
    pub log: LogConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device node; empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Buffers cycled between the producer and the video port
    pub buffer_count: u32,
    /// Buffers the V4L2 driver streams into
    pub driver_buffers: u32,
}

/// Inner-corner geometry of the calibration chessboard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub marker_width: u32,
    pub marker_height: u32,
    pub text_width: u32,
    pub text_height: u32,
    /// Edge length of a corner marker in overlay pixels
    pub marker_size: u32,
    /// Vertical shift between frame rows and marker surface rows
    pub marker_y_offset: i32,
    /// Mirror markers horizontally to match the mirrored preview
    pub mirror: bool,
    pub font_size: u32,
    pub font_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayBackend {
    /// SDL2 window
    Window,
    /// No window; overlays are composed but never shown
    Headless,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub backend: DisplayBackend,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// V4L2 camera
    Camera,
    /// Generated chessboard sequence
    Synthetic,
    /// A still image replayed at the capture rate
    Still,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub still_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Grey,
            buffer_count: 1,
            driver_buffers: 4,
        }
    }
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self { rows: 7, cols: 7 }
    }
}

impl PatternConfig {
    pub fn grid(&self) -> GridSize {
        GridSize::new(self.rows, self.cols)
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            marker_width: 640,
            marker_height: 512,
            text_width: 640,
            text_height: 200,
            marker_size: 4,
            marker_y_offset: 16,
            mirror: true,
            font_size: 25,
            font_path: "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf".into(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "sdl") {
                DisplayBackend::Window
            } else {
                DisplayBackend::Headless
            },
            width: 640,
            height: 480,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: "calibration_data.txt".into(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: if cfg!(feature = "v4l2") {
                SourceKind::Camera
            } else {
                SourceKind::Synthetic
            },
            still_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Layers `camcal.toml` (or `$CAMCAL_CONFIG`) and `CAMCAL__SECTION__KEY`
    /// environment variables over the built-in defaults, then validates.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        let loaded: Self = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(
                config::Environment::with_prefix("CAMCAL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let c = &self.capture;
        if c.width == 0 || c.height == 0 {
            return invalid(format!("capture size {}x{} is empty", c.width, c.height));
        }
        if c.fps == 0 {
            return invalid("capture fps must be positive".into());
        }
        if c.buffer_count == 0 || c.driver_buffers == 0 {
            return invalid("capture needs at least one buffer".into());
        }
        if self.pattern.rows < 2 || self.pattern.cols < 2 {
            return invalid(format!(
                "pattern {}x{} needs at least 2x2 inner corners",
                self.pattern.rows, self.pattern.cols
            ));
        }

        let o = &self.overlay;
        if o.marker_width < c.width || o.marker_height < c.height {
            return invalid(format!(
                "marker overlay {}x{} is smaller than the {}x{} frame",
                o.marker_width, o.marker_height, c.width, c.height
            ));
        }
        if o.text_width == 0 || o.text_height == 0 || o.marker_size == 0 || o.font_size == 0 {
            return invalid("overlay text surface, marker and font sizes must be positive".into());
        }
        if self.display.width == 0 || self.display.height == 0 {
            return invalid("display size must be positive".into());
        }
        if self.source.kind == SourceKind::Still && self.source.still_path.is_none() {
            return invalid("still source requires source.still_path".into());
        }
        if self.log.path.as_os_str().is_empty() {
            return invalid("log.path is empty".into());
        }
        Ok(())
    }
}
