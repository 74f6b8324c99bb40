//! Calibration point log: one line of `x y` pairs per detected board.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::detect::Point2;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("cannot create calibration log {}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("calibration log write failed")]
    Write(#[from] std::io::Error),
    #[error("refusing to log an empty point set")]
    EmptyPointSet,
}

/// Append-only sink for detected corner sets.
///
/// The file is truncated on creation and every line is flushed and synced to
/// disk before [`CalibrationLogger::log_frame`] returns.
pub struct CalibrationLogger {
    path: PathBuf,
    out: BufWriter<File>,
    frames: u64,
}

impl CalibrationLogger {
    pub fn create(path: &Path) -> Result<Self, LogError> {
        let file = File::create(path).map_err(|source| LogError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "calibration log truncated");
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            frames: 0,
        })
    }

    /// Write one line: `x0 y0 x1 y1 ...`, newline terminated.
    pub fn log_frame(&mut self, points: &[Point2]) -> Result<(), LogError> {
        if points.is_empty() {
            return Err(LogError::EmptyPointSet);
        }

        for (i, p) in points.iter().enumerate() {
            if i > 0 {
                self.out.write_all(b" ")?;
            }
            write!(self.out, "{:.6} {:.6}", p.x, p.y)?;
        }
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.out.get_ref().sync_data()?;

        self.frames += 1;
        debug!(frame = self.frames, points = points.len(), "calibration frame logged");
        Ok(())
    }

    /// Lines written so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
