//! Chessboard inner-corner detection.
//!
//! Corner finding and grid assembly come from `calib-targets` (ChESS corners
//! plus its graph-based chessboard detector). This module adapts frames to it
//! and lays the labelled corners out in scan order ([`chessboard`]).
//!
//! A frame without a complete board is a normal outcome and yields
//! [`Detection::not_found`], never an error.

pub mod chessboard;

pub use chessboard::{ChessboardDetector, DetectorParams};

use serde::{Deserialize, Serialize};

use crate::capture::FrameSnapshot;

/// Image position in pixels; pixel centres sit on integer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Inner-corner count of the board: `rows` lines of `cols` corners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub rows: usize,
    pub cols: usize,
}

impl GridSize {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub const fn corners(&self) -> usize {
        self.rows * self.cols
    }
}

/// Corners of one detected board, in scan order
pub type PointSet = Vec<Point2>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub found: bool,
    pub points: PointSet,
}

impl Detection {
    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn found(points: PointSet) -> Self {
        Self {
            found: true,
            points,
        }
    }
}

/// Locates a calibration grid in a frame.
pub trait PatternDetector {
    /// On success returns exactly `grid.corners()` points, rows top to bottom,
    /// each row left to right.
    fn detect(&mut self, frame: &FrameSnapshot, grid: GridSize) -> Detection;
}
