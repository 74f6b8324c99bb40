//! [`PatternDetector`] backed by `calib-targets`.
//!
//! The crate returns corners labelled with integer grid coordinates whose
//! origin and axis directions depend on where its graph search started. The
//! glue here checks the labels cover exactly `rows × cols` and re-reads them
//! so rows run top to bottom and each row left to right.

use std::collections::HashMap;

use calib_targets::chessboard::ChessboardParams;
use calib_targets::detect;
use image::GrayImage;
use tracing::{trace, warn};

use super::{Detection, GridSize, PatternDetector, Point2};
use crate::capture::FrameSnapshot;

/// Tunable parameters of [`ChessboardDetector`].
#[derive(Clone, Debug)]
pub struct DetectorParams {
    /// ChESS response threshold as a fraction of the frame's strongest response.
    pub threshold_rel: f32,
    pub nms_radius: u32,
    /// Weakest ChESS corner the grid search will use.
    pub min_corner_strength: f32,
    /// Share of the expected grid a graph component must cover before it is
    /// considered. Only complete grids are reported either way.
    pub completeness_threshold: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_corner_strength: 0.0,
            completeness_threshold: 0.9,
        }
    }
}

/// Default [`PatternDetector`] for black/white chessboards
#[derive(Debug, Default)]
pub struct ChessboardDetector {
    params: DetectorParams,
}

impl ChessboardDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    fn board_params(&self, grid: GridSize) -> ChessboardParams {
        ChessboardParams {
            min_corner_strength: self.params.min_corner_strength,
            min_corners: grid.corners(),
            expected_rows: Some(grid.rows as u32),
            expected_cols: Some(grid.cols as u32),
            completeness_threshold: self.params.completeness_threshold,
            ..ChessboardParams::default()
        }
    }
}

impl PatternDetector for ChessboardDetector {
    fn detect(&mut self, frame: &FrameSnapshot, grid: GridSize) -> Detection {
        let Some(img) = GrayImage::from_raw(frame.width, frame.height, frame.as_slice().to_vec()) else {
            warn!(
                width = frame.width,
                height = frame.height,
                len = frame.data.len(),
                "frame does not fit its dimensions"
            );
            return Detection::not_found();
        };

        let mut chess = detect::default_chess_config();
        chess.params.threshold_rel = self.params.threshold_rel;
        chess.params.nms_radius = self.params.nms_radius;

        let Some(result) = detect::detect_chessboard(&img, &chess, self.board_params(grid)) else {
            trace!("no board");
            return Detection::not_found();
        };

        let corners = &result.detection.corners;
        if corners.len() != grid.corners() {
            trace!(corners = corners.len(), "rejected: partial board");
            return Detection::not_found();
        }

        let mut labelled = HashMap::with_capacity(corners.len());
        for corner in corners {
            let Some(at) = corner.grid else {
                trace!("rejected: unlabelled corner");
                return Detection::not_found();
            };
            labelled.insert((at.i, at.j), Point2::new(corner.position.x, corner.position.y));
        }

        match scan_order(&labelled, grid) {
            Some(points) => Detection::found(points),
            None => {
                trace!("rejected: labels do not form the expected grid");
                Detection::not_found()
            }
        }
    }
}

fn sub(a: Point2, b: Point2) -> Point2 {
    Point2::new(a.x - b.x, a.y - b.y)
}

fn add(a: Point2, b: Point2) -> Point2 {
    Point2::new(a.x + b.x, a.y + b.y)
}

fn cross(a: Point2, b: Point2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Lay out grid-labelled corners in scan order.
///
/// The axis holding `cols` corners becomes the row direction; on a square
/// board it is the more horizontal one. Rows read left to right (top to
/// bottom when the row direction is mostly vertical) and advance so that
/// row × column turns clockwise in image coordinates.
fn scan_order(labelled: &HashMap<(i32, i32), Point2>, grid: GridSize) -> Option<Vec<Point2>> {
    if labelled.len() != grid.corners() {
        return None;
    }
    let min_i = labelled.keys().map(|k| k.0).min()?;
    let min_j = labelled.keys().map(|k| k.1).min()?;
    let ni = (labelled.keys().map(|k| k.0).max()? - min_i + 1) as usize;
    let nj = (labelled.keys().map(|k| k.1).max()? - min_j + 1) as usize;
    if ni * nj != grid.corners() {
        return None;
    }

    let at = |i: usize, j: usize| labelled.get(&(i as i32 + min_i, j as i32 + min_j)).copied();

    // summed step along each label axis
    let mut step_i = Point2::default();
    let mut step_j = Point2::default();
    for j in 0..nj {
        for i in 0..ni {
            let p = at(i, j)?;
            if let Some(q) = at(i + 1, j) {
                step_i = add(step_i, sub(q, p));
            }
            if let Some(q) = at(i, j + 1) {
                step_j = add(step_j, sub(q, p));
            }
        }
    }

    let horizontal = |d: Point2| d.x.abs() / d.x.hypot(d.y).max(f32::EPSILON);
    let col_axis_is_i = if grid.rows == grid.cols {
        horizontal(step_i) >= horizontal(step_j)
    } else if (ni, nj) == (grid.cols, grid.rows) {
        true
    } else if (ni, nj) == (grid.rows, grid.cols) {
        false
    } else {
        return None;
    };

    let (col_step, row_step) = if col_axis_is_i {
        (step_i, step_j)
    } else {
        (step_j, step_i)
    };
    let flip_col = if col_step.x.abs() >= col_step.y.abs() {
        col_step.x < 0.0
    } else {
        col_step.y < 0.0
    };
    let col_dir = if flip_col {
        Point2::new(-col_step.x, -col_step.y)
    } else {
        col_step
    };
    let flip_row = cross(col_dir, row_step) < 0.0;

    let mut out = Vec::with_capacity(grid.corners());
    for r in 0..grid.rows {
        for c in 0..grid.cols {
            let c = if flip_col { grid.cols - 1 - c } else { c };
            let r = if flip_row { grid.rows - 1 - r } else { r };
            out.push(if col_axis_is_i { at(c, r)? } else { at(r, c)? });
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::{chessboard_corners, render_chessboard, render_noise};

    fn snapshot(img: GrayImage) -> FrameSnapshot {
        let (w, h) = img.dimensions();
        FrameSnapshot::luma(w, h, img.into_raw())
    }

    fn assert_matches(found: &[Point2], expected: &[Point2]) {
        assert_eq!(found.len(), expected.len());
        for (i, (f, e)) in found.iter().zip(expected).enumerate() {
            assert!(
                f.distance(e) <= 0.5,
                "corner {i}: found ({}, {}), expected ({}, {})",
                f.x,
                f.y,
                e.x,
                e.y
            );
        }
    }

    /// Label a row-major lattice with `(i, j)` produced by `label(col, row)`.
    fn labelled(
        truth: &[Point2],
        grid: GridSize,
        label: impl Fn(i32, i32) -> (i32, i32),
    ) -> HashMap<(i32, i32), Point2> {
        truth
            .iter()
            .enumerate()
            .map(|(k, &p)| {
                let (c, r) = ((k % grid.cols) as i32, (k / grid.cols) as i32);
                (label(c, r), p)
            })
            .collect()
    }

    #[test]
    fn finds_seven_by_seven_board_in_scan_order() {
        let grid = GridSize::new(7, 7);
        let origin = Point2::new(150.5, 110.5);
        let frame = snapshot(render_chessboard(640, 480, grid, origin, 30.0));

        let detection = ChessboardDetector::default().detect(&frame, grid);
        assert!(detection.found);
        assert_matches(&detection.points, &chessboard_corners(grid, origin, 30.0));
    }

    #[test]
    fn finds_rectangular_board() {
        let grid = GridSize::new(5, 8);
        let origin = Point2::new(60.5, 90.5);
        let frame = snapshot(render_chessboard(480, 320, grid, origin, 24.0));

        let detection = ChessboardDetector::default().detect(&frame, grid);
        assert!(detection.found);
        assert_matches(&detection.points, &chessboard_corners(grid, origin, 24.0));
    }

    #[test]
    fn wrong_grid_size_is_not_found() {
        let origin = Point2::new(150.5, 110.5);
        let frame = snapshot(render_chessboard(640, 480, GridSize::new(7, 7), origin, 30.0));

        let detection = ChessboardDetector::default().detect(&frame, GridSize::new(9, 9));
        assert_eq!(detection, Detection::not_found());
    }

    #[test]
    fn blank_frame_is_not_found() {
        let frame = FrameSnapshot::luma(640, 480, vec![128u8; 640 * 480]);
        let detection = ChessboardDetector::default().detect(&frame, GridSize::new(7, 7));
        assert!(!detection.found);
        assert!(detection.points.is_empty());
    }

    #[test]
    fn noise_frame_is_not_found() {
        let frame = snapshot(render_noise(640, 480, 0x5eed));
        let detection = ChessboardDetector::default().detect(&frame, GridSize::new(7, 7));
        assert!(!detection.found);
        assert!(detection.points.is_empty());
    }

    #[test]
    fn short_frame_is_not_found() {
        let frame = FrameSnapshot {
            width: 640,
            height: 480,
            ..FrameSnapshot::luma(10, 10, vec![128u8; 100])
        };
        let detection = ChessboardDetector::default().detect(&frame, GridSize::new(7, 7));
        assert_eq!(detection, Detection::not_found());
    }

    #[test]
    fn board_params_carry_the_grid() {
        let detector = ChessboardDetector::new(DetectorParams {
            completeness_threshold: 1.0,
            ..DetectorParams::default()
        });
        let params = detector.board_params(GridSize::new(6, 9));
        assert_eq!(params.expected_rows, Some(6));
        assert_eq!(params.expected_cols, Some(9));
        assert_eq!(params.min_corners, 54);
        assert_eq!(params.completeness_threshold, 1.0);
    }

    #[test]
    fn offset_labels_read_row_major() {
        let grid = GridSize::new(3, 4);
        let truth = chessboard_corners(grid, Point2::new(50.0, 40.0), 20.0);
        let lattice = labelled(&truth, grid, |c, r| (c - 2, r + 5));

        assert_eq!(scan_order(&lattice, grid).unwrap(), truth);
    }

    #[test]
    fn reversed_and_transposed_labels_read_row_major() {
        let grid = GridSize::new(3, 4);
        let truth = chessboard_corners(grid, Point2::new(50.0, 40.0), 20.0);
        // rows on i counting up the image, columns on j counting right to left
        let lattice = labelled(&truth, grid, |c, r| (-r, 3 - c));

        assert_eq!(scan_order(&lattice, grid).unwrap(), truth);
    }

    #[test]
    fn quarter_turned_board_reads_down_the_image() {
        // 3 rows of 4 drawn as 4 rows of 3: the column axis runs down the image
        let grid = GridSize::new(3, 4);
        let lattice: HashMap<(i32, i32), Point2> = (0..4)
            .flat_map(|y| {
                (0..3).map(move |x| ((x, y), Point2::new(100.0 + 20.0 * x as f32, 30.0 + 20.0 * y as f32)))
            })
            .collect();

        let points = scan_order(&lattice, grid).unwrap();
        assert_eq!(points.len(), 12);
        // each row of four runs top to bottom, rows advance right to left
        assert_eq!(points[0], Point2::new(140.0, 30.0));
        assert_eq!(points[1], Point2::new(140.0, 50.0));
        assert_eq!(points[4], Point2::new(120.0, 30.0));
    }

    #[test]
    fn square_board_picks_the_horizontal_axis() {
        let grid = GridSize::new(3, 3);
        let truth = chessboard_corners(grid, Point2::new(10.0, 10.0), 15.0);
        let lattice = labelled(&truth, grid, |c, r| (r, c));

        assert_eq!(scan_order(&lattice, grid).unwrap(), truth);
    }

    #[test]
    fn holes_and_wrong_shapes_are_rejected() {
        let grid = GridSize::new(4, 4);
        let truth = chessboard_corners(grid, Point2::new(50.0, 40.0), 20.0);

        let mut holed = labelled(&truth, grid, |c, r| (c, r));
        holed.remove(&(1, 2));
        holed.insert((7, 7), Point2::new(300.0, 300.0));
        assert!(scan_order(&holed, grid).is_none());

        for other in [GridSize::new(2, 8), GridSize::new(5, 5)] {
            let corners = chessboard_corners(other, Point2::new(5.0, 5.0), 10.0);
            let lattice = labelled(&corners, other, |c, r| (c, r));
            assert!(scan_order(&lattice, grid).is_none(), "{other:?} accepted as {grid:?}");
        }
    }
}
