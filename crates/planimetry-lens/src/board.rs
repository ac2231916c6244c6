//! Chessboard pattern detection and grid ordering.
//!
//! Corners come from the ChESS detector (`chess-corners`), which already
//! reports sub-pixel positions. Ordering the unordered corner cloud into a
//! row-major grid is done geometrically: the cloud's extreme corners anchor
//! a homography from grid indices to the image, and every grid node must
//! then snap to a distinct detected corner. All four board orientations are
//! tried. Frames where the full grid cannot be assembled are reported as
//! not-detected; the calibration loop treats that as a skip, not an error.

use chess_corners::{find_chess_corners_image, ChessConfig, ThresholdMode};
use nalgebra::Point2;
use planimetry_core::{homography_from_quad, Homography, Quad};
use serde::{Deserialize, Serialize};

/// Inner-corner layout and physical square size of the calibration board.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    /// Inner corners per row.
    pub cols: usize,
    /// Inner corners per column.
    pub rows: usize,
    /// Side length of one board square, in the tool's real-world unit.
    pub square_size: f64,
}

impl Default for BoardSpec {
    /// The measurement tool's historical board: 15x8 inner corners,
    /// 18-unit squares.
    fn default() -> Self {
        Self {
            cols: 15,
            rows: 8,
            square_size: 18.0,
        }
    }
}

impl BoardSpec {
    pub fn corner_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Board-plane coordinates of every inner corner, row-major, in real
    /// units.
    pub fn object_points(&self) -> Vec<Point2<f64>> {
        let mut points = Vec::with_capacity(self.corner_count());
        for i in 0..self.rows {
            for j in 0..self.cols {
                points.push(Point2::new(
                    j as f64 * self.square_size,
                    i as f64 * self.square_size,
                ));
            }
        }
        points
    }
}

fn default_chess_config() -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.threshold_mode = ThresholdMode::Relative;
    cfg.threshold_value = 0.2;
    cfg.nms_radius = 2;
    cfg
}

/// Detect the full inner-corner grid in one frame.
///
/// Returns row-major sub-pixel corner positions, or `None` when the
/// pattern is not visible in full.
pub fn detect_board(frame: &image::GrayImage, board: &BoardSpec) -> Option<Vec<Point2<f64>>> {
    let descriptors = find_chess_corners_image(frame, &default_chess_config()).ok()?;
    if descriptors.len() < board.corner_count() {
        return None;
    }

    let cloud: Vec<Point2<f64>> = descriptors
        .iter()
        .map(|c| Point2::new(c.x as f64, c.y as f64))
        .collect();

    order_into_grid(&cloud, board.rows, board.cols)
}

/// Order an unordered corner cloud into a `rows` x `cols` row-major grid.
///
/// Requires at least `rows * cols` corners; extra corners (scene texture)
/// are tolerated as long as every grid node snaps to a distinct detection.
pub fn order_into_grid(
    cloud: &[Point2<f64>],
    rows: usize,
    cols: usize,
) -> Option<Vec<Point2<f64>>> {
    if rows < 2 || cols < 2 || cloud.len() < rows * cols {
        return None;
    }

    let tl = extreme(cloud, |p| p.x + p.y, false);
    let br = extreme(cloud, |p| p.x + p.y, true);
    let tr = extreme(cloud, |p| p.x - p.y, true);
    let bl = extreme(cloud, |p| p.x - p.y, false);

    let grid_corners = Quad::new(
        Point2::new(0.0, 0.0),
        Point2::new(cols as f64 - 1.0, 0.0),
        Point2::new(0.0, rows as f64 - 1.0),
        Point2::new(cols as f64 - 1.0, rows as f64 - 1.0),
    );

    // The four ways the board can sit in the frame: upright, then rotated
    // by 90/180/270 degrees.
    let anchors = [
        Quad::new(tl, tr, bl, br),
        Quad::new(tr, br, tl, bl),
        Quad::new(br, bl, tr, tl),
        Quad::new(bl, tl, br, tr),
    ];

    for anchor in &anchors {
        let Some(h) = homography_from_quad(&grid_corners, anchor) else {
            continue;
        };
        if let Some(grid) = snap_grid(cloud, rows, cols, &h) {
            return Some(grid);
        }
    }

    None
}

fn extreme(cloud: &[Point2<f64>], key: impl Fn(&Point2<f64>) -> f64, max: bool) -> Point2<f64> {
    let mut best = cloud[0];
    let mut best_key = key(&best);
    for p in &cloud[1..] {
        let k = key(p);
        if (max && k > best_key) || (!max && k < best_key) {
            best = *p;
            best_key = k;
        }
    }
    best
}

// Every grid node must land within a fraction of its local spacing of a
// distinct detected corner.
const SNAP_TOLERANCE: f64 = 0.35;

fn snap_grid(
    cloud: &[Point2<f64>],
    rows: usize,
    cols: usize,
    h: &Homography,
) -> Option<Vec<Point2<f64>>> {
    let mut used = vec![false; cloud.len()];
    let mut grid = Vec::with_capacity(rows * cols);

    for i in 0..rows {
        for j in 0..cols {
            let predicted = h.apply(Point2::new(j as f64, i as f64))?;
            let neighbor_j = if j + 1 < cols { j + 1 } else { j - 1 };
            let neighbor = h.apply(Point2::new(neighbor_j as f64, i as f64))?;
            let tolerance = SNAP_TOLERANCE * (neighbor - predicted).norm();

            let (index, distance) = nearest_unused(cloud, &used, predicted)?;
            if distance > tolerance {
                return None;
            }
            used[index] = true;
            grid.push(cloud[index]);
        }
    }

    Some(grid)
}

fn nearest_unused(
    cloud: &[Point2<f64>],
    used: &[bool],
    target: Point2<f64>,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (index, p) in cloud.iter().enumerate() {
        if used[index] {
            continue;
        }
        let d = (p - target).norm();
        if best.is_none_or(|(_, bd)| d < bd) {
            best = Some((index, d));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn perspective_grid(rows: usize, cols: usize) -> Vec<Point2<f64>> {
        // A mildly oblique view of a unit grid, scaled into pixels.
        let h = Homography::new(Matrix3::new(
            40.0, 2.0, 100.0, //
            -1.5, 38.0, 80.0, //
            1e-4, 5e-5, 1.0,
        ));
        let mut out = Vec::new();
        for i in 0..rows {
            for j in 0..cols {
                out.push(
                    h.apply(Point2::new(j as f64, i as f64))
                        .expect("finite grid"),
                );
            }
        }
        out
    }

    fn scrambled(points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        // Deterministic shuffle: interleave from both ends.
        let mut out = Vec::with_capacity(points.len());
        let (mut lo, mut hi) = (0, points.len() - 1);
        while lo < hi {
            out.push(points[hi]);
            out.push(points[lo]);
            lo += 1;
            hi -= 1;
        }
        if lo == hi {
            out.push(points[lo]);
        }
        out
    }

    #[test]
    fn recovers_row_major_order_from_scrambled_cloud() {
        let expected = perspective_grid(5, 7);
        let cloud = scrambled(&expected);

        let grid = order_into_grid(&cloud, 5, 7).expect("ordered grid");
        assert_eq!(grid.len(), expected.len());
        for (got, want) in grid.iter().zip(&expected) {
            assert_relative_eq!(got.x, want.x, epsilon = 1e-6);
            assert_relative_eq!(got.y, want.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn too_few_corners_fail() {
        let cloud = perspective_grid(5, 7);
        assert!(order_into_grid(&cloud[..30], 5, 7).is_none());
        assert!(order_into_grid(&cloud, 1, 7).is_none());
    }

    #[test]
    fn object_points_are_row_major_in_square_units() {
        let board = BoardSpec {
            cols: 3,
            rows: 2,
            square_size: 18.0,
        };
        let pts = board.object_points();
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[0], Point2::new(0.0, 0.0));
        assert_eq!(pts[2], Point2::new(36.0, 0.0));
        assert_eq!(pts[3], Point2::new(0.0, 18.0));
    }
}
