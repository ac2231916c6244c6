use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Four plane points in the fixed order the calibration layers rely on:
/// top-left, top-right, bottom-left, bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub points: [Point2<f64>; 4],
}

impl Quad {
    pub fn new(
        top_left: Point2<f64>,
        top_right: Point2<f64>,
        bottom_left: Point2<f64>,
        bottom_right: Point2<f64>,
    ) -> Self {
        Self {
            points: [top_left, top_right, bottom_left, bottom_right],
        }
    }

    /// Build from a slice; `None` unless it holds exactly four points.
    pub fn from_slice(points: &[Point2<f64>]) -> Option<Self> {
        let points: [Point2<f64>; 4] = points.try_into().ok()?;
        Some(Self { points })
    }

    pub fn top_left(&self) -> Point2<f64> {
        self.points[0]
    }

    pub fn top_right(&self) -> Point2<f64> {
        self.points[1]
    }

    pub fn bottom_left(&self) -> Point2<f64> {
        self.points[2]
    }

    pub fn bottom_right(&self) -> Point2<f64> {
        self.points[3]
    }

    /// Coordinate pairs in corner order, for persistence.
    pub fn to_arrays(&self) -> [[f64; 2]; 4] {
        self.points.map(|p| [p.x, p.y])
    }

    pub fn from_arrays(arrays: [[f64; 2]; 4]) -> Self {
        Self {
            points: arrays.map(|[x, y]| Point2::new(x, y)),
        }
    }
}

impl std::ops::Index<usize> for Quad {
    type Output = Point2<f64>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slice_requires_exactly_four_points() {
        let p = Point2::new(1.0, 2.0);
        assert!(Quad::from_slice(&[p; 3]).is_none());
        assert!(Quad::from_slice(&[p; 5]).is_none());
        assert!(Quad::from_slice(&[p; 4]).is_some());
    }

    #[test]
    fn array_round_trip_preserves_corner_order() {
        let q = Quad::new(
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.5),
            Point2::new(-0.5, 9.0),
            Point2::new(10.5, 9.5),
        );
        assert_eq!(Quad::from_arrays(q.to_arrays()), q);
        assert_eq!(q[1], q.top_right());
    }
}
