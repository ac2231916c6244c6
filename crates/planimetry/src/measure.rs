//! Real-world measurements from composed lens and perspective models.

use log::debug;
use nalgebra::Point2;
use planimetry_lens::LensCalibration;
use planimetry_perspective::PerspectiveCalibration;

/// Composes lens correction and perspective rectification into real-world
/// coordinates and distances, anchored at a chosen origin.
///
/// The frame borrows its models for its lifetime; re-calibrating a model
/// requires dropping the frame first. The stored origin lives in the
/// *rectified* coordinate space, never in raw pixels.
#[derive(Clone)]
pub struct MeasurementFrame<'a> {
    lens: &'a LensCalibration,
    perspective: &'a PerspectiveCalibration,
    origin: Option<Point2<f64>>,
}

impl<'a> MeasurementFrame<'a> {
    pub fn new(lens: &'a LensCalibration, perspective: &'a PerspectiveCalibration) -> Self {
        Self {
            lens,
            perspective,
            origin: None,
        }
    }

    /// Build a frame and anchor its origin at the given raw pixel
    /// coordinate in one step. `None` when the origin is rejected.
    pub fn with_origin(
        lens: &'a LensCalibration,
        perspective: &'a PerspectiveCalibration,
        raw_origin: Point2<f64>,
    ) -> Option<Self> {
        let mut frame = Self::new(lens, perspective);
        frame.set_origin(raw_origin).then_some(frame)
    }

    /// The single chokepoint for coordinate conversion: lens correction
    /// always precedes rectification, because the distortion model is
    /// defined in the original optical pixel grid.
    pub fn transform(&self, point: Point2<f64>) -> Option<Point2<f64>> {
        self.perspective
            .rectify_point(self.lens.correct_point(point)?)
    }

    /// Anchor the origin at a raw pixel coordinate.
    ///
    /// Rejected (returning `false`, previous origin untouched) when either
    /// raw coordinate is negative, the transform fails, or the transformed
    /// point falls outside the valid rectified region.
    pub fn set_origin(&mut self, raw: Point2<f64>) -> bool {
        if raw.x < 0.0 || raw.y < 0.0 {
            return false;
        }
        let Some(transformed) = self.transform(raw) else {
            return false;
        };
        if transformed.x < 0.0 || transformed.y < 0.0 {
            debug!(
                "origin ({}, {}) maps outside the rectified region",
                raw.x, raw.y
            );
            return false;
        }
        self.origin = Some(transformed);
        true
    }

    /// The anchored origin, in rectified space.
    pub fn origin(&self) -> Option<Point2<f64>> {
        self.origin
    }

    /// All measurement preconditions at once: both models calibrated, the
    /// lens remap built, and an origin anchored.
    pub fn is_ready(&self) -> bool {
        self.lens.is_calibrated()
            && self.lens.is_mapped()
            && self.perspective.is_calibrated()
            && self.origin.is_some()
    }

    /// Real-world coordinate of a raw pixel, relative to the origin, in
    /// scaled units.
    pub fn real_coordinate(&self, point: Point2<f64>) -> Option<Point2<f64>> {
        if !self.is_ready() {
            return None;
        }
        let origin = self.origin?;
        let transformed = self.transform(point)?;
        let scale = self.perspective.scale_factor();
        Some(Point2::new(
            (transformed.x - origin.x) * scale,
            (transformed.y - origin.y) * scale,
        ))
    }

    /// Real-world distance between two raw pixels.
    ///
    /// Deliberately independent of the origin: distances are translation
    /// invariant and must stay so when the origin moves.
    pub fn real_distance(&self, a: Point2<f64>, b: Point2<f64>) -> Option<f64> {
        if !self.is_ready() {
            return None;
        }
        let ta = self.transform(a)?;
        let tb = self.transform(b)?;
        Some((tb - ta).norm() * self.perspective.scale_factor())
    }
}
