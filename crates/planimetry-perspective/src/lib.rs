//! Perspective rectification with real-world scale recovery.
//!
//! An oblique view of a planar rectangle of known physical size is mapped
//! to a top-down frame. The rectified rectangle is estimated from the
//! quad's vertical edges: foreshortening only ever shrinks apparent
//! length, so the shorter edge is the trustworthy height, and the width
//! follows from the true aspect ratio. The scale factor (real units per
//! rectified pixel) falls out of the same estimate.

mod io;

pub use io::{PerspectiveCalibrationFile, PerspectiveIoError};

use log::info;
use nalgebra::{Point2, Vector2};
use planimetry_core::{homography_from_quad, warp_perspective, GrayBuffer, GrayView, Homography, Quad};
use std::path::Path;

/// Physical width and height of the reference rectangle, in real units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrueSize {
    pub width: f64,
    pub height: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum RectifyImageError {
    #[error("perspective model is not calibrated")]
    NotCalibrated,
}

/// Planar homography calibration with a units-per-pixel scale factor.
#[derive(Clone, Debug, Default)]
pub struct PerspectiveCalibration {
    source_points: Option<Quad>,
    destination_points: Option<Quad>,
    homography: Option<Homography>,
    scale_factor: f64,
}

impl PerspectiveCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_calibrated(&self) -> bool {
        self.homography.is_some() && self.scale_factor > 0.0
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Accepts only strictly positive, finite factors.
    pub fn set_scale_factor(&mut self, scale_factor: f64) -> bool {
        if scale_factor > 0.0 && scale_factor.is_finite() {
            self.scale_factor = scale_factor;
            true
        } else {
            false
        }
    }

    pub fn source_points(&self) -> Option<&Quad> {
        self.source_points.as_ref()
    }

    pub fn destination_points(&self) -> Option<&Quad> {
        self.destination_points.as_ref()
    }

    pub fn homography(&self) -> Option<&Homography> {
        self.homography.as_ref()
    }

    /// Estimate the axis-aligned rectified rectangle for a source quad
    /// bounding a real rectangle of `true_size`, and set the scale factor.
    ///
    /// The rectangle is anchored at the quad's top-left corner plus
    /// `translation`. Degenerate quads whose vertical edges collapse
    /// produce `None` and leave the scale factor untouched; a zero-height
    /// edge must never turn into an infinite scale.
    pub fn estimate_destination(
        &mut self,
        source: &Quad,
        true_size: TrueSize,
        translation: Vector2<f64>,
    ) -> Option<Quad> {
        let left_length = (source.bottom_left().y - source.top_left().y).abs();
        let right_length = (source.bottom_right().y - source.top_right().y).abs();

        // The side with the smaller vertical extent is the one less
        // foreshortened relative to its true length.
        let height = left_length.min(right_length);
        let width = height / true_size.height * true_size.width;
        let scale_factor = true_size.height / height;

        if height <= 0.0 || !width.is_finite() || !scale_factor.is_finite() {
            return None;
        }
        if !self.set_scale_factor(scale_factor) {
            return None;
        }

        let anchor = source.top_left() + translation;
        Some(Quad::new(
            anchor,
            anchor + Vector2::new(width, 0.0),
            anchor + Vector2::new(0.0, height),
            anchor + Vector2::new(width, height),
        ))
    }

    /// Calibrate from explicit source/destination correspondences.
    ///
    /// `true` iff the scale factor is valid and the homography solve
    /// yields an invertible matrix.
    pub fn calibrate_from_point_pairs(
        &mut self,
        source: &Quad,
        destination: &Quad,
        scale_factor: f64,
    ) -> bool {
        if !self.set_scale_factor(scale_factor) {
            return false;
        }

        match homography_from_quad(source, destination) {
            Some(h) if h.inverse().is_some() => {
                self.source_points = Some(*source);
                self.destination_points = Some(*destination);
                self.homography = Some(h);
                info!(
                    "perspective calibration: scale factor {:.6} units/px",
                    self.scale_factor
                );
                true
            }
            _ => false,
        }
    }

    /// Estimate the destination rectangle from the true size, then
    /// calibrate against it.
    pub fn calibrate_from_true_size(
        &mut self,
        source: &Quad,
        true_size: TrueSize,
        translation: Vector2<f64>,
    ) -> bool {
        let Some(destination) = self.estimate_destination(source, true_size, translation) else {
            return false;
        };
        let scale_factor = self.scale_factor;
        self.calibrate_from_point_pairs(source, &destination, scale_factor)
    }

    /// Load a saved calibration; the prior state survives a failed load.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), PerspectiveIoError> {
        let file = PerspectiveCalibrationFile::load_json(path)?;
        self.apply_file_model(file)
    }

    /// Adopt an already-parsed calibration document.
    pub fn apply_file_model(
        &mut self,
        file: PerspectiveCalibrationFile,
    ) -> Result<(), PerspectiveIoError> {
        if !(file.scale_factor > 0.0 && file.scale_factor.is_finite()) {
            return Err(PerspectiveIoError::Malformed(
                "scale factor must be positive and finite",
            ));
        }
        let homography = Homography::from_array(file.perspective_transformation);
        if homography.inverse().is_none() {
            return Err(PerspectiveIoError::Malformed(
                "perspective transformation must be invertible",
            ));
        }

        self.source_points = Some(Quad::from_arrays(file.original_points));
        self.destination_points = Some(Quad::from_arrays(file.transformed_points));
        self.homography = Some(homography);
        self.scale_factor = file.scale_factor;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PerspectiveIoError> {
        self.file_model()?.write_json(path)
    }

    pub fn file_model(&self) -> Result<PerspectiveCalibrationFile, PerspectiveIoError> {
        let (source, destination, homography) = match (
            self.source_points,
            self.destination_points,
            self.homography,
        ) {
            (Some(s), Some(d), Some(h)) if self.is_calibrated() => (s, d, h),
            _ => return Err(PerspectiveIoError::NotCalibrated),
        };
        Ok(PerspectiveCalibrationFile {
            scale_factor: self.scale_factor,
            original_points: source.to_arrays(),
            transformed_points: destination.to_arrays(),
            perspective_transformation: homography.to_array(),
        })
    }

    /// Rectify a whole frame through the homography. Output resolution
    /// equals the input resolution.
    pub fn rectify_image(&self, image: &GrayView<'_>) -> Result<GrayBuffer, RectifyImageError> {
        if !self.is_calibrated() {
            return Err(RectifyImageError::NotCalibrated);
        }
        let inverse = self
            .homography
            .as_ref()
            .and_then(Homography::inverse)
            .ok_or(RectifyImageError::NotCalibrated)?;
        Ok(warp_perspective(image, &inverse, image.width, image.height))
    }

    /// Rectify a single point. `None` for negative input coordinates or
    /// an uncalibrated model.
    pub fn rectify_point(&self, point: Point2<f64>) -> Option<Point2<f64>> {
        if point.x < 0.0 || point.y < 0.0 {
            return None;
        }
        if !self.is_calibrated() {
            return None;
        }
        self.homography.as_ref()?.apply(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reference_quad() -> Quad {
        Quad::new(
            Point2::new(100.0, 100.0),
            Point2::new(400.0, 110.0),
            Point2::new(90.0, 400.0),
            Point2::new(410.0, 390.0),
        )
    }

    fn square_size() -> TrueSize {
        TrueSize {
            width: 300.0,
            height: 300.0,
        }
    }

    fn assert_point_eq(got: Point2<f64>, want: Point2<f64>, tol: f64) {
        assert_relative_eq!(got.x, want.x, epsilon = tol);
        assert_relative_eq!(got.y, want.y, epsilon = tol);
    }

    #[test]
    fn destination_uses_the_shorter_edge() {
        let mut calib = PerspectiveCalibration::new();
        let dst = calib
            .estimate_destination(&reference_quad(), square_size(), Vector2::zeros())
            .expect("estimate");

        // Left edge 300 px, right edge 280 px: the right edge wins.
        assert_point_eq(dst.top_left(), Point2::new(100.0, 100.0), 1e-9);
        assert_point_eq(dst.top_right(), Point2::new(380.0, 100.0), 1e-9);
        assert_point_eq(dst.bottom_left(), Point2::new(100.0, 380.0), 1e-9);
        assert_point_eq(dst.bottom_right(), Point2::new(380.0, 380.0), 1e-9);
        assert_relative_eq!(calib.scale_factor(), 300.0 / 280.0, epsilon = 1e-12);
    }

    #[test]
    fn destination_estimation_is_idempotent() {
        let mut calib = PerspectiveCalibration::new();
        let first = calib
            .estimate_destination(&reference_quad(), square_size(), Vector2::new(10.0, -5.0))
            .expect("estimate");
        let scale_first = calib.scale_factor();
        let second = calib
            .estimate_destination(&reference_quad(), square_size(), Vector2::new(10.0, -5.0))
            .expect("estimate");

        assert_eq!(first, second);
        assert_relative_eq!(calib.scale_factor(), scale_first, epsilon = 0.0);
    }

    #[test]
    fn translation_shifts_the_whole_rectangle() {
        let mut calib = PerspectiveCalibration::new();
        let dst = calib
            .estimate_destination(&reference_quad(), square_size(), Vector2::new(25.0, 40.0))
            .expect("estimate");
        assert_point_eq(dst.top_left(), Point2::new(125.0, 140.0), 1e-9);
        assert_point_eq(dst.bottom_right(), Point2::new(405.0, 420.0), 1e-9);
    }

    #[test]
    fn degenerate_vertical_edges_fail_without_setting_scale() {
        let mut calib = PerspectiveCalibration::new();
        let flat = Quad::new(
            Point2::new(0.0, 50.0),
            Point2::new(100.0, 10.0),
            Point2::new(0.0, 50.0),
            Point2::new(100.0, 90.0),
        );
        assert!(calib
            .estimate_destination(&flat, square_size(), Vector2::zeros())
            .is_none());
        assert_eq!(calib.scale_factor(), 0.0);
        assert!(!calib.is_calibrated());
    }

    #[test]
    fn calibration_maps_sources_to_destinations() {
        let mut calib = PerspectiveCalibration::new();
        assert!(calib.calibrate_from_true_size(&reference_quad(), square_size(), Vector2::zeros()));
        assert!(calib.is_calibrated());

        let src = *calib.source_points().expect("sources");
        let dst = *calib.destination_points().expect("destinations");
        for k in 0..4 {
            let mapped = calib.rectify_point(src[k]).expect("rectified");
            assert_point_eq(mapped, dst[k], 1e-6);
        }
    }

    #[test]
    fn rectify_point_rejects_bad_inputs() {
        let mut calib = PerspectiveCalibration::new();
        assert!(calib.rectify_point(Point2::new(10.0, 10.0)).is_none());

        assert!(calib.calibrate_from_true_size(&reference_quad(), square_size(), Vector2::zeros()));
        assert!(calib.rectify_point(Point2::new(-1.0, 10.0)).is_none());
        assert!(calib.rectify_point(Point2::new(10.0, -0.5)).is_none());
        assert!(calib.rectify_point(Point2::new(10.0, 0.5)).is_some());
    }

    #[test]
    fn scale_factor_validation() {
        let mut calib = PerspectiveCalibration::new();
        assert!(!calib.set_scale_factor(0.0));
        assert!(!calib.set_scale_factor(-2.0));
        assert!(!calib.set_scale_factor(f64::INFINITY));
        assert!(calib.set_scale_factor(1.25));
        assert_eq!(calib.scale_factor(), 1.25);

        let quad = reference_quad();
        let dst = Quad::new(
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(0.0, 10.0),
            Point2::new(10.0, 10.0),
        );
        assert!(!calib.calibrate_from_point_pairs(&quad, &dst, 0.0));
        assert!(!calib.is_calibrated());
    }

    #[test]
    fn rectify_image_requires_calibration() {
        let calib = PerspectiveCalibration::new();
        let img = GrayBuffer::new(8, 8);
        assert!(matches!(
            calib.rectify_image(&img.view()),
            Err(RectifyImageError::NotCalibrated)
        ));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("perspective.json");

        let mut calib = PerspectiveCalibration::new();
        assert!(calib.calibrate_from_true_size(&reference_quad(), square_size(), Vector2::zeros()));
        calib.save(&path).expect("save");

        let mut reloaded = PerspectiveCalibration::new();
        reloaded.load(&path).expect("load");
        assert!(reloaded.is_calibrated());
        assert_relative_eq!(
            reloaded.scale_factor(),
            calib.scale_factor(),
            epsilon = 1e-12
        );

        let p = Point2::new(200.0, 250.0);
        let a = calib.rectify_point(p).expect("rectified");
        let b = reloaded.rectify_point(p).expect("rectified");
        assert_point_eq(a, b, 1e-9);
    }

    #[test]
    fn failed_load_preserves_previous_state() {
        let mut calib = PerspectiveCalibration::new();
        assert!(calib.calibrate_from_true_size(&reference_quad(), square_size(), Vector2::zeros()));
        let scale = calib.scale_factor();

        let bad = PerspectiveCalibrationFile {
            scale_factor: -1.0,
            original_points: [[0.0; 2]; 4],
            transformed_points: [[0.0; 2]; 4],
            perspective_transformation: [[0.0; 3]; 3],
        };
        assert!(calib.apply_file_model(bad).is_err());
        assert!(calib.is_calibrated());
        assert_eq!(calib.scale_factor(), scale);
    }
}
