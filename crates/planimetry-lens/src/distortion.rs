//! Brown-Conrady lens distortion model.
//!
//! Coefficients follow the conventional order
//! `[k1, k2, p1, p2, k3, k4, k5, k6]`: radial numerator terms k1..k3,
//! tangential p1/p2, rational denominator terms k4..k6. The calibration
//! solve in this crate only ever estimates the radial numerator, but the
//! full vector is applied so that externally produced calibrations load
//! unchanged.

use nalgebra::{Matrix3, Point2, Vector2};

const UNDISTORT_ITERS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistortionCoeffs(pub [f64; 8]);

impl DistortionCoeffs {
    pub fn zero() -> Self {
        Self([0.0; 8])
    }

    pub fn radial(k1: f64, k2: f64, k3: f64) -> Self {
        Self([k1, k2, 0.0, 0.0, k3, 0.0, 0.0, 0.0])
    }

    /// Accepts the truncated vectors (4, 5, 8, 12, 14 entries) other tools
    /// write; missing trailing terms are zero.
    pub fn from_slice(coeffs: &[f64]) -> Self {
        let mut out = [0.0; 8];
        for (dst, src) in out.iter_mut().zip(coeffs) {
            *dst = *src;
        }
        Self(out)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|c| c.is_finite())
    }

    #[inline]
    fn factors(&self, p: Vector2<f64>) -> (f64, Vector2<f64>) {
        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.0;
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        let tangential = Vector2::new(
            2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        );
        (radial, tangential)
    }

    /// Forward model on a normalized image-plane point.
    pub fn distort(&self, undistorted: Vector2<f64>) -> Vector2<f64> {
        let (radial, tangential) = self.factors(undistorted);
        undistorted * radial + tangential
    }

    /// Inverse of the forward model, by fixed-point iteration on the
    /// normalized plane (the distortion is a small perturbation there).
    pub fn undistort(&self, distorted: Vector2<f64>) -> Vector2<f64> {
        let mut p = distorted;
        for _ in 0..UNDISTORT_ITERS {
            let (radial, tangential) = self.factors(p);
            if radial.abs() < 1e-12 {
                break;
            }
            p = (distorted - tangential) / radial;
        }
        p
    }
}

/// Pixel -> normalized image plane through the camera matrix.
#[inline]
pub(crate) fn normalize_pixel(camera: &Matrix3<f64>, p: Point2<f64>) -> Vector2<f64> {
    let fx = camera[(0, 0)];
    let fy = camera[(1, 1)];
    let cx = camera[(0, 2)];
    let cy = camera[(1, 2)];
    Vector2::new((p.x - cx) / fx, (p.y - cy) / fy)
}

/// Normalized image plane -> pixel through the camera matrix.
#[inline]
pub(crate) fn pixel_from_normalized(camera: &Matrix3<f64>, n: Vector2<f64>) -> Point2<f64> {
    let fx = camera[(0, 0)];
    let fy = camera[(1, 1)];
    let cx = camera[(0, 2)];
    let cy = camera[(1, 2)];
    Point2::new(n.x * fx + cx, n.y * fy + cy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_coefficients_are_the_identity() {
        let dist = DistortionCoeffs::zero();
        let p = Vector2::new(0.3, -0.2);
        assert_eq!(dist.distort(p), p);
        assert_eq!(dist.undistort(p), p);
    }

    #[test]
    fn undistort_inverts_distort() {
        let dist = DistortionCoeffs::radial(-0.28, 0.07, 0.0);
        for p in [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.25, 0.1),
            Vector2::new(-0.4, 0.3),
            Vector2::new(0.1, -0.45),
        ] {
            let d = dist.distort(p);
            let u = dist.undistort(d);
            assert_relative_eq!(u.x, p.x, epsilon = 1e-6);
            assert_relative_eq!(u.y, p.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn tangential_terms_participate() {
        let dist = DistortionCoeffs([0.0, 0.0, 0.01, -0.005, 0.0, 0.0, 0.0, 0.0]);
        let p = Vector2::new(0.2, 0.15);
        let d = dist.distort(p);
        assert!((d - p).norm() > 1e-4);
        let u = dist.undistort(d);
        assert_relative_eq!(u.x, p.x, epsilon = 1e-6);
        assert_relative_eq!(u.y, p.y, epsilon = 1e-6);
    }

    #[test]
    fn from_slice_pads_with_zeros() {
        let dist = DistortionCoeffs::from_slice(&[-0.1, 0.02]);
        assert_eq!(dist.0, [-0.1, 0.02, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn pixel_round_trip_through_camera_matrix() {
        let camera = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
        let p = Point2::new(123.5, 456.25);
        let back = pixel_from_normalized(&camera, normalize_pixel(&camera, p));
        assert_relative_eq!(back.x, p.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-9);
    }
}
