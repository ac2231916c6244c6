//! Linear intrinsics and distortion estimation from planar board views.
//!
//! The measurement tool's camera model is deliberately constrained: zero
//! skew, principal point fixed at the image center, equal focal lengths.
//! Under those constraints the image-of-the-absolute-conic equations reduce
//! to a one-dimensional least-squares problem per homography pair of
//! constraints, which is solvable from a single tilted view. Radial
//! distortion is then fitted linearly to the residuals between the
//! homography-predicted and observed positions, and the two estimates are
//! alternated: undistort the observations, refit the homographies, resolve.

use crate::distortion::{normalize_pixel, pixel_from_normalized, DistortionCoeffs};
use crate::CalibrateError;
use nalgebra::{DMatrix, DVector, Matrix3, Point2};
use planimetry_core::{estimate_homography, Homography};

const REFINE_ROUNDS: usize = 5;

pub(crate) struct SolveOutput {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: DistortionCoeffs,
    pub rms_error: f64,
}

pub(crate) fn calibrate_planar(
    board_points: &[Point2<f64>],
    views: &[Vec<Point2<f64>>],
    image_size: (u32, u32),
) -> Result<SolveOutput, CalibrateError> {
    let cx = (image_size.0 as f64 - 1.0) / 2.0;
    let cy = (image_size.1 as f64 - 1.0) / 2.0;

    let mut camera = Matrix3::identity();
    let mut distortion = DistortionCoeffs::zero();
    let mut working: Vec<Vec<Point2<f64>>> = views.to_vec();
    let mut homographies: Vec<Homography> = Vec::with_capacity(views.len());

    for round in 0..REFINE_ROUNDS {
        homographies.clear();
        for view in &working {
            let h = estimate_homography(board_points, view)
                .ok_or(CalibrateError::DegenerateGeometry)?;
            homographies.push(h);
        }

        let f = focal_from_homographies(&homographies, cx, cy)?;
        camera = Matrix3::new(f, 0.0, cx, 0.0, f, cy, 0.0, 0.0, 1.0);
        distortion = fit_radial_distortion(&camera, &homographies, board_points, views)?;

        if round + 1 < REFINE_ROUNDS {
            working = views
                .iter()
                .map(|view| {
                    view.iter()
                        .map(|&p| {
                            let n = distortion.undistort(normalize_pixel(&camera, p));
                            pixel_from_normalized(&camera, n)
                        })
                        .collect()
                })
                .collect();
        }
    }

    let rms_error = reprojection_rms(&camera, &distortion, &homographies, board_points, views)?;
    validate_parameters(&camera, &distortion)?;

    Ok(SolveOutput {
        camera_matrix: camera,
        distortion,
        rms_error,
    })
}

/// Focal length from plane homographies with a known principal point.
///
/// After translating the principal point out of each homography, the two
/// absolute-conic constraints of Zhang's method become linear in `1/f^2`
/// for `K = diag(f, f, 1)`:
///
///   h1' w h2 = 0           (a1 a2 + b1 b2) x = -c1 c2
///   h1' w h1 = h2' w h2    (a1^2 + b1^2 - a2^2 - b2^2) x = c2^2 - c1^2
///
/// with `w = diag(x, x, 1)`. Fronto-parallel views contribute vanishing
/// rows, so at least one tilted view is required.
fn focal_from_homographies(
    homographies: &[Homography],
    cx: f64,
    cy: f64,
) -> Result<f64, CalibrateError> {
    let t_inv = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    let mut num = 0.0;
    let mut den = 0.0;
    let mut scale = 0.0;
    for h in homographies {
        let hp = t_inv * h.h;
        let (a1, b1, c1) = (hp[(0, 0)], hp[(1, 0)], hp[(2, 0)]);
        let (a2, b2, c2) = (hp[(0, 1)], hp[(1, 1)], hp[(2, 1)]);

        let rows = [
            (a1 * a2 + b1 * b2, -c1 * c2),
            (a1 * a1 + b1 * b1 - a2 * a2 - b2 * b2, c2 * c2 - c1 * c1),
        ];
        for (a, b) in rows {
            num += a * b;
            den += a * a;
        }

        let magnitude = a1 * a1 + b1 * b1 + c1 * c1 + a2 * a2 + b2 * b2 + c2 * c2;
        scale += magnitude * magnitude;
    }

    // Relative threshold: fronto-parallel views contribute rows that are
    // zero up to rounding, which must not masquerade as constraints.
    if den <= 1e-12 * scale {
        return Err(CalibrateError::DegenerateGeometry);
    }
    let x = num / den;
    if !x.is_finite() || x <= 0.0 {
        return Err(CalibrateError::DegenerateGeometry);
    }
    Ok((1.0 / x).sqrt())
}

/// Fit `k1, k2` to the normalized-plane residuals between
/// homography-predicted and observed positions. Tangential terms and the
/// higher radial orders stay zero: a conservative fit that matches the
/// constrained camera model above.
fn fit_radial_distortion(
    camera: &Matrix3<f64>,
    homographies: &[Homography],
    board_points: &[Point2<f64>],
    observed: &[Vec<Point2<f64>>],
) -> Result<DistortionCoeffs, CalibrateError> {
    let mut rows: Vec<[f64; 2]> = Vec::new();
    let mut rhs: Vec<f64> = Vec::new();

    for (h, view) in homographies.iter().zip(observed) {
        for (board, obs) in board_points.iter().zip(view) {
            let Some(ideal) = h.apply(*board) else {
                continue;
            };
            let ni = normalize_pixel(camera, ideal);
            let no = normalize_pixel(camera, *obs);
            let r2 = ni.norm_squared();
            let r4 = r2 * r2;

            rows.push([ni.x * r2, ni.x * r4]);
            rhs.push(no.x - ni.x);
            rows.push([ni.y * r2, ni.y * r4]);
            rhs.push(no.y - ni.y);
        }
    }

    if rows.len() < 4 {
        return Err(CalibrateError::DegenerateGeometry);
    }

    let a = DMatrix::from_fn(rows.len(), 2, |r, c| rows[r][c]);
    let b = DVector::from_vec(rhs);
    let svd = a.svd(true, true);
    let x = svd
        .solve(&b, 1e-12)
        .map_err(|_| CalibrateError::DegenerateGeometry)?;

    Ok(DistortionCoeffs::radial(x[0], x[1], 0.0))
}

fn reprojection_rms(
    camera: &Matrix3<f64>,
    distortion: &DistortionCoeffs,
    homographies: &[Homography],
    board_points: &[Point2<f64>],
    observed: &[Vec<Point2<f64>>],
) -> Result<f64, CalibrateError> {
    let mut sum = 0.0;
    let mut count = 0usize;

    for (h, view) in homographies.iter().zip(observed) {
        for (board, obs) in board_points.iter().zip(view) {
            let Some(ideal) = h.apply(*board) else {
                continue;
            };
            let predicted =
                pixel_from_normalized(camera, distortion.distort(normalize_pixel(camera, ideal)));
            sum += (predicted - obs).norm_squared();
            count += 1;
        }
    }

    if count == 0 {
        return Err(CalibrateError::DegenerateGeometry);
    }
    Ok((sum / count as f64).sqrt())
}

fn validate_parameters(
    camera: &Matrix3<f64>,
    distortion: &DistortionCoeffs,
) -> Result<(), CalibrateError> {
    let f = camera[(0, 0)];
    let in_range = camera.iter().all(|v| v.is_finite())
        && f > 1e-3
        && f < 1e8
        && distortion.is_finite()
        && distortion.as_slice().iter().all(|c| c.abs() < 1e6);

    if in_range {
        Ok(())
    } else {
        Err(CalibrateError::NumericalRange)
    }
}

/// The "keep every source pixel" refinement of the camera matrix: maps the
/// undistorted footprint of the full frame back onto the original
/// resolution. Stored alongside the calibration for downstream consumers;
/// the undistortion map itself reprojects through the plain camera matrix.
pub(crate) fn optimal_camera_matrix(
    camera: &Matrix3<f64>,
    distortion: &DistortionCoeffs,
    image_size: (u32, u32),
) -> Matrix3<f64> {
    let w = image_size.0 as f64;
    let h = image_size.1 as f64;

    const STEPS: usize = 16;
    let mut min_x = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for s in 0..=STEPS {
        let t = s as f64 / STEPS as f64;
        let border = [
            (t * (w - 1.0), 0.0),
            (t * (w - 1.0), h - 1.0),
            (0.0, t * (h - 1.0)),
            (w - 1.0, t * (h - 1.0)),
        ];
        for (x, y) in border {
            let n = distortion.undistort(normalize_pixel(camera, Point2::new(x, y)));
            min_x = min_x.min(n.x);
            max_x = max_x.max(n.x);
            min_y = min_y.min(n.y);
            max_y = max_y.max(n.y);
        }
    }

    let span_x = max_x - min_x;
    let span_y = max_y - min_y;
    if !(span_x > 0.0 && span_y > 0.0) || !span_x.is_finite() || !span_y.is_finite() {
        return *camera;
    }

    let fx = (w - 1.0) / span_x;
    let fy = (h - 1.0) / span_y;
    Matrix3::new(fx, 0.0, -min_x * fx, 0.0, fy, -min_y * fy, 0.0, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    const IMAGE_SIZE: (u32, u32) = (640, 480);
    const FOCAL: f64 = 850.0;

    fn camera_gt() -> Matrix3<f64> {
        let cx = (IMAGE_SIZE.0 as f64 - 1.0) / 2.0;
        let cy = (IMAGE_SIZE.1 as f64 - 1.0) / 2.0;
        Matrix3::new(FOCAL, 0.0, cx, 0.0, FOCAL, cy, 0.0, 0.0, 1.0)
    }

    fn board_points() -> Vec<Point2<f64>> {
        crate::BoardSpec {
            cols: 9,
            rows: 6,
            square_size: 20.0,
        }
        .object_points()
    }

    fn pose_homography(camera: &Matrix3<f64>, rot: Rotation3<f64>, t: Vector3<f64>) -> Homography {
        // For the Z=0 plane, H = K [r1 r2 t].
        let r = rot.matrix();
        let mut h = Matrix3::zeros();
        h.set_column(0, &(camera * r.column(0)));
        h.set_column(1, &(camera * r.column(1)));
        h.set_column(2, &(camera * t));
        Homography::new(h)
    }

    fn poses() -> Vec<(Rotation3<f64>, Vector3<f64>)> {
        vec![
            (
                Rotation3::from_euler_angles(0.25, 0.1, 0.05),
                Vector3::new(-80.0, -50.0, 420.0),
            ),
            (
                Rotation3::from_euler_angles(-0.1, 0.3, -0.05),
                Vector3::new(-70.0, -60.0, 450.0),
            ),
            (
                Rotation3::from_euler_angles(0.15, -0.25, 0.1),
                Vector3::new(-90.0, -40.0, 400.0),
            ),
        ]
    }

    fn project(
        camera: &Matrix3<f64>,
        distortion: &DistortionCoeffs,
        h: &Homography,
        board: &[Point2<f64>],
    ) -> Vec<Point2<f64>> {
        board
            .iter()
            .map(|&p| {
                let ideal = h.apply(p).expect("point in front of camera");
                pixel_from_normalized(camera, distortion.distort(normalize_pixel(camera, ideal)))
            })
            .collect()
    }

    fn synthetic_views(distortion: &DistortionCoeffs) -> (Vec<Homography>, Vec<Vec<Point2<f64>>>) {
        let camera = camera_gt();
        let board = board_points();
        let mut hs = Vec::new();
        let mut views = Vec::new();
        for (rot, t) in poses() {
            let h = pose_homography(&camera, rot, t);
            views.push(project(&camera, distortion, &h, &board));
            hs.push(h);
        }
        (hs, views)
    }

    #[test]
    fn focal_recovered_from_clean_views() {
        let (_, views) = synthetic_views(&DistortionCoeffs::zero());
        let out = calibrate_planar(&board_points(), &views, IMAGE_SIZE).expect("calibrates");

        assert!(
            (out.camera_matrix[(0, 0)] - FOCAL).abs() < 0.5,
            "focal {} should be close to {}",
            out.camera_matrix[(0, 0)],
            FOCAL
        );
        assert!(out.distortion.0[0].abs() < 1e-4);
        assert!(out.rms_error < 1e-6, "rms {}", out.rms_error);
    }

    #[test]
    fn distortion_fit_is_exact_with_true_homographies() {
        let truth = DistortionCoeffs::radial(-0.08, 0.015, 0.0);
        let (hs, views) = synthetic_views(&truth);
        let fitted =
            fit_radial_distortion(&camera_gt(), &hs, &board_points(), &views).expect("fit");

        assert!((fitted.0[0] - truth.0[0]).abs() < 1e-9, "k1 {}", fitted.0[0]);
        assert!((fitted.0[1] - truth.0[1]).abs() < 1e-9, "k2 {}", fitted.0[1]);
    }

    #[test]
    fn full_solve_recovers_radial_distortion() {
        let truth = DistortionCoeffs::radial(-0.08, 0.0, 0.0);
        let (_, views) = synthetic_views(&truth);
        let out = calibrate_planar(&board_points(), &views, IMAGE_SIZE).expect("calibrates");

        let f = out.camera_matrix[(0, 0)];
        assert!((f - FOCAL).abs() / FOCAL < 0.05, "focal {}", f);
        assert!(
            (out.distortion.0[0] - truth.0[0]).abs() < 0.025,
            "k1 {}",
            out.distortion.0[0]
        );
        assert!(out.rms_error < 0.5, "rms {}", out.rms_error);
    }

    #[test]
    fn fronto_parallel_views_are_degenerate() {
        let camera = camera_gt();
        let board = board_points();
        let h = pose_homography(
            &camera,
            Rotation3::identity(),
            Vector3::new(-80.0, -50.0, 420.0),
        );
        let views = vec![project(&camera, &DistortionCoeffs::zero(), &h, &board)];

        assert!(matches!(
            calibrate_planar(&board, &views, IMAGE_SIZE),
            Err(CalibrateError::DegenerateGeometry)
        ));
    }

    #[test]
    fn optimal_matrix_is_identity_transform_without_distortion() {
        let camera = camera_gt();
        let optimal = optimal_camera_matrix(&camera, &DistortionCoeffs::zero(), IMAGE_SIZE);
        for (a, b) in optimal.iter().zip(camera.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
