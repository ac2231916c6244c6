//! Chessboard-based lens distortion calibration.
//!
//! A [`LensCalibration`] starts empty, becomes calibrated either by
//! consuming a frame stream showing a chessboard
//! ([`LensCalibration::calibrate_from_frames`]) or by loading a saved
//! calibration, and corrects single points analytically or whole frames
//! through a precomputed remap table. The remap is derived state: it is
//! built on demand, never persisted, and is invalidated by
//! re-calibration or reload.

mod board;
mod distortion;
mod io;
mod map;
mod solve;

pub use board::{detect_board, order_into_grid, BoardSpec};
pub use distortion::DistortionCoeffs;
pub use io::{LensCalibrationFile, LensIoError};
pub use map::UndistortMap;

use distortion::{normalize_pixel, pixel_from_normalized};
use io::{matrix_from_rows, matrix_rows};
use log::{debug, info};
use nalgebra::{Matrix3, Point2};
use planimetry_core::{GrayBuffer, GrayView};
use std::path::Path;

/// Valid detections collected per calibration run when the caller does
/// not bound the stream explicitly.
pub const DEFAULT_CALIB_FRAMES: usize = 50;

#[derive(thiserror::Error, Debug)]
pub enum CalibrateError {
    #[error("no calibration pattern found in any frame")]
    NoValidFrames,
    #[error("degenerate view geometry: the pattern poses do not constrain the solution")]
    DegenerateGeometry,
    #[error("calibration produced parameters outside the sane numeric range")]
    NumericalRange,
}

#[derive(thiserror::Error, Debug)]
pub enum MapError {
    #[error("lens model is not calibrated")]
    NotCalibrated,
}

#[derive(thiserror::Error, Debug)]
pub enum CorrectImageError {
    #[error("undistortion map has not been built")]
    NotMapped,
    #[error("input resolution {got_width}x{got_height} does not match calibration resolution {want_width}x{want_height}")]
    SizeMismatch {
        want_width: u32,
        want_height: u32,
        got_width: u32,
        got_height: u32,
    },
}

/// Summary of a successful calibration run.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationReport {
    pub frames_used: u32,
    pub rms_error: f64,
}

#[derive(Clone, Debug)]
struct LensState {
    image_size: (u32, u32),
    camera_matrix: Matrix3<f64>,
    optimal_camera_matrix: Matrix3<f64>,
    distortion: DistortionCoeffs,
    frame_count: u32,
}

/// Lens distortion model estimated from views of a chessboard pattern.
#[derive(Clone, Debug)]
pub struct LensCalibration {
    board: BoardSpec,
    state: Option<LensState>,
    map: Option<UndistortMap>,
}

impl Default for LensCalibration {
    fn default() -> Self {
        Self::new(BoardSpec::default())
    }
}

impl LensCalibration {
    pub fn new(board: BoardSpec) -> Self {
        Self {
            board,
            state: None,
            map: None,
        }
    }

    pub fn board(&self) -> &BoardSpec {
        &self.board
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.state.as_ref().map(|s| s.image_size)
    }

    pub fn camera_matrix(&self) -> Option<&Matrix3<f64>> {
        self.state.as_ref().map(|s| &s.camera_matrix)
    }

    pub fn optimal_camera_matrix(&self) -> Option<&Matrix3<f64>> {
        self.state.as_ref().map(|s| &s.optimal_camera_matrix)
    }

    pub fn distortion_coefficients(&self) -> Option<&DistortionCoeffs> {
        self.state.as_ref().map(|s| &s.distortion)
    }

    /// Valid detections behind the current calibration; 0 when
    /// uncalibrated.
    pub fn frame_count(&self) -> u32 {
        self.state.as_ref().map_or(0, |s| s.frame_count)
    }

    /// Calibrate from a bounded frame stream.
    ///
    /// Frames without a full pattern detection are skipped. Collection
    /// stops once `max_frames` valid detections are gathered (`0` means
    /// [`DEFAULT_CALIB_FRAMES`]) or the stream ends. On any error the
    /// previous calibration, if one existed, is left untouched.
    pub fn calibrate_from_frames<I>(
        &mut self,
        frames: I,
        max_frames: usize,
    ) -> Result<CalibrationReport, CalibrateError>
    where
        I: IntoIterator<Item = image::GrayImage>,
    {
        let target = if max_frames == 0 {
            DEFAULT_CALIB_FRAMES
        } else {
            max_frames
        };

        let mut views: Vec<Vec<Point2<f64>>> = Vec::new();
        let mut image_size = (0u32, 0u32);

        for (index, frame) in frames.into_iter().enumerate() {
            if views.len() >= target {
                break;
            }
            image_size = (frame.width(), frame.height());
            match detect_board(&frame, &self.board) {
                Some(corners) => {
                    debug!("frame {index}: pattern found ({} corners)", corners.len());
                    views.push(corners);
                }
                None => debug!("frame {index}: no pattern, skipped"),
            }
        }

        if views.is_empty() {
            return Err(CalibrateError::NoValidFrames);
        }

        let board_points = self.board.object_points();
        let out = solve::calibrate_planar(&board_points, &views, image_size)?;
        let optimal = solve::optimal_camera_matrix(&out.camera_matrix, &out.distortion, image_size);

        info!(
            "lens calibration: {} views, rms reprojection error {:.4} px",
            views.len(),
            out.rms_error
        );

        self.state = Some(LensState {
            image_size,
            camera_matrix: out.camera_matrix,
            optimal_camera_matrix: optimal,
            distortion: out.distortion,
            frame_count: views.len() as u32,
        });
        self.map = None;

        Ok(CalibrationReport {
            frames_used: self.frame_count(),
            rms_error: out.rms_error,
        })
    }

    /// Load a saved calibration; the prior state survives a failed load.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), LensIoError> {
        let file = LensCalibrationFile::load_json(path)?;
        self.apply_file_model(file)
    }

    /// Adopt an already-parsed calibration document.
    pub fn apply_file_model(&mut self, file: LensCalibrationFile) -> Result<(), LensIoError> {
        if file.image_width == 0 || file.image_height == 0 {
            return Err(LensIoError::Malformed("image size must be positive"));
        }
        let camera_matrix = matrix_from_rows(&file.camera_matrix);
        let distortion = DistortionCoeffs::from_slice(&file.distortion_coefficients);
        if !camera_matrix.iter().all(|v| v.is_finite()) || !distortion.is_finite() {
            return Err(LensIoError::Malformed("parameters must be finite"));
        }

        self.state = Some(LensState {
            image_size: (file.image_width, file.image_height),
            camera_matrix,
            optimal_camera_matrix: matrix_from_rows(&file.optimal_camera_matrix),
            distortion,
            frame_count: file.frame_count,
        });
        self.map = None;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LensIoError> {
        self.file_model()?.write_json(path)
    }

    pub fn file_model(&self) -> Result<LensCalibrationFile, LensIoError> {
        let state = self.state.as_ref().ok_or(LensIoError::NotCalibrated)?;
        Ok(LensCalibrationFile {
            frame_count: state.frame_count,
            image_width: state.image_size.0,
            image_height: state.image_size.1,
            camera_matrix: matrix_rows(&state.camera_matrix),
            optimal_camera_matrix: matrix_rows(&state.optimal_camera_matrix),
            distortion_coefficients: state.distortion.as_slice().to_vec(),
        })
    }

    /// Build the per-pixel remap table from the current intrinsics.
    /// Idempotent: an existing table is kept as is.
    pub fn build_undistortion_map(&mut self) -> Result<(), MapError> {
        let state = self.state.as_ref().ok_or(MapError::NotCalibrated)?;
        if self.map.is_none() {
            self.map = Some(UndistortMap::build(
                &state.camera_matrix,
                &state.distortion,
                state.image_size,
            ));
        }
        Ok(())
    }

    /// Undistort a whole frame through the remap table.
    ///
    /// The input must match the calibration resolution exactly; the
    /// per-pixel table is meaningless for any other size.
    pub fn correct_image(&self, image: &GrayView<'_>) -> Result<GrayBuffer, CorrectImageError> {
        let map = self.map.as_ref().ok_or(CorrectImageError::NotMapped)?;
        let (want_w, want_h) = map.size();
        if image.width != want_w || image.height != want_h {
            return Err(CorrectImageError::SizeMismatch {
                want_width: want_w as u32,
                want_height: want_h as u32,
                got_width: image.width as u32,
                got_height: image.height as u32,
            });
        }
        Ok(map.remap(image))
    }

    /// Undistort a single point analytically.
    ///
    /// Needs only a calibration, not the remap table. `None` for negative
    /// input coordinates or an uncalibrated model.
    pub fn correct_point(&self, point: Point2<f64>) -> Option<Point2<f64>> {
        if point.x < 0.0 || point.y < 0.0 {
            return None;
        }
        let state = self.state.as_ref()?;
        let n = state
            .distortion
            .undistort(normalize_pixel(&state.camera_matrix, point));
        Some(pixel_from_normalized(&state.camera_matrix, n))
    }
}
