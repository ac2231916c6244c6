//! JSON persistence for lens calibrations.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum LensIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("cannot store an uncalibrated lens model")]
    NotCalibrated,
    #[error("malformed lens calibration: {0}")]
    Malformed(&'static str),
}

/// On-disk document for one lens calibration. Maps are not persisted;
/// they are derived state and are rebuilt after every load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LensCalibrationFile {
    pub frame_count: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub camera_matrix: [[f64; 3]; 3],
    pub optimal_camera_matrix: [[f64; 3]; 3],
    pub distortion_coefficients: Vec<f64>,
}

impl LensCalibrationFile {
    /// Load a JSON calibration from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, LensIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this calibration to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), LensIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub(crate) fn matrix_rows(m: &nalgebra::Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

pub(crate) fn matrix_from_rows(rows: &[[f64; 3]; 3]) -> nalgebra::Matrix3<f64> {
    nalgebra::Matrix3::from_row_slice(&[
        rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
        rows[2][1], rows[2][2],
    ])
}
