//! JSON persistence for perspective calibrations.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum PerspectiveIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("cannot store an uncalibrated perspective model")]
    NotCalibrated,
    #[error("malformed perspective calibration: {0}")]
    Malformed(&'static str),
}

/// On-disk document for one perspective calibration. Point arrays keep
/// the top-left, top-right, bottom-left, bottom-right corner order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveCalibrationFile {
    pub scale_factor: f64,
    pub original_points: [[f64; 2]; 4],
    pub transformed_points: [[f64; 2]; 4],
    pub perspective_transformation: [[f64; 3]; 3],
}

impl PerspectiveCalibrationFile {
    /// Load a JSON calibration from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, PerspectiveIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this calibration to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), PerspectiveIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
