//! High-level facade for the planimetry measurement pipeline.
//!
//! This crate ties the pieces together:
//! - `planimetry_core`: homographies, grayscale buffers, quads.
//! - `planimetry_lens`: chessboard-based lens distortion calibration.
//! - `planimetry_perspective`: perspective rectification with scale
//!   recovery.
//! - [`MeasurementFrame`]: the composed raw-pixel -> real-world
//!   coordinate transform with an anchored origin.
//!
//! ## Quickstart
//!
//! ```no_run
//! use nalgebra::Point2;
//! use planimetry::{ImageSequence, LensCalibration, MeasurementFrame, PerspectiveCalibration};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut lens = LensCalibration::default();
//! lens.calibrate_from_frames(ImageSequence::open("frames/")?, 50)?;
//! lens.build_undistortion_map()?;
//!
//! let mut perspective = PerspectiveCalibration::new();
//! perspective.load("perspective.json")?;
//!
//! let mut frame = MeasurementFrame::new(&lens, &perspective);
//! assert!(frame.set_origin(Point2::new(120.0, 96.0)));
//! if let Some(mm) = frame.real_distance(Point2::new(150.0, 200.0), Point2::new(420.0, 210.0)) {
//!     println!("distance: {mm:.1} mm");
//! }
//! # Ok(())
//! # }
//! ```

pub use planimetry_core as core;
pub use planimetry_lens as lens;
pub use planimetry_perspective as perspective;

pub use planimetry_core::{GrayBuffer, GrayView, Homography, Quad};
pub use planimetry_lens::{BoardSpec, LensCalibration};
pub use planimetry_perspective::{PerspectiveCalibration, TrueSize};

mod adapt;
mod frames;
mod measure;

pub use adapt::{gray_buffer_from_image, gray_view, image_from_gray_buffer, undistorted_quad};
pub use frames::{FrameSource, ImageSequence, ImageSequenceError};
pub use measure::MeasurementFrame;
