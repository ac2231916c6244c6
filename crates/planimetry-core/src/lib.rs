//! Planar geometry primitives for the planimetry measurement pipeline.
//!
//! This crate is intentionally small and purely geometric: homography
//! estimation and application, grayscale pixel buffers with bilinear
//! sampling, and the ordered quad type the calibration layers exchange.
//! It does *not* depend on any image codec or corner detector.

mod homography;
mod image;
mod quad;

pub use homography::{estimate_homography, homography_from_quad, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, warp_perspective, GrayBuffer, GrayView};
pub use quad::Quad;
