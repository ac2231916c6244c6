//! Precomputed per-pixel undistortion remap.
//!
//! For every pixel of the corrected output the table stores the source
//! position to sample in the raw frame: normalize through the camera
//! matrix, apply the forward distortion model, reproject. A cached table
//! turns whole-image correction into one bilinear lookup per pixel; the
//! table is a derived artifact of the calibration and is rebuilt, never
//! persisted.

use crate::distortion::{normalize_pixel, pixel_from_normalized, DistortionCoeffs};
use nalgebra::{Matrix3, Point2};
use planimetry_core::{sample_bilinear_u8, GrayBuffer, GrayView};

#[derive(Clone, Debug)]
pub struct UndistortMap {
    width: usize,
    height: usize,
    source: Vec<(f32, f32)>,
}

impl UndistortMap {
    pub(crate) fn build(
        camera: &Matrix3<f64>,
        distortion: &DistortionCoeffs,
        image_size: (u32, u32),
    ) -> Self {
        let width = image_size.0 as usize;
        let height = image_size.1 as usize;
        let mut source = Vec::with_capacity(width * height);

        for y in 0..height {
            for x in 0..width {
                let n = normalize_pixel(camera, Point2::new(x as f64, y as f64));
                let p = pixel_from_normalized(camera, distortion.distort(n));
                source.push((p.x as f32, p.y as f32));
            }
        }

        Self {
            width,
            height,
            source,
        }
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Resample `src` through the table. The caller guarantees that the
    /// source resolution matches the table resolution.
    pub fn remap(&self, src: &GrayView<'_>) -> GrayBuffer {
        let mut out = GrayBuffer::new(self.width, self.height);
        for (dst, &(sx, sy)) in out.data.iter_mut().zip(&self.source) {
            *dst = sample_bilinear_u8(src, sx as f64, sy as f64);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distortion_remap_is_the_identity() {
        let camera = Matrix3::new(500.0, 0.0, 11.5, 0.0, 500.0, 7.5, 0.0, 0.0, 1.0);
        let map = UndistortMap::build(&camera, &DistortionCoeffs::zero(), (24, 16));

        let mut img = GrayBuffer::new(24, 16);
        for (i, px) in img.data.iter_mut().enumerate() {
            *px = (i % 251) as u8;
        }

        let out = map.remap(&img.view());
        assert_eq!(out, img);
    }

    #[test]
    fn barrel_distortion_moves_border_samples_inward() {
        let camera = Matrix3::new(300.0, 0.0, 160.0, 0.0, 300.0, 120.0, 0.0, 0.0, 1.0);
        let dist = DistortionCoeffs::radial(-0.2, 0.0, 0.0);
        let map = UndistortMap::build(&camera, &dist, (320, 240));

        // The source sample for the output's top-left corner must lie
        // strictly inside the raw frame for a barrel lens.
        let (sx, sy) = map.source[0];
        assert!(sx > 0.0 && sy > 0.0, "sample ({sx}, {sy})");
    }
}
