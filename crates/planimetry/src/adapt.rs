//! Adapters between `image` crate buffers and the core grayscale types.

use planimetry_core::{GrayBuffer, GrayView, Quad};
use planimetry_lens::LensCalibration;

/// Borrow an `image::GrayImage` as the lightweight core view type.
pub fn gray_view(img: &image::GrayImage) -> GrayView<'_> {
    GrayView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

pub fn gray_buffer_from_image(img: &image::GrayImage) -> GrayBuffer {
    GrayBuffer {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw().clone(),
    }
}

/// `None` when the buffer dimensions overflow `u32`.
pub fn image_from_gray_buffer(buf: &GrayBuffer) -> Option<image::GrayImage> {
    let width = u32::try_from(buf.width).ok()?;
    let height = u32::try_from(buf.height).ok()?;
    image::GrayImage::from_raw(width, height, buf.data.clone())
}

/// Lens-correct all four corners of a reference quad.
///
/// Perspective calibration expects its source points in the undistorted
/// pixel grid, so user-picked corners are run through the lens model
/// first. `None` if any corner fails correction.
pub fn undistorted_quad(lens: &LensCalibration, quad: &Quad) -> Option<Quad> {
    let mut points = quad.points;
    for p in &mut points {
        *p = lens.correct_point(*p)?;
    }
    Some(Quad { points })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_round_trip_preserves_pixels() {
        let img = image::GrayImage::from_fn(6, 4, |x, y| image::Luma([(y * 6 + x) as u8]));

        let buf = gray_buffer_from_image(&img);
        assert_eq!(buf.width, 6);
        assert_eq!(buf.height, 4);

        let back = image_from_gray_buffer(&buf).expect("valid dims");
        assert_eq!(back, img);
    }

    #[test]
    fn view_borrows_without_copying() {
        let img = image::GrayImage::new(5, 3);
        let view = gray_view(&img);
        assert_eq!(view.width, 5);
        assert_eq!(view.height, 3);
        assert_eq!(view.data.len(), 15);
    }

    #[test]
    fn uncalibrated_lens_fails_quad_correction() {
        let lens = LensCalibration::default();
        let quad = Quad::from_arrays([[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]]);
        assert!(undistorted_quad(&lens, &quad).is_none());
    }
}
