use crate::Homography;
use nalgebra::Point2;

/// Borrowed row-major grayscale pixels, len = width * height.
#[derive(Clone, Copy, Debug)]
pub struct GrayView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8],
}

/// Owned row-major grayscale pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayBuffer {
    /// A zero-filled buffer.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn view(&self) -> GrayView<'_> {
        GrayView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

#[inline]
fn get_gray(src: &GrayView<'_>, x: i64, y: i64) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i64 || y >= src.height as i64 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_bilinear(src: &GrayView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_gray(src, x0, y0) as f64;
    let p10 = get_gray(src, x0 + 1, y0) as f64;
    let p01 = get_gray(src, x0, y0 + 1) as f64;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayView<'_>, x: f64, y: f64) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}

/// Warp `src` into an `out_w` x `out_h` buffer: every destination pixel is
/// mapped through `h_src_from_dst` and sampled bilinearly. Destination
/// pixels with no finite preimage stay black.
pub fn warp_perspective(
    src: &GrayView<'_>,
    h_src_from_dst: &Homography,
    out_w: usize,
    out_h: usize,
) -> GrayBuffer {
    let mut out = GrayBuffer::new(out_w, out_h);

    for y in 0..out_h {
        for x in 0..out_w {
            let p = Point2::new(x as f64, y as f64);
            if let Some(q) = h_src_from_dst.apply(p) {
                out.data[y * out_w + x] = sample_bilinear_u8(src, q.x, q.y);
            }
        }
    }

    out
}
