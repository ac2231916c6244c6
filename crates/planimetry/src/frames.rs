//! Frame acquisition for calibration runs.
//!
//! Video decoding is the host application's concern; the pipeline only
//! consumes frames through [`FrameSource`]. [`ImageSequence`] walks a
//! directory of numerically named stills (`1.jpg`, `2.jpg`, ...), the
//! layout a frame extractor produces, in index order.

use log::warn;
use std::path::{Path, PathBuf};

/// Sequential access to grayscale frames of a recording.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<image::GrayImage>;

    /// Frames per second of the underlying stream, when the container
    /// reports one. Still-image sequences have none.
    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ImageSequenceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no numerically named frames in {0}")]
    Empty(PathBuf),
}

/// Frames stored as numbered still images in one directory.
pub struct ImageSequence {
    files: std::vec::IntoIter<PathBuf>,
}

impl ImageSequence {
    /// Collect every file whose stem parses as a frame index and order
    /// them numerically (`2.jpg` before `10.jpg`).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ImageSequenceError> {
        let dir = dir.as_ref();
        let mut indexed: Vec<(u64, PathBuf)> = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(index) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            indexed.push((index, path));
        }

        if indexed.is_empty() {
            return Err(ImageSequenceError::Empty(dir.to_path_buf()));
        }

        indexed.sort_by_key(|(index, _)| *index);
        let files: Vec<PathBuf> = indexed.into_iter().map(|(_, path)| path).collect();
        Ok(Self {
            files: files.into_iter(),
        })
    }

    /// Frames not yet handed out.
    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Option<image::GrayImage> {
        for path in self.files.by_ref() {
            match image::open(&path) {
                Ok(img) => return Some(img.to_luma8()),
                Err(err) => warn!("skipping unreadable frame {}: {err}", path.display()),
            }
        }
        None
    }
}

impl Iterator for ImageSequence {
    type Item = image::GrayImage;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}
