/// Frame acquisition.
///
/// The daemon reads screenshots from a file that an external capture tool
/// keeps refreshing. Frames are converted to grayscale once, here; every
/// region crop and matcher downstream works on luma.
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::GrayImage;

/// One sampled screenshot.
#[derive(Debug)]
pub struct Frame {
    pub image: GrayImage,
    /// Time spent acquiring and decoding the frame.
    pub elapsed: Duration,
}

pub trait FrameSource: Send {
    fn grab(&mut self) -> Result<Frame>;
}

/// Reads the frame from a PNG file on every grab.
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for FileFrameSource {
    fn grab(&mut self) -> Result<Frame> {
        let start = Instant::now();
        let image = image::open(&self.path)
            .with_context(|| format!("Failed to read frame: {}", self.path.display()))?
            .to_luma8();
        Ok(Frame { image, elapsed: start.elapsed() })
    }
}
