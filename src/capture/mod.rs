mod video_file;
mod webcam;

pub use video_file::VideoFileCapture;
pub use webcam::WebcamCapture;

use crate::config::SourceSpec;
use crate::error::SourceError;
use anyhow::Result;
use image::RgbImage;

/// Trait for frame sources
pub trait CaptureSource {
    /// Capture the next frame, or `None` once the stream has ended
    fn capture_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}

/// Open the source described by `spec`, failing if it cannot produce frames
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn CaptureSource>, SourceError> {
    match spec {
        SourceSpec::File(path) => Ok(Box::new(VideoFileCapture::open(path)?)),
        SourceSpec::Camera(index) => Ok(Box::new(WebcamCapture::new(*index)?)),
    }
}
