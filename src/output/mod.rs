mod window;

pub use window::run_windows;

use anyhow::Result;
use image::RgbImage;
use std::time::Duration;

/// Trait for output destinations
pub trait OutputSink {
    /// Show the annotated frame and the current background estimate
    fn write_frames(&mut self, annotated: &RgbImage, background: &RgbImage) -> Result<()>;

    /// Wait up to `timeout` for a key press; true if one arrived
    fn poll_key(&mut self, timeout: Duration) -> Result<bool>;
}
