use super::CaptureSource;
use crate::error::SourceError;
use anyhow::Result;
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    index: u32,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    pub fn new(device_index: u32) -> Result<Self, SourceError> {
        tracing::info!("Initializing webcam {}", device_index);

        let open_error = |reason: String| SourceError::Open {
            source_name: format!("camera {}", device_index),
            reason,
        };

        let index = CameraIndex::Index(device_index);
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

        let mut camera = Camera::new(index, requested).map_err(|e| open_error(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| open_error(format!("failed to open stream: {}", e)))?;

        let resolution = camera.resolution();
        tracing::info!(
            "Webcam initialized at {}x{}",
            resolution.width(),
            resolution.height()
        );

        Ok(Self {
            camera,
            index: device_index,
            width: resolution.width(),
            height: resolution.height(),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<Option<RgbImage>> {
        let read_error = |reason: String| SourceError::Read {
            source_name: format!("camera {}", self.index),
            reason,
        };

        let frame = self
            .camera
            .frame()
            .map_err(|e| read_error(e.to_string()))?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| read_error(format!("failed to decode frame: {}", e)))?;

        Ok(Some(decoded))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera {} stream: {}", self.index, e);
        }
    }
}
