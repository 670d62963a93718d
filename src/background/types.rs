use anyhow::Result;
use image::{GrayImage, RgbImage};

/// Binary foreground mask: 0 = background, non-zero = foreground.
/// Dimensions match the frame it was computed from.
pub type ForegroundMask = GrayImage;

/// Tunables of the adaptive Gaussian-mixture background model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MogSettings {
    /// Frames the automatic learning rate averages over
    pub history: u32,
    /// Gaussian components kept per pixel
    pub mixtures: usize,
    /// Squared Mahalanobis distance under which a pixel matches the background
    pub var_threshold: f32,
    /// Squared Mahalanobis distance under which a sample updates a component
    pub var_threshold_gen: f32,
    /// Cumulative weight of the components that make up the background
    pub background_ratio: f32,
    pub var_init: f32,
    pub var_min: f32,
    pub var_max: f32,
    /// Weight decay that prunes unsupported components
    pub complexity_reduction: f32,
    pub shadow_detection: bool,
    /// Mask value written for shadow pixels
    pub shadow_value: u8,
    /// How much darker than the background a shadow may be (0..1)
    pub shadow_threshold: f32,
    /// Fixed learning rate; `None` derives it from `history`
    pub learning_rate: Option<f32>,
}

impl Default for MogSettings {
    fn default() -> Self {
        Self {
            history: 500,
            mixtures: 3,
            var_threshold: 16.0,
            var_threshold_gen: 9.0,
            background_ratio: 0.9,
            var_init: 15.0,
            var_min: 4.0,
            var_max: 75.0,
            complexity_reduction: 0.05,
            shadow_detection: false,
            shadow_value: 127,
            shadow_threshold: 0.5,
            learning_rate: None,
        }
    }
}

impl MogSettings {
    /// Settings with the two knobs exposed to users
    pub fn configure(mixtures: usize, shadow_detection: bool) -> Self {
        Self {
            mixtures,
            shadow_detection,
            ..Self::default()
        }
    }
}

/// Trait for background models
/// Allows swapping the statistical model, or stubbing it in tests
pub trait BackgroundModel {
    /// Update the model with `frame` and return its foreground mask
    fn apply(&mut self, frame: &RgbImage) -> Result<ForegroundMask>;

    /// Current estimate of the static scene, same size as the last frame
    fn background_image(&self) -> RgbImage;

    /// Forget everything learned so far
    fn reset(&mut self);
}
