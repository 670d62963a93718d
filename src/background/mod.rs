mod mog2;
pub mod types;

pub use mog2::Mog2;
pub use types::{BackgroundModel, ForegroundMask, MogSettings};

/// Create the default background model (adaptive GMM)
pub fn create_default_model(settings: MogSettings) -> Box<dyn BackgroundModel> {
    tracing::info!(
        "Background model: {} mixtures, shadow detection {}",
        settings.mixtures,
        if settings.shadow_detection { "on" } else { "off" }
    );
    Box::new(Mog2::new(settings))
}
