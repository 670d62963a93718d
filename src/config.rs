use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::background::MogSettings;

/// Title of the window showing the annotated live frame
pub const DETECTED_WINDOW: &str = "Detected Objects";

/// Title of the window showing the model's background estimate
pub const BACKGROUND_WINDOW: &str = "Background as determined by the subtraction algorithm";

/// Default key-poll window between ticks
pub const DEFAULT_WAIT: Duration = Duration::from_millis(30);

/// Where frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    File(PathBuf),
    Camera(u32),
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::File(path) => write!(f, "video file {}", path.display()),
            SourceSpec::Camera(index) => write!(f, "camera {}", index),
        }
    }
}

/// Everything the main loop needs, fixed before the first frame
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceSpec,
    pub model: MogSettings,
    pub wait: Duration,
}
