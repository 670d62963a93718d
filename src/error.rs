use thiserror::Error;

/// Failures raised by frame sources
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Could not open input source {source_name}: {reason}")]
    Open { source_name: String, reason: String },

    #[error("{0} executable not found. Please install FFmpeg.")]
    ToolMissing(&'static str),

    #[error("Failed to read frame from {source_name}: {reason}")]
    Read { source_name: String, reason: String },
}

impl SourceError {
    /// Whether the error means the source never produced a usable stream
    pub fn is_open_failure(&self) -> bool {
        matches!(self, SourceError::Open { .. } | SourceError::ToolMissing(_))
    }
}
