//! Pipeline error taxonomy.
//!
//! Configuration problems surface as [`PipelineError::Config`] and fail the
//! call that introduced them; transient GPU teardown races are handled at the
//! call sites (logged, not escalated) and never reach this type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fatal configuration error: unknown module name, bad dimensions,
    /// missing required setting. No partial state is retained.
    #[error("configuration error: {0}")]
    Config(String),

    /// The settings string was not valid JSON.
    #[error("invalid settings JSON: {0}")]
    Settings(#[from] serde_json::Error),

    /// GPU adapter/device acquisition or readback failed.
    #[error("GPU error: {0}")]
    Gpu(String),

    /// Recording or info/parameter file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recorded frame encoding failed.
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_formats_message() {
        let err = PipelineError::config("no such module: warp");
        assert_eq!(err.to_string(), "configuration error: no such module: warp");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
