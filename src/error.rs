//! Error types for the rasterization pipeline

use thiserror::Error;

use crate::retry::AttemptRecord;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning a render target into a document
#[derive(Error, Debug)]
pub enum Error {
    /// Target missing, detached, or zero-sized
    #[error("Invalid render target: {0}")]
    InvalidTargetError(String),

    /// Capturing the target's pixels failed
    #[error("Rasterization failed: {0}")]
    RasterizationError(String),

    /// Composing the page around a valid bitmap failed
    #[error("Page assembly failed: {0}")]
    AssemblyError(String),

    /// Every attempt failed; `last` is the most recent underlying error
    #[error("Document pipeline exhausted after {} attempt(s): {last}", .attempts.len())]
    PipelineExhaustedError {
        attempts: Vec<AttemptRecord>,
        last: Box<Error>,
    },

    /// The document could not be transport-encoded
    #[error("Encoding failed: {0}")]
    EncodingError(String),

    /// An image source could not be fetched or decoded
    #[error("Image load failed: {0}")]
    ImageLoadError(String),

    /// Invalid policy or scene description
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Persisting a document failed
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::ImageLoadError(err.to_string())
    }
}
