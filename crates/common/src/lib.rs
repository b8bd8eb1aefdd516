//! Common types and utilities shared by the asset analysis crates
//!
//! - [`Asset`]: the namespaced attribute document every processor operates on
//! - [`media_types`]: extension to media type resolution
//! - [`ProcessingError`]: failures raised by media tooling (ffmpeg, image decoding)

pub mod asset;
pub mod media_types;

pub use asset::{Asset, AssetAttrs, AssetError};

use thiserror::Error;

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio stream found")]
    NoAudioStream,

    #[error("No video stream found")]
    NoVideoStream,

    #[error("Corrupted file: {0}")]
    CorruptedFile(String),

    #[error("FFmpeg error: {0}")]
    FFmpegError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;
