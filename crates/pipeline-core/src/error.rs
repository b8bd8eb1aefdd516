//! Error types for the processor system

use asset_analysis_common::{AssetError, ProcessingError};
use asset_analysis_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error kinds reported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown class ref or image
    ResolutionError,
    /// Unrecognized or invalid processor arguments
    ConfigurationError,
    /// Asset lacks something a processor requires; the processor is skipped
    ValidationError,
    /// Recoverable processing fault; the chain continues
    ProcessingError,
    /// Unrecoverable fault for this asset; the chain stops
    FatalProcessingError,
    /// Unclassified fault, handled as fatal to the asset
    InternalError,
    /// Malformed envelope or channel failure
    ProtocolError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ResolutionError => "ResolutionError",
            ErrorKind::ConfigurationError => "ConfigurationError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ProcessingError => "ProcessingError",
            ErrorKind::FatalProcessingError => "FatalProcessingError",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::ProtocolError => "ProtocolError",
        }
    }

    /// True when the rest of the asset's chain must not run
    pub fn is_fatal_to_asset(&self) -> bool {
        matches!(
            self,
            ErrorKind::FatalProcessingError | ErrorKind::InternalError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by processors and generators
///
/// `Validation`, `Recoverable` and `Fatal` are the kinds a processor raises on
/// purpose. Everything else is classified by [`ProcessorError::kind`].
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Recoverable(String),

    #[error("{0}")]
    Fatal(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Resolution failed: {0}")]
    Resolution(#[from] RegistryError),

    #[error("Processor panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] ProcessingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ProcessorError {
    /// Wire classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessorError::Validation(_) => ErrorKind::ValidationError,
            ProcessorError::Recoverable(_) => ErrorKind::ProcessingError,
            ProcessorError::Fatal(_) | ProcessorError::Media(_) => ErrorKind::FatalProcessingError,
            ProcessorError::Configuration(_) => ErrorKind::ConfigurationError,
            ProcessorError::Resolution(_) => ErrorKind::ResolutionError,
            ProcessorError::Asset(AssetError::MissingAttribute(_)) => ErrorKind::ValidationError,
            ProcessorError::Storage(StorageError::Resolution(_)) => ErrorKind::ResolutionError,
            ProcessorError::Storage(StorageError::Unavailable(_)) => ErrorKind::ProcessingError,
            ProcessorError::Asset(_)
            | ProcessorError::Storage(_)
            | ProcessorError::Panicked(_)
            | ProcessorError::Io(_)
            | ProcessorError::Serialization(_)
            | ProcessorError::Other(_) => ErrorKind::InternalError,
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No processor registered for class '{0}'")]
    UnknownClass(String),

    #[error("No generator registered for class '{0}'")]
    UnknownGenerator(String),

    #[error("Image '{requested}' is not served here (serving '{served}')")]
    ImageMismatch { requested: String, served: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_kinds() {
        assert_eq!(
            ProcessorError::Validation("x".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            ProcessorError::Recoverable("x".into()).kind(),
            ErrorKind::ProcessingError
        );
        assert_eq!(
            ProcessorError::Fatal("x".into()).kind(),
            ErrorKind::FatalProcessingError
        );
    }

    #[test]
    fn test_unclassified_errors_are_internal() {
        let io = ProcessorError::from(std::io::Error::other("disk"));
        assert_eq!(io.kind(), ErrorKind::InternalError);
        let other = ProcessorError::from(anyhow::anyhow!("boom"));
        assert_eq!(other.kind(), ErrorKind::InternalError);
        assert!(ErrorKind::InternalError.is_fatal_to_asset());
        assert!(!ErrorKind::ProcessingError.is_fatal_to_asset());
    }

    #[test]
    fn test_derived_kinds() {
        let missing = ProcessorError::from(AssetError::MissingAttribute("media.length".into()));
        assert_eq!(missing.kind(), ErrorKind::ValidationError);

        let unknown = ProcessorError::from(RegistryError::UnknownClass("pkg.Nope".into()));
        assert_eq!(unknown.kind(), ErrorKind::ResolutionError);

        let entity = ProcessorError::from(StorageError::Resolution("widgets".into()));
        assert_eq!(entity.kind(), ErrorKind::ResolutionError);

        let down = ProcessorError::from(StorageError::Unavailable("ofs".into()));
        assert_eq!(down.kind(), ErrorKind::ProcessingError);
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::FatalProcessingError).unwrap();
        assert_eq!(json, "\"FatalProcessingError\"");
    }
}
