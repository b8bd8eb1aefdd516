//! Storage layer for the asset analysis system
//!
//! This crate provides the storage abstractions processors and the daemon rely on:
//! - **Object File System (OFS)**: resolves `(entityType, entityId, category, name)`
//!   to a location for derived files (proxies), over a local directory or a cloud bucket
//! - **Object Storage (S3/MinIO)**: uploads, downloads and paged listings
//! - **Localizer**: turns remote source URIs into local files, cached by content key
//! - **Listers**: one-page-at-a-time listings feeding bulk generators
//!
//! # Example
//!
//! ```rust,no_run
//! use asset_analysis_storage::{LocalObjectFileSystem, ObjectFileSystem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ofs = LocalObjectFileSystem::new("/var/lib/analyst/ofs");
//!     let location = ofs.locate("assets", "12345", "proxy", "image_512x384.jpg").await?;
//!     println!("{} ({})", location.uri, location.media_type);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub mod listing;
pub mod localize;
pub mod object_storage;
pub mod ofs;

pub use listing::{lister_for_uri, DirectoryLister, ListingPage, ObjectLister, S3Lister};
pub use localize::{CachingLocalizer, FileLocalizer};
pub use object_storage::{split_object_uri, ObjectPage, ObjectStorage, S3Config, S3ObjectStorage};
pub use ofs::{
    CloudObjectFileSystem, EntityType, FileKey, LocalObjectFileSystem, Location, ObjectFileSystem,
};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// The 4-tuple (or URI) cannot be resolved to a location
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A backend could not be reached; transient, never retried here
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StorageError {
    /// True for failures worth retrying by the caller
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::S3Error(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// OFS backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase", deny_unknown_fields)]
pub enum OfsConfig {
    /// Files live under a local root directory
    Local { root: PathBuf },

    /// Files live in a cloud bucket
    Cloud {
        /// URI scheme of the bucket ("s3", "gs", ...)
        #[serde(default = "default_scheme")]
        scheme: String,
        bucket: String,
        /// Key prefix prepended to every location (e.g. "ofs/")
        #[serde(default)]
        prefix: String,
        /// Base URL of an external `/files/_locate` service
        #[serde(default)]
        locate_service: Option<String>,
    },
}

fn default_scheme() -> String {
    "s3".to_string()
}

impl Default for OfsConfig {
    fn default() -> Self {
        OfsConfig::Local {
            root: PathBuf::from("/tmp/asset-analysis/ofs"),
        }
    }
}

/// Build the OFS backend described by `config`
///
/// `storage` is used by the cloud backend to upload stored files.
pub fn build_ofs(
    config: &OfsConfig,
    storage: Option<Arc<dyn ObjectStorage>>,
) -> Arc<dyn ObjectFileSystem> {
    match config {
        OfsConfig::Local { root } => Arc::new(LocalObjectFileSystem::new(root)),
        OfsConfig::Cloud {
            scheme,
            bucket,
            prefix,
            locate_service,
        } => {
            let mut ofs = CloudObjectFileSystem::new(scheme, bucket, prefix);
            if let Some(url) = locate_service {
                ofs = ofs.with_locate_service(url);
            }
            if let Some(storage) = storage {
                ofs = ofs.with_storage(storage);
            }
            Arc::new(ofs)
        }
    }
}
