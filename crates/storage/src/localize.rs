//! Source file localization
//!
//! Processors work on local files. A [`FileLocalizer`] turns an asset's
//! `source.path` into a path on disk, downloading remote content on demand.

use crate::object_storage::{split_object_uri, ObjectStorage};
use crate::{StorageError, StorageResult};
use asset_analysis_common::media_types;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const GCS_PUBLIC_ENDPOINT: &str = "https://storage.googleapis.com";

/// Resolves a source URI to a readable local file
#[async_trait::async_trait]
pub trait FileLocalizer: Send + Sync {
    async fn localize(&self, uri: &str) -> StorageResult<PathBuf>;
}

/// Localizer that caches downloads under a directory keyed by URI hash
pub struct CachingLocalizer {
    cache_dir: PathBuf,
    http: reqwest::Client,
    storage: Option<Arc<dyn ObjectStorage>>,
}

impl CachingLocalizer {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            http: reqwest::Client::new(),
            storage: None,
        }
    }

    /// Enable `s3://` sources
    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Cache file for a URI: `<cache_dir>/<blake3(uri)>[.ext]`
    pub fn cache_path(&self, uri: &str) -> PathBuf {
        let hash = blake3::hash(uri.as_bytes()).to_hex();
        let name = match media_types::extension_of(uri) {
            Some(ext) => format!("{hash}.{ext}"),
            None => hash.to_string(),
        };
        self.cache_dir.join(name)
    }

    async fn download_http(&self, url: &str, target: &Path) -> StorageResult<()> {
        let response = self.http.get(url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                StorageError::Unavailable(format!("{url}: {e}"))
            } else {
                StorageError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(StorageError::Http(format!("{url}: HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;
        tokio::fs::write(target, &bytes).await?;
        Ok(())
    }

    async fn download(&self, uri: &str, target: &Path) -> StorageResult<()> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return self.download_http(uri, target).await;
        }

        match split_object_uri(uri) {
            Some(("gs", bucket, key)) => {
                let url = format!("{GCS_PUBLIC_ENDPOINT}/{bucket}/{key}");
                self.download_http(&url, target).await
            }
            Some(("s3", bucket, key)) => match &self.storage {
                Some(storage) => storage.get_file(bucket, key, target).await,
                None => Err(StorageError::InvalidConfig(
                    "s3:// sources need an S3 configuration".to_string(),
                )),
            },
            _ => Err(StorageError::Resolution(format!(
                "unsupported source URI '{uri}'"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl FileLocalizer for CachingLocalizer {
    async fn localize(&self, uri: &str) -> StorageResult<PathBuf> {
        if !uri.contains("://") || uri.starts_with("file://") {
            let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
            if !path.exists() {
                return Err(StorageError::NotFound(path.display().to_string()));
            }
            return Ok(path);
        }

        let cached = self.cache_path(uri);
        if cached.exists() {
            debug!("Localizer cache hit for {}", uri);
            return Ok(cached);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let partial = cached.with_extension("part");
        info!("Downloading {} to {}", uri, cached.display());
        if let Err(e) = self.download(uri, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, &cached).await?;
        Ok(cached)
    }
}
