//! Object File System (OFS)
//!
//! Derived files (proxies, extracted audio, ...) are addressed by a 4-tuple
//! `(entityType, entityId, category, name)`. Resolving a tuple is a pure
//! function of the tuple and the backend configuration: no existence check is
//! made and nothing is written, so a location can be resolved before any
//! content exists there.

use crate::object_storage::{split_object_uri, ObjectStorage};
use crate::{StorageError, StorageResult};
use asset_analysis_common::media_types;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Entity types that own derived files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Assets,
    DataSources,
    Jobs,
    Models,
    Projects,
}

impl EntityType {
    /// Path segment for the entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Assets => "assets",
            EntityType::DataSources => "datasources",
            EntityType::Jobs => "jobs",
            EntityType::Models => "models",
            EntityType::Projects => "projects",
        }
    }
}

impl FromStr for EntityType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "assets" => Ok(EntityType::Assets),
            "datasources" => Ok(EntityType::DataSources),
            "jobs" => Ok(EntityType::Jobs),
            "models" => Ok(EntityType::Models),
            "projects" => Ok(EntityType::Projects),
            _ => Err(StorageError::Resolution(format!("unknown entity type '{s}'"))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated OFS key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub category: String,
    pub name: String,
}

impl FileKey {
    pub fn new(entity_type: &str, entity_id: &str, category: &str, name: &str) -> StorageResult<Self> {
        let entity_type = entity_type.parse()?;
        for (label, segment) in [("entityId", entity_id), ("category", category), ("name", name)] {
            validate_segment(label, segment)?;
        }
        Ok(Self {
            entity_type,
            entity_id: entity_id.to_string(),
            category: category.to_string(),
            name: name.to_string(),
        })
    }

    /// `<entity>/<id>/<category>/<name>`
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.entity_type, self.entity_id, self.category, self.name
        )
    }

    pub fn media_type(&self) -> &'static str {
        media_types::media_type_for(&self.name)
    }
}

fn validate_segment(label: &str, segment: &str) -> StorageResult<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(StorageError::Resolution(format!(
            "invalid {label} segment '{segment}'"
        )));
    }
    Ok(())
}

/// Resolved OFS location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub uri: String,
    pub media_type: String,
}

/// Object File System backend
#[async_trait::async_trait]
pub trait ObjectFileSystem: Send + Sync {
    /// Backend name ("local" or "cloud")
    fn backend(&self) -> &'static str;

    /// Resolve a validated key
    async fn locate_key(&self, key: &FileKey) -> StorageResult<Location>;

    /// Put a produced local file at a resolved location
    async fn store(&self, location: &Location, source: &Path) -> StorageResult<()>;

    /// Resolve `(entityType, entityId, category, name)` to a location
    async fn locate(
        &self,
        entity_type: &str,
        entity_id: &str,
        category: &str,
        name: &str,
    ) -> StorageResult<Location> {
        let key = FileKey::new(entity_type, entity_id, category, name)?;
        self.locate_key(&key).await
    }

    /// Local filesystem path of a `file://` location
    fn local_path(&self, location: &Location) -> Option<PathBuf> {
        location.uri.strip_prefix("file://").map(PathBuf::from)
    }
}

// ============================================================================
// Local backend
// ============================================================================

/// OFS rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalObjectFileSystem {
    root: PathBuf,
}

impl LocalObjectFileSystem {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl ObjectFileSystem for LocalObjectFileSystem {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn locate_key(&self, key: &FileKey) -> StorageResult<Location> {
        let path = self.root.join(key.relative_path());
        Ok(Location {
            uri: format!("file://{}", path.display()),
            media_type: key.media_type().to_string(),
        })
    }

    async fn store(&self, location: &Location, source: &Path) -> StorageResult<()> {
        let target = self.local_path(location).ok_or_else(|| {
            StorageError::Resolution(format!("not a local location: {}", location.uri))
        })?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &target).await?;
        debug!("Stored {} at {}", source.display(), target.display());
        Ok(())
    }
}

// ============================================================================
// Cloud backend
// ============================================================================

/// OFS backed by a cloud bucket, optionally resolved through a locate service
pub struct CloudObjectFileSystem {
    scheme: String,
    bucket: String,
    prefix: String,
    locate_service: Option<String>,
    http: reqwest::Client,
    storage: Option<Arc<dyn ObjectStorage>>,
}

impl CloudObjectFileSystem {
    pub fn new(scheme: &str, bucket: &str, prefix: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            locate_service: None,
            http: reqwest::Client::new(),
            storage: None,
        }
    }

    /// Resolve locations through `GET {base_url}/files/_locate/...`
    pub fn with_locate_service(mut self, base_url: &str) -> Self {
        self.locate_service = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    /// Object storage client used by `store`
    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    fn canonical_location(&self, key: &FileKey) -> Location {
        Location {
            uri: format!(
                "{}://{}/{}{}",
                self.scheme,
                self.bucket,
                self.prefix,
                key.relative_path()
            ),
            media_type: key.media_type().to_string(),
        }
    }

    async fn remote_locate(&self, base_url: &str, key: &FileKey) -> StorageResult<Location> {
        let url = format!("{}/files/_locate/{}", base_url, key.relative_path());
        debug!("Locating {} via {}", key.relative_path(), url);

        let response = self.http.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                StorageError::Unavailable(format!("{url}: {e}"))
            } else {
                StorageError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StorageError::Unavailable(format!("{url}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(StorageError::Resolution(format!("{url}: HTTP {status}")));
        }

        response
            .json::<Location>()
            .await
            .map_err(|e| StorageError::Http(format!("invalid locate response: {e}")))
    }
}

#[async_trait::async_trait]
impl ObjectFileSystem for CloudObjectFileSystem {
    fn backend(&self) -> &'static str {
        "cloud"
    }

    async fn locate_key(&self, key: &FileKey) -> StorageResult<Location> {
        match &self.locate_service {
            Some(base_url) => self.remote_locate(base_url, key).await,
            None => Ok(self.canonical_location(key)),
        }
    }

    async fn store(&self, location: &Location, source: &Path) -> StorageResult<()> {
        let (scheme, bucket, key) = split_object_uri(&location.uri).ok_or_else(|| {
            StorageError::Resolution(format!("not an object URI: {}", location.uri))
        })?;
        let storage = match (&self.storage, scheme) {
            (Some(storage), "s3") => storage,
            _ => {
                return Err(StorageError::InvalidConfig(format!(
                    "no object storage client for {scheme}:// locations"
                )))
            }
        };
        storage.put_file(bucket, key, source).await?;
        debug!("Uploaded {} to {}", source.display(), location.uri);
        Ok(())
    }
}
