//! Object storage implementation using S3/MinIO
//!
//! Buckets are addressed per call: the OFS stores proxies into one bucket while
//! sources and listings may come from any other.

use crate::{StorageError, StorageResult};
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// S3/MinIO connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3Config {
    /// AWS region (e.g., "us-west-2") or "us-east-1" for `MinIO`
    #[serde(default = "default_region")]
    pub region: String,

    /// S3 endpoint (custom for `MinIO`, empty for AWS S3)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// AWS access key ID; empty falls back to the default credential chain
    #[serde(default)]
    pub access_key_id: String,

    /// AWS secret access key
    #[serde(default)]
    pub secret_access_key: String,
}

fn default_region() -> String {
    "us-west-2".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| default_region()),
            endpoint: None,
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        }
    }
}

/// One page of an object listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Object storage trait
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a local file to `bucket/key`
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()>;

    /// Download `bucket/key` into a local file
    async fn get_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()>;

    /// List one page of keys under `prefix`, continuing from `token`
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
        page_size: i32,
    ) -> StorageResult<ObjectPage>;
}

/// Split `scheme://bucket/key` into its parts
///
/// Returns `None` for URIs without a scheme or bucket. The key may be empty.
pub fn split_object_uri(uri: &str) -> Option<(&str, &str, &str)> {
    let (scheme, rest) = uri.split_once("://")?;
    if scheme.is_empty() {
        return None;
    }
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return None;
    }
    Some((scheme, bucket, key))
}

/// S3/MinIO object storage implementation
pub struct S3ObjectStorage {
    client: Client,
}

impl S3ObjectStorage {
    /// Create a new S3 object storage client
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.access_key_id.is_empty() {
            return Ok(Self::from_env(config).await);
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "asset-analysis-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .behavior_version_latest();

        // Set custom endpoint for MinIO
        if let Some(endpoint) = config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for MinIO
        }

        Ok(Self::from_client(Client::from_conf(s3_config_builder.build())))
    }

    /// Build a client from the default AWS credential chain
    async fn from_env(config: S3Config) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self::from_client(Client::from_conf(builder.build()))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_s3_error(key: &str, message: String) -> StorageError {
    if message.contains("NoSuchKey") || message.contains("NotFound") {
        StorageError::NotFound(key.to_string())
    } else if message.contains("dispatch failure") || message.contains("timeout") {
        StorageError::Unavailable(message)
    } else {
        StorageError::S3Error(message)
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()> {
        let data = tokio::fs::read(path).await?;
        debug!("Uploading {} bytes to {}/{}", data.len(), bucket, key);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_s3_error(key, e.to_string()))?;

        Ok(())
    }

    async fn get_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_s3_error(key, e.to_string()))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3Error(e.to_string()))?
            .into_bytes();

        debug!("Downloaded {} bytes from {}/{}", bytes.len(), bucket, key);
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<String>,
        page_size: i32,
    ) -> StorageResult<ObjectPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(page_size)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| map_s3_error(prefix, e.to_string()))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(String::from))
            .filter(|key| !key.ends_with('/'))
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ObjectPage { keys, next_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_config_default() {
        let config = S3Config::default();
        assert!(config.endpoint.is_none());
        assert!(!config.region.is_empty());
    }

    #[test]
    fn test_s3_config_from_yaml() {
        let yaml = "region: us-east-1\nendpoint: http://localhost:9000\n";
        let config: S3Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.access_key_id.is_empty());
    }

    #[test]
    fn test_s3_config_rejects_unknown_keys() {
        let err = serde_yaml::from_str::<S3Config>("endpoit: http://localhost:9000\n").unwrap_err();
        assert!(err.to_string().contains("endpoit"));
    }

    #[test]
    fn test_split_object_uri() {
        assert_eq!(
            split_object_uri("s3://media/videos/a.mp4"),
            Some(("s3", "media", "videos/a.mp4"))
        );
        assert_eq!(split_object_uri("gs://media"), Some(("gs", "media", "")));
        assert_eq!(split_object_uri("/local/file.png"), None);
        assert_eq!(split_object_uri("s3:///key"), None);
    }

    #[test]
    fn test_s3_error_mapping() {
        assert!(matches!(
            map_s3_error("k", "NoSuchKey: gone".to_string()),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            map_s3_error("k", "dispatch failure".to_string()),
            StorageError::Unavailable(_)
        ));
        assert!(matches!(
            map_s3_error("k", "AccessDenied".to_string()),
            StorageError::S3Error(_)
        ));
    }
}
