//! Asset document model
//!
//! An [`Asset`] is an immutable identity plus a nested JSON document split into
//! namespaces (`source`, `media`, `analysis`, `proxies`, ...). Attributes are
//! addressed with dotted paths; writes only touch the addressed leaf, so writing
//! `analysis.labels` leaves every other key under `analysis` in place.

use crate::media_types;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Asset document errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("Missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("Invalid attribute path: '{0}'")]
    InvalidPath(String),

    #[error("Analysis requires a name and a non-null value")]
    InvalidAnalysis,
}

/// A media asset: identity plus namespaced attribute document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    id: String,

    #[serde(default)]
    document: Map<String, Value>,
}

impl Asset {
    /// Create an asset from an id and a raw document
    pub fn new(id: impl Into<String>, document: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            document,
        }
    }

    /// Create an asset for a source URI
    ///
    /// The id is a UUIDv5 of the URI, so the same source always yields the same id.
    pub fn from_source(uri: &str) -> Self {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, uri.as_bytes()).to_string();
        let filename = uri.rsplit('/').next().unwrap_or(uri).to_string();

        let mut source = Map::new();
        source.insert("path".to_string(), Value::String(uri.to_string()));
        source.insert("filename".to_string(), Value::String(filename));
        if let Some(ext) = media_types::extension_of(uri) {
            source.insert("extension".to_string(), Value::String(ext));
        }
        source.insert(
            "mediatype".to_string(),
            Value::String(media_types::media_type_for(uri).to_string()),
        );

        let mut document = Map::new();
        document.insert("source".to_string(), Value::Object(source));
        Self { id, document }
    }

    /// The asset id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The full document
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Consume the asset, returning its document
    pub fn into_document(self) -> Map<String, Value> {
        self.document
    }

    /// Get an attribute by dotted path
    pub fn get_attr(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.document.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Get an attribute and deserialize it, `None` when absent or of another shape
    pub fn get_attr_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get_attr(path)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Get an attribute that must be present
    pub fn require_attr(&self, path: &str) -> Result<&Value, AssetError> {
        match self.get_attr(path) {
            Some(Value::Null) | None => Err(AssetError::MissingAttribute(path.to_string())),
            Some(value) => Ok(value),
        }
    }

    /// True if the attribute exists (even when null)
    pub fn attr_exists(&self, path: &str) -> bool {
        self.get_attr(path).is_some()
    }

    /// Set an attribute, creating intermediate namespaces as needed
    ///
    /// Only the leaf is replaced; sibling keys of every parent are kept.
    /// A non-object value sitting on an intermediate segment is replaced by a mapping.
    pub fn set_attr(&mut self, path: &str, value: impl Into<Value>) -> Result<(), AssetError> {
        let (parents, leaf) = split_path(path)?;
        let parent = self.parent_mut(&parents);
        parent.insert(leaf.to_string(), value.into());
        Ok(())
    }

    /// Deep-merge an object into the attribute at `path`
    ///
    /// Objects are merged key by key recursively; any other value replaces the target.
    pub fn merge_attr(&mut self, path: &str, value: impl Into<Value>) -> Result<(), AssetError> {
        let (parents, leaf) = split_path(path)?;
        let parent = self.parent_mut(&parents);
        match parent.get_mut(leaf) {
            Some(existing) => merge_values(existing, value.into()),
            None => {
                parent.insert(leaf.to_string(), value.into());
            }
        }
        Ok(())
    }

    /// Delete an attribute, returning the removed value
    pub fn del_attr(&mut self, path: &str) -> Option<Value> {
        let (parents, leaf) = split_path(path).ok()?;
        let mut current = &mut self.document;
        for part in parents {
            current = current.get_mut(part)?.as_object_mut()?;
        }
        current.remove(leaf)
    }

    /// Record an analysis result under `analysis.<name>`
    pub fn add_analysis(&mut self, name: &str, value: impl Into<Value>) -> Result<(), AssetError> {
        let value = value.into();
        if name.is_empty() || value.is_null() {
            return Err(AssetError::InvalidAnalysis);
        }
        self.set_attr(&format!("analysis.{name}"), value)
    }

    fn parent_mut(&mut self, parents: &[&str]) -> &mut Map<String, Value> {
        let mut current = &mut self.document;
        for part in parents {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => unreachable!("entry was just made an object"),
            };
        }
        current
    }
}

/// Attribute-level write access to an asset
///
/// Reads go through `Deref`; writes are limited to the attribute operations,
/// so the holder can never replace the asset or its id.
pub struct AssetAttrs<'a> {
    asset: &'a mut Asset,
}

impl Asset {
    pub fn attrs_mut(&mut self) -> AssetAttrs<'_> {
        AssetAttrs { asset: self }
    }
}

impl AssetAttrs<'_> {
    pub fn set_attr(&mut self, path: &str, value: impl Into<Value>) -> Result<(), AssetError> {
        self.asset.set_attr(path, value)
    }

    pub fn merge_attr(&mut self, path: &str, value: impl Into<Value>) -> Result<(), AssetError> {
        self.asset.merge_attr(path, value)
    }

    pub fn del_attr(&mut self, path: &str) -> Option<Value> {
        self.asset.del_attr(path)
    }

    pub fn add_analysis(&mut self, name: &str, value: impl Into<Value>) -> Result<(), AssetError> {
        self.asset.add_analysis(name, value)
    }
}

impl std::ops::Deref for AssetAttrs<'_> {
    type Target = Asset;

    fn deref(&self) -> &Asset {
        self.asset
    }
}

fn split_path(path: &str) -> Result<(Vec<&str>, &str), AssetError> {
    let mut parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(AssetError::InvalidPath(path.to_string()));
    }
    // split always yields at least one element
    let leaf = parts.pop().unwrap_or_default();
    Ok((parts, leaf))
}

fn merge_values(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}
