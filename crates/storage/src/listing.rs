//! Paged object listings
//!
//! Listers hand out one page per call so generators never hold a whole bucket
//! listing in memory.

use crate::object_storage::{split_object_uri, ObjectStorage};
use crate::{StorageError, StorageResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One page of source URIs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub uris: Vec<String>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Paged source listing
#[async_trait::async_trait]
pub trait ObjectLister: Send + Sync {
    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage>;
}

#[async_trait::async_trait]
impl<L: ObjectLister + ?Sized> ObjectLister for Box<L> {
    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage> {
        (**self).list_page(token).await
    }
}

/// Lists `s3://bucket/prefix` through `list_objects_v2` continuation tokens
pub struct S3Lister {
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    prefix: String,
    page_size: i32,
}

impl S3Lister {
    pub fn new(storage: Arc<dyn ObjectStorage>, bucket: &str, prefix: &str, page_size: i32) -> Self {
        Self {
            storage,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            page_size,
        }
    }
}

#[async_trait::async_trait]
impl ObjectLister for S3Lister {
    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage> {
        let page = self
            .storage
            .list_page(&self.bucket, &self.prefix, token, self.page_size)
            .await?;
        Ok(ListingPage {
            uris: page
                .keys
                .into_iter()
                .map(|key| format!("s3://{}/{}", self.bucket, key))
                .collect(),
            next_token: page.next_token,
        })
    }
}

/// Lists regular files under a local directory, recursively, in sorted order
///
/// The token is the offset of the next entry. Pages are read from a depth-first
/// walk that holds only the sorted entries of the directories on the current
/// path; sequential pages resume the same walk, any other token restarts it.
pub struct DirectoryLister {
    root: PathBuf,
    page_size: usize,
    cursor: Mutex<Option<Walk>>,
}

impl DirectoryLister {
    pub fn new(root: impl AsRef<Path>, page_size: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: page_size.max(1),
            cursor: Mutex::new(None),
        }
    }

    fn lock_cursor(&self) -> std::sync::MutexGuard<'_, Option<Walk>> {
        // a poisoned cursor only means a walk panicked; the next page restarts it
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl ObjectLister for DirectoryLister {
    async fn list_page(&self, token: Option<String>) -> StorageResult<ListingPage> {
        let offset = match token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StorageError::Resolution(format!("invalid listing token '{token}'")))?,
            None => 0,
        };

        let cursor = self.lock_cursor().take().filter(|walk| walk.position == offset);
        let root = self.root.clone();
        let page_size = self.page_size;
        let (walk, files, more) = tokio::task::spawn_blocking(move || {
            let mut walk = match cursor {
                Some(walk) => walk,
                None => Walk::skipping(&root, offset)?,
            };
            let (files, more) = walk.page(page_size)?;
            Ok::<_, std::io::Error>((walk, files, more))
        })
        .await
        .map_err(|e| StorageError::IoError(std::io::Error::other(e)))??;

        let next_token = more.then(|| walk.position.to_string());
        if more {
            *self.lock_cursor() = Some(walk);
        }
        Ok(ListingPage {
            uris: files.iter().map(|path| path.display().to_string()).collect(),
            next_token,
        })
    }
}

/// Depth-first walk yielding regular files in path order
struct Walk {
    /// Remaining sorted `(path, is_dir)` entries of each open directory
    stack: Vec<std::vec::IntoIter<(PathBuf, bool)>>,
    peeked: Option<PathBuf>,
    /// Files handed out so far
    position: usize,
}

impl Walk {
    fn skipping(root: &Path, offset: usize) -> std::io::Result<Self> {
        let mut walk = Self {
            stack: vec![read_sorted(root)?],
            peeked: None,
            position: 0,
        };
        while walk.position < offset && walk.next_file()?.is_some() {}
        Ok(walk)
    }

    fn page(&mut self, size: usize) -> std::io::Result<(Vec<PathBuf>, bool)> {
        let mut files = Vec::with_capacity(size);
        while files.len() < size {
            match self.next_file()? {
                Some(path) => files.push(path),
                None => return Ok((files, false)),
            }
        }
        if self.peeked.is_none() {
            self.peeked = self.advance()?;
        }
        Ok((files, self.peeked.is_some()))
    }

    fn next_file(&mut self) -> std::io::Result<Option<PathBuf>> {
        let next = match self.peeked.take() {
            Some(path) => Some(path),
            None => self.advance()?,
        };
        if next.is_some() {
            self.position += 1;
        }
        Ok(next)
    }

    fn advance(&mut self) -> std::io::Result<Option<PathBuf>> {
        while let Some(entries) = self.stack.last_mut() {
            match entries.next() {
                Some((path, true)) => {
                    let listed = read_sorted(&path)?;
                    self.stack.push(listed);
                }
                Some((path, false)) => return Ok(Some(path)),
                None => {
                    self.stack.pop();
                }
            }
        }
        Ok(None)
    }
}

/// Entries of one directory sorted by name; directories descend in place, so the
/// walk matches a component-wise sort of the full paths
fn read_sorted(dir: &Path) -> std::io::Result<std::vec::IntoIter<(PathBuf, bool)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() || file_type.is_file() {
            entries.push((entry.path(), file_type.is_dir()));
        }
    }
    entries.sort();
    Ok(entries.into_iter())
}

/// Build a lister for `s3://bucket/prefix`, `file://dir` or a plain directory path
pub fn lister_for_uri(
    uri: &str,
    storage: Option<Arc<dyn ObjectStorage>>,
    page_size: usize,
) -> StorageResult<Box<dyn ObjectLister>> {
    if !uri.contains("://") || uri.starts_with("file://") {
        let root = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
        if !root.is_dir() {
            return Err(StorageError::NotFound(root.display().to_string()));
        }
        return Ok(Box::new(DirectoryLister::new(root, page_size)));
    }

    match split_object_uri(uri) {
        Some(("s3", bucket, prefix)) => {
            let storage = storage.ok_or_else(|| {
                StorageError::InvalidConfig("s3:// listings need an S3 configuration".to_string())
            })?;
            let page_size = i32::try_from(page_size).unwrap_or(i32::MAX);
            Ok(Box::new(S3Lister::new(storage, bucket, prefix, page_size)))
        }
        _ => Err(StorageError::Resolution(format!(
            "unsupported listing URI '{uri}'"
        ))),
    }
}
