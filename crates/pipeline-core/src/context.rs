//! Execution context passed to processors
//!
//! Built once at daemon startup and read-only afterwards. Tests build their own
//! context instead of touching process-wide state.

use crate::cache::ModelCache;
use asset_analysis_storage::{
    CachingLocalizer, FileLocalizer, LocalObjectFileSystem, ObjectFileSystem, ObjectStorage,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared services available to every processor invocation
#[derive(Clone)]
pub struct Context {
    /// OFS backend for derived files
    pub ofs: Arc<dyn ObjectFileSystem>,

    /// Resolves `source.path` URIs to local files
    pub localizer: Arc<dyn FileLocalizer>,

    /// S3 client, when configured
    pub object_storage: Option<Arc<dyn ObjectStorage>>,

    /// Process-scoped model cache
    pub models: ModelCache,

    /// Directory for intermediate files produced while processing
    pub scratch_dir: PathBuf,

    /// Whether verbose logging is enabled
    pub verbose: bool,
}

impl Context {
    /// Create a context from its storage services
    pub fn new(ofs: Arc<dyn ObjectFileSystem>, localizer: Arc<dyn FileLocalizer>) -> Self {
        Self {
            ofs,
            localizer,
            object_storage: None,
            models: ModelCache::new(),
            scratch_dir: std::env::temp_dir(),
            verbose: false,
        }
    }

    /// Create a context where everything lives under one local directory
    ///
    /// OFS files go to `<root>/ofs`, downloads to `<root>/cache` and
    /// intermediates to `<root>/scratch`.
    pub fn local(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(
            Arc::new(LocalObjectFileSystem::new(root.join("ofs"))),
            Arc::new(CachingLocalizer::new(root.join("cache"))),
        )
        .with_scratch_dir(root.join("scratch"))
    }

    pub fn with_object_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.object_storage = Some(storage);
        self
    }

    pub fn with_localizer(mut self, localizer: Arc<dyn FileLocalizer>) -> Self {
        self.localizer = localizer;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Create a scratch file that is removed when dropped
    pub fn scratch_file(&self, suffix: &str) -> std::io::Result<tempfile::TempPath> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        Ok(tempfile::Builder::new()
            .prefix("asset-")
            .suffix(suffix)
            .tempfile_in(&self.scratch_dir)?
            .into_temp_path())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("ofs", &self.ofs.backend())
            .field("object_storage", &self.object_storage.is_some())
            .field("models", &self.models)
            .field("scratch_dir", &self.scratch_dir)
            .field("verbose", &self.verbose)
            .finish()
    }
}
