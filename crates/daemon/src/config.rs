//! Daemon configuration
//!
//! An optional YAML file provides the base settings; command-line flags and
//! `ANALYST_*` environment variables override it.

use crate::DaemonError;
use asset_analysis_storage::{
    build_ofs, CachingLocalizer, ObjectStorage, OfsConfig, S3Config, S3ObjectStorage,
};
use asset_pipeline_core::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5001";

/// Command-line interface
#[derive(Parser, Debug, Default)]
#[command(
    name = "analyst",
    version,
    about = "Pipeline module execution daemon",
    long_about = "Accepts execute/generate requests as newline-delimited JSON on a local TCP \
                  connection, runs the named processor against the enclosed asset and answers \
                  on the same connection."
)]
pub struct CliArgs {
    /// YAML configuration file
    #[arg(short, long, env = "ANALYST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "ANALYST_LISTEN")]
    pub listen: Option<String>,

    /// Root directory of a local OFS (overrides the configured backend)
    #[arg(long, env = "ANALYST_OFS_ROOT")]
    pub ofs_root: Option<PathBuf>,

    /// Directory for downloaded source files
    #[arg(long, env = "ANALYST_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Only serve requests for this container image
    #[arg(long, env = "ANALYST_IMAGE")]
    pub image: Option<String>,

    /// Accept another connection after the current one closes
    #[arg(long)]
    pub keep_listening: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Settings read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub listen: String,
    pub image: Option<String>,
    pub ofs: OfsConfig,
    pub cache_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub s3: Option<S3Config>,
    pub keep_listening: bool,
    pub verbose: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            image: None,
            ofs: OfsConfig::default(),
            cache_dir: PathBuf::from("/tmp/asset-analysis/cache"),
            scratch_dir: std::env::temp_dir().join("asset-analysis"),
            s3: None,
            keep_listening: false,
            verbose: false,
        }
    }
}

impl DaemonConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DaemonError> {
        serde_yaml::from_str(yaml).map_err(|e| DaemonError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, DaemonError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&contents)
    }

    /// Load the YAML file named by `args` (if any) and apply the overrides
    pub fn load(args: &CliArgs) -> Result<Self, DaemonError> {
        let mut config = match &args.config {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };

        if let Some(listen) = &args.listen {
            config.listen = listen.clone();
        }
        if let Some(root) = &args.ofs_root {
            config.ofs = OfsConfig::Local { root: root.clone() };
        }
        if let Some(cache_dir) = &args.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(image) = &args.image {
            config.image = Some(image.clone());
        }
        config.keep_listening |= args.keep_listening;
        config.verbose |= args.verbose;
        Ok(config)
    }

    /// Build the process-wide execution context
    pub async fn build_context(&self) -> Result<Context, DaemonError> {
        let storage: Option<Arc<dyn ObjectStorage>> = match &self.s3 {
            Some(s3) => Some(Arc::new(S3ObjectStorage::new(s3.clone()).await?)),
            None => None,
        };

        let mut localizer = CachingLocalizer::new(&self.cache_dir);
        if let Some(storage) = &storage {
            localizer = localizer.with_storage(Arc::clone(storage));
        }

        let mut ctx = Context::new(build_ofs(&self.ofs, storage.clone()), Arc::new(localizer))
            .with_scratch_dir(&self.scratch_dir)
            .with_verbose(self.verbose);
        if let Some(storage) = storage {
            ctx = ctx.with_object_storage(storage);
        }

        info!("OFS backend: {}", ctx.ofs.backend());
        Ok(ctx)
    }
}
