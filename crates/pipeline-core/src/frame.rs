//! Frame: the transit wrapper around one asset

use crate::context::Context;
use crate::error::ProcessorError;
use asset_analysis_common::{Asset, AssetAttrs};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Borrowed view of exactly one [`Asset`] as it moves through a processor chain
///
/// A frame never owns its asset and never outlives the request that created it.
/// It may carry the local path of the asset's source content once resolved.
#[derive(Debug)]
pub struct Frame<'a> {
    pub(crate) asset: &'a mut Asset,
    local_source: Option<PathBuf>,
}

impl<'a> Frame<'a> {
    pub fn new(asset: &'a mut Asset) -> Self {
        Self {
            asset,
            local_source: None,
        }
    }

    /// Attach an already resolved local source file
    pub fn with_local_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_source = Some(path.into());
        self
    }

    pub fn asset(&self) -> &Asset {
        self.asset
    }

    /// Attribute-level write access; the asset itself cannot be swapped out
    ///
    /// ```compile_fail
    /// use asset_analysis_common::Asset;
    /// use asset_pipeline_core::Frame;
    ///
    /// let mut asset = Asset::new("a1", Default::default());
    /// let mut frame = Frame::new(&mut asset);
    /// *frame.asset_mut() = Asset::new("hijacked", Default::default());
    /// ```
    pub fn asset_mut(&mut self) -> AssetAttrs<'_> {
        self.asset.attrs_mut()
    }

    pub fn local_source(&self) -> Option<&Path> {
        self.local_source.as_deref()
    }

    /// Resolve `source.path` to a local file, once per frame
    pub async fn localize_source(&mut self, ctx: &Context) -> Result<PathBuf, ProcessorError> {
        if let Some(path) = &self.local_source {
            return Ok(path.clone());
        }

        let uri = self
            .asset
            .get_attr("source.path")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                ProcessorError::Validation(format!(
                    "asset {} has no source.path",
                    self.asset.id()
                ))
            })?
            .to_string();

        let path = ctx.localizer.localize(&uri).await?;
        debug!("Localized {} to {}", uri, path.display());
        self.local_source = Some(path.clone());
        Ok(path)
    }
}
