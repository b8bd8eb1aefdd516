//! Similarity hashing processor

use crate::{SimilarityError, SimilarityHasher};
use asset_analysis_common::media_types;
use asset_pipeline_core::{Context, Frame, Processor, ProcessorDescriptor, ProcessorError};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const SIMILARITY_HASHER: &str = "pkg.SimilarityHasher";

impl From<SimilarityError> for ProcessorError {
    fn from(err: SimilarityError) -> Self {
        match err {
            SimilarityError::Image(e) => ProcessorError::Fatal(format!("Cannot decode image: {e}")),
            other => ProcessorError::Recoverable(other.to_string()),
        }
    }
}

/// Writes `analysis.similarity` for image assets
///
/// The hasher lives in the process model cache, so every instance shares one.
#[derive(Default)]
pub struct SimilarityHasherProcessor {
    hasher: Option<Arc<SimilarityHasher>>,
}

#[async_trait]
impl Processor for SimilarityHasherProcessor {
    async fn init(&mut self, ctx: &Context) -> Result<(), ProcessorError> {
        let hasher = ctx
            .models
            .get_or_try_init(SIMILARITY_HASHER, || {
                Ok::<_, ProcessorError>(SimilarityHasher::default())
            })?;
        debug!("Similarity hasher ready ({})", hasher.model_name());
        self.hasher = Some(hasher);
        Ok(())
    }

    async fn process(&self, ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
        let hasher = self
            .hasher
            .clone()
            .ok_or_else(|| ProcessorError::Fatal("similarity hasher not initialized".into()))?;

        let media_type = frame
            .asset()
            .get_attr("source.mediatype")
            .and_then(|value| value.as_str())
            .unwrap_or(media_types::DEFAULT_MEDIA_TYPE);
        if media_types::media_class(media_type) != Some("image") {
            return Err(ProcessorError::Validation(format!(
                "similarity hashing needs an image, got {media_type}"
            )));
        }

        let path = frame.localize_source(ctx).await?;
        let simhash = tokio::task::spawn_blocking(move || hasher.hash_file(&path))
            .await
            .map_err(|e| ProcessorError::Panicked(e.to_string()))??;

        frame.asset_mut().add_analysis(
            "similarity",
            json!({
                "type": "similarity",
                "simhash": simhash,
            }),
        )?;
        Ok(())
    }
}

pub fn similarity_hasher() -> ProcessorDescriptor {
    ProcessorDescriptor::new(SIMILARITY_HASHER, Vec::new(), |_| {
        Ok(Box::new(SimilarityHasherProcessor::default()))
    })
}
