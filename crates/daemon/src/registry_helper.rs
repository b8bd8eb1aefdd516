//! Shared registry helper
//!
//! The versioned table of every processing unit this daemon can run.

use asset_pipeline_core::{document_generator, listing_generator, Registry};

/// Version of the built-in processor table
pub const REGISTRY_VERSION: &str = "1";

/// Build a registry containing every built-in processor and generator
pub fn builtin_registry(image: Option<&str>) -> Registry {
    let mut registry = Registry::new();
    if let Some(image) = image {
        registry = registry.with_image(image);
    }

    for descriptor in asset_analysis_metadata::descriptors()
        .into_iter()
        .chain(asset_analysis_audio::descriptors())
        .chain(asset_analysis_similarity::descriptors())
    {
        registry.register(descriptor);
    }

    registry.register_generator(listing_generator());
    registry.register_generator(document_generator());
    registry
}
