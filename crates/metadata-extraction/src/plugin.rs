//! Importer, proxy and segmenter processors

use crate::{clips, extract_metadata, image_info, set_resolution_attrs, MetadataConfig};
use asset_analysis_common::ProcessingError;
use asset_pipeline_core::{
    ArgType, Argument, Context, Frame, Processor, ProcessorDescriptor, ProcessorError,
};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info};

pub const IMAGE_IMPORTER: &str = "pkg.ImageImporter";
pub const VIDEO_IMPORTER: &str = "pkg.VideoImporter";
pub const IMAGE_PROXY: &str = "pkg.ImageProxy";
pub const CLIP_SEGMENTER: &str = "pkg.ClipSegmenter";

/// Run blocking media work off the async executor
async fn blocking<T, F>(work: F) -> Result<T, ProcessorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProcessorError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProcessorError::Panicked(e.to_string()))?
}

// ============================================================================
// ImageImporter
// ============================================================================

/// Populates `media.*` for still images
pub struct ImageImporter {
    extended: bool,
}

#[async_trait]
impl Processor for ImageImporter {
    async fn process(&self, ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
        let path = frame.localize_source(ctx).await?;
        let extended = self.extended;

        let (width, height, properties) = blocking(move || {
            if extended {
                let props = image_info::read_properties(&path)?;
                Ok((props.width, props.height, Some(props)))
            } else {
                let (width, height) = image_info::dimensions(&path)?;
                Ok((width, height, None))
            }
        })
        .await?;

        let mut asset = frame.asset_mut();
        asset.set_attr("media.type", "image")?;
        set_resolution_attrs(&mut asset, width, height)?;

        if let Some(props) = properties {
            asset.set_attr("media.format", props.format)?;
            asset.set_attr("media.colorType", props.color_type)?;
            asset.set_attr("media.bitsPerPixel", props.bits_per_pixel)?;
            asset.set_attr("media.hasAlpha", props.has_alpha)?;
            asset.set_attr("media.fileSize", props.file_size)?;
        }

        if ctx.verbose {
            info!("Imported image {} ({}x{})", asset.id(), width, height);
        }
        Ok(())
    }
}

pub fn image_importer() -> ProcessorDescriptor {
    ProcessorDescriptor::new(
        IMAGE_IMPORTER,
        vec![Argument::optional(
            "extract_extended_metadata",
            ArgType::Bool,
            false,
        )],
        |args| {
            Ok(Box::new(ImageImporter {
                extended: args.bool("extract_extended_metadata")?,
            }))
        },
    )
}

// ============================================================================
// VideoImporter
// ============================================================================

/// Populates `media.*` for video through ffprobe
pub struct VideoImporter;

#[async_trait]
impl Processor for VideoImporter {
    async fn process(&self, ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
        let path = frame.localize_source(ctx).await?;
        let start = Instant::now();

        let metadata = blocking(move || {
            Ok(extract_metadata(&path, &MetadataConfig::default())?)
        })
        .await?;
        debug!("ffprobe finished in {:?}", start.elapsed());

        let video = metadata
            .video_stream
            .ok_or(ProcessorError::Media(ProcessingError::NoVideoStream))?;

        let mut asset = frame.asset_mut();
        asset.set_attr("media.type", "video")?;
        set_resolution_attrs(&mut asset, video.width, video.height)?;
        if let Some(length) = metadata.format.duration {
            asset.set_attr("media.length", length)?;
        }
        if let Some(fps) = video.fps {
            asset.set_attr("media.frameRate", (fps * 100.0).round() / 100.0)?;
        }
        if let Some(codec) = video.codec_name {
            asset.set_attr("media.codec", codec)?;
        }
        Ok(())
    }
}

pub fn video_importer() -> ProcessorDescriptor {
    ProcessorDescriptor::new(VIDEO_IMPORTER, Vec::new(), |_| Ok(Box::new(VideoImporter)))
}

// ============================================================================
// ImageProxy
// ============================================================================

/// Writes a downscaled JPEG of the source to the OFS
pub struct ImageProxy {
    size: u32,
    quality: u8,
}

#[async_trait]
impl Processor for ImageProxy {
    async fn process(&self, ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
        let source = frame.localize_source(ctx).await?;
        let scratch = ctx.scratch_file(".jpg")?;
        let output = scratch.to_path_buf();
        let (size, quality) = (self.size, self.quality);

        let (width, height) = blocking(move || {
            Ok(image_info::write_jpeg_proxy(&source, &output, size, quality)?)
        })
        .await?;

        let asset_id = frame.asset().id().to_string();
        let location = ctx
            .ofs
            .locate("assets", &asset_id, "proxy", &format!("image_{width}x{height}.jpg"))
            .await?;
        ctx.ofs.store(&location, &scratch).await?;
        debug!("Stored proxy for {} at {}", asset_id, location.uri);

        frame.asset_mut().set_attr(
            "proxies.image",
            json!({
                "uri": location.uri,
                "mediaType": location.media_type,
                "width": width,
                "height": height,
            }),
        )?;
        Ok(())
    }
}

pub fn image_proxy() -> ProcessorDescriptor {
    ProcessorDescriptor::new(
        IMAGE_PROXY,
        vec![
            Argument::optional("size", ArgType::Int, 512),
            Argument::optional("quality", ArgType::Int, 85),
        ],
        |args| {
            let size = u32::try_from(args.int("size")?)
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| ProcessorError::Configuration("size must be positive".into()))?;
            let quality = u8::try_from(args.int("quality")?)
                .ok()
                .filter(|quality| (1..=100).contains(quality))
                .ok_or_else(|| {
                    ProcessorError::Configuration("quality must be between 1 and 100".into())
                })?;
            Ok(Box::new(ImageProxy { size, quality }))
        },
    )
}

// ============================================================================
// ClipSegmenter
// ============================================================================

/// Splits time-based media into a fixed-length clip timeline
pub struct ClipSegmenter {
    max_length_sec: f64,
    clip_length: f64,
}

#[async_trait]
impl Processor for ClipSegmenter {
    async fn process(&self, _ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
        let mut asset = frame.asset_mut();
        let length = asset
            .require_attr("media.length")?
            .as_f64()
            .ok_or_else(|| ProcessorError::Validation("media.length is not a number".into()))?;

        if length > self.max_length_sec {
            return Err(ProcessorError::Validation(format!(
                "media.length {length} exceeds max_length_sec {}",
                self.max_length_sec
            )));
        }

        let timeline = clips::timeline(length, self.clip_length).ok_or_else(|| {
            ProcessorError::Validation(format!(
                "media.length {length} with clip_length {} needs more than {} clips",
                self.clip_length,
                clips::MAX_CLIPS
            ))
        })?;
        asset.add_analysis(
            "clips",
            json!({
                "type": "clips",
                "clipLength": self.clip_length,
                "count": timeline.len(),
                "timeline": timeline,
            }),
        )?;
        Ok(())
    }
}

pub fn clip_segmenter() -> ProcessorDescriptor {
    ProcessorDescriptor::new(
        CLIP_SEGMENTER,
        vec![
            Argument::optional("max_length_sec", ArgType::Float, 7200.0),
            Argument::optional("clip_length", ArgType::Float, 5.0),
        ],
        |args| {
            let clip_length = args.float("clip_length")?;
            if clip_length <= 0.0 {
                return Err(ProcessorError::Configuration(
                    "clip_length must be positive".into(),
                ));
            }
            Ok(Box::new(ClipSegmenter {
                max_length_sec: args.float("max_length_sec")?,
                clip_length,
            }))
        },
    )
}
