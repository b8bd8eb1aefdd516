//! Media metadata extraction and importer processors
//!
//! This crate provides:
//! - ffprobe-based container/stream metadata extraction ([`extract_metadata`])
//! - image inspection and JPEG proxy generation ([`image_info`])
//! - time-based clip segmentation ([`clips`])
//! - the importer, proxy and segmenter processors ([`plugin`])
//!
//! # Example
//! ```no_run
//! use asset_analysis_metadata::{extract_metadata, MetadataConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MetadataConfig { include_streams: true };
//! let metadata = extract_metadata(Path::new("video.mp4"), &config)?;
//!
//! println!("Duration: {}s", metadata.format.duration.unwrap_or(0.0));
//! println!("Resolution: {}x{}",
//!     metadata.video_stream.as_ref().map(|v| v.width).unwrap_or(0),
//!     metadata.video_stream.as_ref().map(|v| v.height).unwrap_or(0)
//! );
//! # Ok(())
//! # }
//! ```

pub mod clips;
pub mod image_info;
pub mod plugin;

use asset_analysis_common::{AssetAttrs, AssetError};
use asset_pipeline_core::{ProcessorDescriptor, ProcessorError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Errors specific to metadata extraction
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("ffprobe execution failed: {0}")]
    FfprobeError(String),

    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<MetadataError> for ProcessorError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::IoError(e) => ProcessorError::Io(e),
            MetadataError::Asset(e) => ProcessorError::Asset(e),
            other => ProcessorError::Fatal(other.to_string()),
        }
    }
}

/// All processors provided by this crate
pub fn descriptors() -> Vec<ProcessorDescriptor> {
    vec![
        plugin::image_importer(),
        plugin::video_importer(),
        plugin::image_proxy(),
        plugin::clip_segmenter(),
    ]
}

/// Configuration for metadata extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Include detailed stream information (video/audio codec details)
    pub include_streams: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            include_streams: true,
        }
    }
}

/// Format-level metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatMetadata {
    /// File format name (e.g., "mov,mp4,m4a,3gp,3g2,mj2")
    pub format_name: Option<String>,
    /// Long format name (e.g., "QuickTime / MOV")
    pub format_long_name: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// File size in bytes
    pub size: Option<u64>,
    /// Overall bitrate in bits/second
    pub bit_rate: Option<u64>,
    /// Number of streams
    pub nb_streams: usize,
    /// Format-level tags (e.g., creation_time, title, artist)
    pub tags: HashMap<String, String>,
}

/// Video stream metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStreamMetadata {
    /// Video codec name (e.g., "h264", "vp9")
    pub codec_name: Option<String>,
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
    /// Frame rate (frames per second)
    pub fps: Option<f64>,
    /// Pixel format (e.g., "yuv420p")
    pub pix_fmt: Option<String>,
}

/// Audio stream metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamMetadata {
    /// Audio codec name (e.g., "aac", "mp3")
    pub codec_name: Option<String>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of audio channels
    pub channels: u32,
}

/// Complete metadata result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub format: FormatMetadata,
    pub video_stream: Option<VideoStreamMetadata>,
    pub audio_stream: Option<AudioStreamMetadata>,
}

/// Extract metadata from a media file using ffprobe
pub fn extract_metadata(
    file_path: &Path,
    config: &MetadataConfig,
) -> Result<MediaMetadata, MetadataError> {
    if !file_path.exists() {
        return Err(MetadataError::FileNotFound(file_path.display().to_string()));
    }

    debug!("Extracting metadata from: {}", file_path.display());

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(file_path)
        .output()
        .map_err(|e| MetadataError::FfprobeError(format!("Failed to execute ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MetadataError::FfprobeError(format!(
            "ffprobe failed: {}",
            stderr
        )));
    }

    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout), config)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output
pub fn parse_ffprobe_json(
    json_output: &str,
    config: &MetadataConfig,
) -> Result<MediaMetadata, MetadataError> {
    let ffprobe_result: FfprobeOutput = serde_json::from_str(json_output)
        .map_err(|e| MetadataError::ParseError(format!("Failed to parse JSON: {}", e)))?;

    let (video_stream, audio_stream) = if config.include_streams {
        (
            parse_video_stream(&ffprobe_result.streams),
            parse_audio_stream(&ffprobe_result.streams),
        )
    } else {
        (None, None)
    };

    Ok(MediaMetadata {
        format: parse_format_metadata(&ffprobe_result.format),
        video_stream,
        audio_stream,
    })
}

/// Write `media.width`, `media.height`, `media.aspect` and `media.orientation`
///
/// Aspect is width/height rounded to two decimals; up to 0.95 is portrait,
/// up to 1.05 is square, anything wider is landscape.
pub fn set_resolution_attrs(asset: &mut AssetAttrs<'_>, width: u32, height: u32) -> Result<(), MetadataError> {
    if width == 0 || height == 0 {
        return Err(MetadataError::InvalidResolution { width, height });
    }
    let aspect = (f64::from(width) / f64::from(height) * 100.0).round() / 100.0;
    let orientation = if aspect <= 0.95 {
        "portrait"
    } else if aspect <= 1.05 {
        "square"
    } else {
        "landscape"
    };

    asset.set_attr("media.width", width)?;
    asset.set_attr("media.height", height)?;
    asset.set_attr("media.aspect", aspect)?;
    asset.set_attr("media.orientation", orientation)?;
    Ok(())
}

// ────────── Internal ffprobe JSON parsing ──────────

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    format_long_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
    nb_streams: Option<usize>,
    tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

fn parse_format_metadata(format: &FfprobeFormat) -> FormatMetadata {
    FormatMetadata {
        format_name: format.format_name.clone(),
        format_long_name: format.format_long_name.clone(),
        duration: format.duration.as_ref().and_then(|d| d.parse::<f64>().ok()),
        size: format.size.as_ref().and_then(|s| s.parse::<u64>().ok()),
        bit_rate: format.bit_rate.as_ref().and_then(|b| b.parse::<u64>().ok()),
        nb_streams: format.nb_streams.unwrap_or(0),
        tags: format.tags.clone().unwrap_or_default(),
    }
}

/// Parse "30000/1001" or "25" into frames per second
fn parse_frame_rate(fps_str: &str) -> Option<f64> {
    match fps_str.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().ok()?;
            let den = den.parse::<f64>().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => fps_str.parse::<f64>().ok(),
    }
}

fn parse_video_stream(streams: &[FfprobeStream]) -> Option<VideoStreamMetadata> {
    streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|stream| VideoStreamMetadata {
            codec_name: stream.codec_name.clone(),
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
            fps: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
            pix_fmt: stream.pix_fmt.clone(),
        })
}

fn parse_audio_stream(streams: &[FfprobeStream]) -> Option<AudioStreamMetadata> {
    streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|stream| AudioStreamMetadata {
            codec_name: stream.codec_name.clone(),
            sample_rate: stream
                .sample_rate
                .as_ref()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(0),
            channels: stream.channels.unwrap_or(0),
        })
}
