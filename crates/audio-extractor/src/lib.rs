/// Audio probing and extraction
///
/// Probes media files for audio streams with ffprobe and extracts audio with
/// configurable format, sample rate, channels, and optional EBU R128 normalization.
pub mod plugin;

use asset_analysis_common::{ProcessingError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::debug;

/// All processors provided by this crate
pub fn descriptors() -> Vec<asset_pipeline_core::ProcessorDescriptor> {
    vec![plugin::audio_probe(), plugin::audio_proxy()]
}

/// Audio output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// PCM (uncompressed) - for ML models
    PCM,
    /// FLAC (lossless compression) - for storage
    FLAC,
    /// M4A (AAC compression) - for storage
    M4A,
    /// MP3 (lossy compression) - for compatibility
    MP3,
}

impl AudioFormat {
    /// Get file extension for this format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::PCM => "wav",
            AudioFormat::FLAC => "flac",
            AudioFormat::M4A => "m4a",
            AudioFormat::MP3 => "mp3",
        }
    }

    /// Get `FFmpeg` codec name for this format
    fn codec_name(&self) -> &'static str {
        match self {
            AudioFormat::PCM => "pcm_s16le",
            AudioFormat::FLAC => "flac",
            AudioFormat::M4A => "aac",
            AudioFormat::MP3 => "libmp3lame",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wav" | "pcm" => Ok(AudioFormat::PCM),
            "flac" => Ok(AudioFormat::FLAC),
            "m4a" | "aac" => Ok(AudioFormat::M4A),
            "mp3" => Ok(AudioFormat::MP3),
            other => Err(ProcessingError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Audio extraction configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Target sample rate (16000 for ML, 48000 for storage)
    pub sample_rate: u32,
    /// Number of channels (1 for mono, 2 for stereo)
    pub channels: u8,
    /// Output audio format
    pub format: AudioFormat,
    /// Apply EBU R128 normalization to -23 LUFS
    pub normalize: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            format: AudioFormat::PCM,
            normalize: false,
        }
    }
}

impl AudioConfig {
    /// Create config optimized for storage (48kHz stereo FLAC)
    #[must_use]
    pub fn for_storage() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            format: AudioFormat::FLAC,
            normalize: false,
        }
    }
}

/// First audio stream reported by ffprobe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

/// Parse `ffprobe -print_format json -show_streams` output into the first audio stream
pub fn parse_audio_probe(json: &str) -> Result<Option<AudioStreamInfo>> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ProcessingError::Other(format!("Failed to parse ffprobe output: {e}")))?;

    Ok(probe
        .streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"))
        .map(|stream| AudioStreamInfo {
            codec: stream.codec_name,
            sample_rate: stream.sample_rate.and_then(|rate| rate.parse().ok()),
            channels: stream.channels,
        }))
}

/// Probe the first audio stream of a media file
///
/// # Errors
/// Returns error if ffprobe cannot be run, rejects the file, or prints
/// output that cannot be parsed
pub fn probe_audio(input_path: &Path) -> Result<Option<AudioStreamInfo>> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
        .arg(input_path)
        .output()
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to execute ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(ProcessingError::CorruptedFile(format!(
            "ffprobe rejected {}",
            input_path.display()
        )));
    }

    parse_audio_probe(&String::from_utf8_lossy(&output.stdout))
}

/// True only when ffprobe reports at least one audio stream
///
/// Never fails: a missing tool, unreadable file or unparsable output all
/// count as "no audio".
pub fn has_audio_channel(input_path: &Path) -> bool {
    match probe_audio(input_path) {
        Ok(stream) => stream.is_some(),
        Err(e) => {
            debug!("Audio probe of {} failed: {}", input_path.display(), e);
            false
        }
    }
}

/// Extract audio from a video or audio file with the FFmpeg CLI
///
/// The output extension is replaced with the one matching `config.format`.
///
/// # Errors
/// Returns error if:
/// - Input file has no audio stream
/// - FFmpeg fails
/// - Output file was not written
pub fn extract_audio(
    input_path: &Path,
    output_path: &Path,
    config: &AudioConfig,
) -> Result<PathBuf> {
    if !has_audio_channel(input_path) {
        return Err(ProcessingError::NoAudioStream);
    }

    let output_path = output_path.with_extension(config.format.extension());

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-v")
        .arg("error")
        .arg("-i")
        .arg(input_path)
        .arg("-vn") // No video
        .arg("-acodec")
        .arg(config.format.codec_name())
        .arg("-ar")
        .arg(config.sample_rate.to_string())
        .arg("-ac")
        .arg(config.channels.to_string());

    // Add bitrate for compressed formats
    if matches!(config.format, AudioFormat::M4A | AudioFormat::MP3) {
        cmd.arg("-b:a").arg("128k");
    }

    if config.normalize {
        cmd.arg("-af").arg("loudnorm=I=-23:LRA=7:TP=-2");
    }

    cmd.arg("-y").arg(&output_path);
    debug!("Running {:?}", cmd);

    let output = cmd
        .output()
        .map_err(|e| ProcessingError::FFmpegError(format!("Failed to execute FFmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessingError::FFmpegError(format!(
            "FFmpeg failed: {stderr}"
        )));
    }

    if !output_path.exists() {
        return Err(ProcessingError::FFmpegError(
            "Output file was not created".to_string(),
        ));
    }

    Ok(output_path)
}
