//! Audio processors

use crate::{extract_audio, probe_audio, AudioConfig, AudioFormat};
use asset_analysis_common::ProcessingError;
use asset_pipeline_core::{
    ArgType, Argument, Context, Frame, Processor, ProcessorDescriptor, ProcessorError,
};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info};

pub const AUDIO_PROBE: &str = "pkg.AudioProbe";
pub const AUDIO_PROXY: &str = "pkg.AudioProxy";

/// Records `media.audio` for any media file
pub struct AudioProbe;

#[async_trait]
impl Processor for AudioProbe {
    async fn process(&self, ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
        let path = frame.localize_source(ctx).await?;
        let probed = tokio::task::spawn_blocking(move || probe_audio(&path))
            .await
            .map_err(|e| ProcessorError::Panicked(e.to_string()))?;

        let audio = match probed {
            Ok(Some(stream)) => json!({
                "hasAudio": true,
                "channels": stream.channels,
                "sampleRate": stream.sample_rate,
                "codec": stream.codec,
            }),
            Ok(None) => json!({"hasAudio": false}),
            Err(e) => {
                debug!("Treating {} as silent: {}", frame.asset().id(), e);
                json!({"hasAudio": false})
            }
        };
        frame.asset_mut().set_attr("media.audio", audio)?;
        Ok(())
    }
}

pub fn audio_probe() -> ProcessorDescriptor {
    ProcessorDescriptor::new(AUDIO_PROBE, Vec::new(), |_| Ok(Box::new(AudioProbe)))
}

/// Extracts an audio proxy into the OFS
pub struct AudioProxy {
    config: AudioConfig,
}

#[async_trait]
impl Processor for AudioProxy {
    async fn process(&self, ctx: &Context, frame: &mut Frame<'_>) -> Result<(), ProcessorError> {
        let source = frame.localize_source(ctx).await?;
        let extension = self.config.format.extension();
        let scratch = ctx.scratch_file(&format!(".{extension}"))?;

        let start = Instant::now();
        let config = self.config.clone();
        let output = scratch.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extract_audio(&source, &output, &config))
            .await
            .map_err(|e| ProcessorError::Panicked(e.to_string()))?;

        match extracted {
            Ok(_) => {}
            Err(ProcessingError::NoAudioStream) => {
                return Err(ProcessorError::Validation(
                    "asset has no audio channel".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        if ctx.verbose {
            info!("Extracted audio in {:?}", start.elapsed());
        }

        let asset_id = frame.asset().id().to_string();
        let location = ctx
            .ofs
            .locate("assets", &asset_id, "proxy", &format!("audio.{extension}"))
            .await?;
        ctx.ofs.store(&location, &scratch).await?;

        frame.asset_mut().set_attr(
            "proxies.audio",
            json!({
                "uri": location.uri,
                "mediaType": location.media_type,
                "sampleRate": self.config.sample_rate,
                "channels": self.config.channels,
            }),
        )?;
        Ok(())
    }
}

pub fn audio_proxy() -> ProcessorDescriptor {
    ProcessorDescriptor::new(
        AUDIO_PROXY,
        vec![
            Argument::optional("sample_rate", ArgType::Int, 16000),
            Argument::optional("channels", ArgType::Int, 1),
            Argument::optional("format", ArgType::String, "flac"),
            Argument::optional("normalize", ArgType::Bool, false),
        ],
        |args| {
            let sample_rate = u32::try_from(args.int("sample_rate")?)
                .ok()
                .filter(|rate| *rate > 0)
                .ok_or_else(|| ProcessorError::Configuration("sample_rate must be positive".into()))?;
            let channels = u8::try_from(args.int("channels")?)
                .ok()
                .filter(|channels| (1..=8).contains(channels))
                .ok_or_else(|| ProcessorError::Configuration("channels must be 1-8".into()))?;
            let format = args
                .string("format")?
                .parse::<AudioFormat>()
                .map_err(|e| ProcessorError::Configuration(e.to_string()))?;

            Ok(Box::new(AudioProxy {
                config: AudioConfig {
                    sample_rate,
                    channels,
                    format,
                    normalize: args.bool("normalize")?,
                },
            }))
        },
    )
}
