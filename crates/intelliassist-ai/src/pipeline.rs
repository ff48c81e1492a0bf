//! Media processing: transcription and captioning through provider chains.
//!
//! Processing never fails. When every provider is exhausted, or the input is
//! rejected up front, the result is a degraded description built from the
//! filename that still carries at least one follow-up task.

use intelliassist_core::{TaskCandidate, TaskExtractor};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::chain::{AttemptRecord, ChainOutcome, FallbackChain};
use crate::heuristics::{self, AudioKind, ImageKind};
use crate::provider::{AudioInput, Caption, ImageInput, Transcription};
use crate::ProviderError;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_audio_bytes: usize,
    pub large_audio_warn_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_audio_bytes: 25 * 1024 * 1024,
            large_audio_warn_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaStatus {
    Success,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaResult {
    pub kind: MediaKind,
    pub status: MediaStatus,
    pub filename: String,
    /// Transcript or caption; a fallback description when degraded
    pub raw_output: String,
    pub provider_used: Option<String>,
    pub confidence: f32,
    pub language: Option<String>,
    /// Audio kind or image context
    pub content_hint: String,
    pub tasks: Vec<TaskCandidate>,
    pub attempts: Vec<AttemptRecord>,
    pub error: Option<String>,
}

impl MediaResult {
    pub fn is_degraded(&self) -> bool {
        self.status == MediaStatus::Degraded
    }
}

pub struct MediaPipeline {
    audio: FallbackChain<AudioInput, Transcription>,
    image: FallbackChain<ImageInput, Caption>,
    extractor: Arc<TaskExtractor>,
    config: PipelineConfig,
}

impl MediaPipeline {
    pub fn new(
        audio: FallbackChain<AudioInput, Transcription>,
        image: FallbackChain<ImageInput, Caption>,
        extractor: Arc<TaskExtractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            audio,
            image,
            extractor,
            config,
        }
    }

    pub fn audio_providers(&self) -> Vec<String> {
        self.audio.provider_names()
    }

    pub fn image_providers(&self) -> Vec<String> {
        self.image.provider_names()
    }

    fn check_audio(&self, audio: &AudioInput) -> Result<(), ProviderError> {
        let size = audio.bytes.len();
        if size == 0 {
            return Err(ProviderError::InvalidInput("audio file is empty".to_string()));
        }
        if size > self.config.max_audio_bytes {
            return Err(ProviderError::InvalidInput(format!(
                "audio file is {} bytes, limit is {}",
                size, self.config.max_audio_bytes
            )));
        }
        if size > self.config.large_audio_warn_bytes {
            warn!(file = %audio.filename, size, "Large audio file, transcription may be slow");
        }
        Ok(())
    }

    #[instrument(skip(self, audio), fields(file = %audio.filename, size = audio.bytes.len()))]
    pub async fn transcribe(&self, audio: AudioInput) -> MediaResult {
        let kind = AudioKind::from_filename(&audio.filename);

        if let Err(e) = self.check_audio(&audio) {
            return self.degraded_audio(&audio.filename, kind, Vec::new(), Some(e));
        }

        match self.audio.run(&audio).await {
            ChainOutcome::Success {
                output,
                provider,
                attempts,
            } => {
                info!(provider = %provider, "Audio transcribed");
                let tasks = self.extractor.extract(&output.text);
                MediaResult {
                    kind: MediaKind::Audio,
                    status: MediaStatus::Success,
                    filename: audio.filename,
                    raw_output: output.text,
                    provider_used: Some(provider),
                    confidence: output.confidence,
                    language: output.language,
                    content_hint: kind.label().to_string(),
                    tasks,
                    attempts,
                    error: None,
                }
            }
            ChainOutcome::Exhausted { attempts, fatal } => {
                self.degraded_audio(&audio.filename, kind, attempts, fatal)
            }
        }
    }

    #[instrument(skip(self, image), fields(file = %image.filename, size = image.bytes.len()))]
    pub async fn caption(&self, image: ImageInput, context: &str) -> MediaResult {
        let kind = ImageKind::from_filename(&image.filename);

        if image.bytes.is_empty() {
            let error = ProviderError::InvalidInput("image file is empty".to_string());
            return self.degraded_image(&image.filename, kind, Vec::new(), Some(error));
        }

        match self.image.run(&image).await {
            ChainOutcome::Success {
                output,
                provider,
                attempts,
            } => {
                let content_hint = heuristics::image_context(&output.text, context);
                info!(provider = %provider, context = %content_hint, "Image captioned");
                let tasks = self.extractor.extract(&output.text);
                MediaResult {
                    kind: MediaKind::Image,
                    status: MediaStatus::Success,
                    filename: image.filename,
                    raw_output: output.text,
                    provider_used: Some(provider),
                    confidence: output.confidence,
                    language: None,
                    content_hint,
                    tasks,
                    attempts,
                    error: None,
                }
            }
            ChainOutcome::Exhausted { attempts, fatal } => {
                self.degraded_image(&image.filename, kind, attempts, fatal)
            }
        }
    }

    fn degraded_audio(
        &self,
        filename: &str,
        kind: AudioKind,
        attempts: Vec<AttemptRecord>,
        error: Option<ProviderError>,
    ) -> MediaResult {
        let description = format!(
            "Could not transcribe '{}'. Based on its name this looks like a {}.",
            filename,
            kind.label()
        );
        self.degraded(
            MediaKind::Audio,
            filename,
            description,
            kind.label(),
            kind.follow_up(filename),
            attempts,
            error,
        )
    }

    fn degraded_image(
        &self,
        filename: &str,
        kind: ImageKind,
        attempts: Vec<AttemptRecord>,
        error: Option<ProviderError>,
    ) -> MediaResult {
        let description = format!(
            "Could not describe '{}'. Based on its name this looks like a {}.",
            filename,
            kind.label()
        );
        self.degraded(
            MediaKind::Image,
            filename,
            description,
            kind.label(),
            kind.follow_up(filename),
            attempts,
            error,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn degraded(
        &self,
        kind: MediaKind,
        filename: &str,
        description: String,
        hint: &str,
        follow_up: TaskCandidate,
        attempts: Vec<AttemptRecord>,
        error: Option<ProviderError>,
    ) -> MediaResult {
        warn!(
            file = filename,
            attempts = attempts.len(),
            error = %error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "Returning degraded media result"
        );

        // Description is built from the filename; nothing to extract.
        let tasks = vec![follow_up];

        MediaResult {
            kind,
            status: MediaStatus::Degraded,
            filename: filename.to_string(),
            raw_output: description,
            provider_used: None,
            confidence: 0.0,
            language: None,
            content_hint: hint.to_string(),
            tasks,
            attempts,
            error: Some(
                error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "all providers failed".to_string()),
            ),
        }
    }
}
