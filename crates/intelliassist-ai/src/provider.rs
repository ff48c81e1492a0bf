use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ProviderError, Result};

/// Result of a single provider attempt.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// The next provider in the chain may still succeed
    Retryable(ProviderError),
    /// No provider can process this input
    Fatal(ProviderError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Retryable(e) => Outcome::Retryable(e),
            Outcome::Fatal(e) => Outcome::Fatal(e),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) if e.is_fatal() => Outcome::Fatal(e),
            Err(e) => Outcome::Retryable(e),
        }
    }
}

/// Input whose size is recorded with each call metric.
pub trait ProviderInput: Send + Sync {
    fn size(&self) -> u64;
}

/// Output the chain can check for emptiness and measure.
pub trait ProviderOutput: Send {
    fn text(&self) -> &str;

    fn size(&self) -> u64 {
        self.text().len() as u64
    }
}

/// A transcription, captioning or completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    type Input: ProviderInput;
    type Output: ProviderOutput;

    /// Name used for metrics and rate limits
    fn name(&self) -> &str;

    fn operation(&self) -> &str;

    async fn invoke(&self, input: &Self::Input) -> Outcome<Self::Output>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInput {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl AudioInput {
    /// Content type is derived from the filename extension.
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let content_type = crate::heuristics::audio_content_type(&filename).to_string();
        Self {
            bytes,
            filename,
            content_type,
        }
    }

    pub fn extension(&self) -> String {
        crate::heuristics::extension(&self.filename).unwrap_or_else(|| "wav".to_string())
    }
}

impl ProviderInput for AudioInput {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let content_type = crate::heuristics::image_content_type(&filename).to_string();
        Self {
            bytes,
            filename,
            content_type,
        }
    }

    pub fn extension(&self) -> String {
        crate::heuristics::extension(&self.filename).unwrap_or_else(|| "png".to_string())
    }
}

impl ProviderInput for ImageInput {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub message: String,
    pub context: Option<String>,
}

impl ProviderInput for ChatRequest {
    fn size(&self) -> u64 {
        (self.system_prompt.len()
            + self.message.len()
            + self.context.as_ref().map_or(0, String::len)) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
}

impl ProviderOutput for Transcription {
    fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
    pub confidence: f32,
}

impl ProviderOutput for Caption {
    fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

impl ProviderOutput for Completion {
    fn text(&self) -> &str {
        &self.text
    }
}
