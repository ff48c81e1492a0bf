//! Hugging Face Inference API adapters.
//!
//! Both endpoints take raw bytes and answer with loosely shaped JSON; a 503
//! means the model is still loading and another provider should be tried.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::provider::{AudioInput, Caption, ImageInput, Outcome, Provider, Transcription};
use crate::{ProviderError, Result};

pub const PROVIDER_NAME: &str = "huggingface";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingFaceConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub transcription_model: String,
    pub caption_model: String,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api-inference.huggingface.co".to_string(),
            transcription_model: "openai/whisper-large-v3".to_string(),
            caption_model: "Salesforce/blip-image-captioning-large".to_string(),
        }
    }
}

impl HuggingFaceConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
struct InferenceClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl InferenceClient {
    fn new(config: &HuggingFaceConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn call_api(&self, model: &str, bytes: &[u8], content_type: &str) -> Result<Value> {
        if bytes.is_empty() {
            return Err(ProviderError::InvalidInput("payload is empty".to_string()));
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("HF_API_KEY is not set".to_string()))?;

        let response = self
            .client
            .post(format!("{}/models/{}", self.base_url, model))
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 503 {
            return Err(ProviderError::Loading(model.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: format!("Hugging Face API error: {}", message),
            });
        }

        let value: Value = response.json().await?;
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error.to_string(),
            });
        }
        Ok(value)
    }
}

/// Pulls the text out of `{key}`, `[{key}, ..]` or a bare string.
fn response_text(value: &Value, key: &str) -> Option<String> {
    let text = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get(key).and_then(Value::as_str),
        Value::Array(items) => items.first().and_then(|first| match first {
            Value::String(s) => Some(s.as_str()),
            other => other.get(key).and_then(Value::as_str),
        }),
        _ => None,
    };
    text.map(|t| t.trim().to_string())
}

pub struct HuggingFaceTranscriber {
    inference: InferenceClient,
    model: String,
}

impl HuggingFaceTranscriber {
    pub fn new(config: &HuggingFaceConfig) -> Self {
        Self {
            inference: InferenceClient::new(config),
            model: config.transcription_model.clone(),
        }
    }

    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcription> {
        let value = self
            .inference
            .call_api(&self.model, &audio.bytes, &audio.content_type)
            .await?;
        let text = response_text(&value, "text").ok_or(ProviderError::EmptyOutput)?;
        Ok(Transcription {
            text,
            confidence: 0.9,
            language: None,
        })
    }
}

#[async_trait]
impl Provider for HuggingFaceTranscriber {
    type Input = AudioInput;
    type Output = Transcription;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn operation(&self) -> &str {
        "transcribe"
    }

    #[instrument(skip(self, input), fields(model = %self.model, file = %input.filename))]
    async fn invoke(&self, input: &AudioInput) -> Outcome<Transcription> {
        self.transcribe(input).await.into()
    }
}

pub struct HuggingFaceCaptioner {
    inference: InferenceClient,
    model: String,
}

impl HuggingFaceCaptioner {
    pub fn new(config: &HuggingFaceConfig) -> Self {
        Self {
            inference: InferenceClient::new(config),
            model: config.caption_model.clone(),
        }
    }

    async fn caption(&self, image: &ImageInput) -> Result<Caption> {
        let value = self
            .inference
            .call_api(&self.model, &image.bytes, &image.content_type)
            .await?;
        let text = response_text(&value, "generated_text").ok_or(ProviderError::EmptyOutput)?;
        Ok(Caption {
            text,
            confidence: 0.85,
        })
    }
}

#[async_trait]
impl Provider for HuggingFaceCaptioner {
    type Input = ImageInput;
    type Output = Caption;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn operation(&self) -> &str {
        "caption"
    }

    #[instrument(skip(self, input), fields(model = %self.model, file = %input.filename))]
    async fn invoke(&self, input: &ImageInput) -> Outcome<Caption> {
        self.caption(input).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(base_url: String) -> HuggingFaceConfig {
        HuggingFaceConfig {
            api_key: Some("hf-key".to_string()),
            base_url,
            ..Default::default()
        }
    }

    #[test]
    fn test_response_text_shapes() {
        assert_eq!(response_text(&json!({"text": " hi "}), "text").as_deref(), Some("hi"));
        assert_eq!(response_text(&json!([{"text": "first"}, {"text": "second"}]), "text").as_deref(), Some("first"));
        assert_eq!(response_text(&json!("bare"), "text").as_deref(), Some("bare"));
        assert_eq!(response_text(&json!(42), "text"), None);
        assert_eq!(response_text(&json!([]), "text"), None);
    }

    #[tokio::test]
    async fn test_caption_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/Salesforce/blip-image-captioning-large")
            .match_header("authorization", "Bearer hf-key")
            .match_header("content-type", "image/jpeg")
            .with_status(200)
            .with_body(r#"[{"generated_text":"a whiteboard covered in notes"}]"#)
            .create_async()
            .await;

        let captioner = HuggingFaceCaptioner::new(&config(server.url()));
        let image = ImageInput::new(vec![0xff, 0xd8, 0xff], "board.jpg");
        match captioner.invoke(&image).await {
            Outcome::Success(caption) => assert_eq!(caption.text, "a whiteboard covered in notes"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_loading_model_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/openai/whisper-large-v3")
            .with_status(503)
            .with_body(r#"{"error":"Model is currently loading","estimated_time":20.0}"#)
            .create_async()
            .await;

        let transcriber = HuggingFaceTranscriber::new(&config(server.url()));
        let audio = AudioInput::new(vec![1, 2, 3], "note.wav");
        assert!(matches!(
            transcriber.invoke(&audio).await,
            Outcome::Retryable(ProviderError::Loading(_))
        ));
    }

    #[tokio::test]
    async fn test_error_body_with_ok_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/openai/whisper-large-v3")
            .with_status(200)
            .with_body(r#"{"error":"bad audio"}"#)
            .create_async()
            .await;

        let transcriber = HuggingFaceTranscriber::new(&config(server.url()));
        let audio = AudioInput::new(vec![1, 2, 3], "note.flac");
        assert!(matches!(
            transcriber.invoke(&audio).await,
            Outcome::Retryable(ProviderError::Api { .. })
        ));
    }

    #[tokio::test]
    async fn test_transcription_sends_audio_content_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/openai/whisper-large-v3")
            .match_header("content-type", "audio/flac")
            .with_status(200)
            .with_body(r#"{"text":"book the venue"}"#)
            .create_async()
            .await;

        let transcriber = HuggingFaceTranscriber::new(&config(server.url()));
        let audio = AudioInput::new(vec![1, 2, 3], "note.flac");
        assert!(transcriber.invoke(&audio).await.is_success());
        mock.assert_async().await;
    }
}
