//! Groq's OpenAI-compatible chat completion and Whisper endpoints.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::provider::{AudioInput, ChatRequest, Completion, Outcome, Provider, Transcription};
use crate::{ProviderError, Result};

pub const PROVIDER_NAME: &str = "groq";
const CONTEXT_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroqConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub transcription_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            chat_model: "llama3-8b-8192".to_string(),
            transcription_model: "whisper-large-v3".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

impl GroqConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
struct GroqHttp {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GroqHttp {
    fn new(config: &GroqConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("GROQ_API_KEY is not set".to_string()))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(format!("groq: {}", message)));
        }
        Err(ProviderError::Api {
            status: status.as_u16(),
            message: format!("Groq API error: {}", message),
        })
    }
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// Prior conversation is passed as an assistant turn, cut to 500 characters.
fn truncate_context(context: &str) -> String {
    match context.char_indices().nth(CONTEXT_LIMIT) {
        Some((idx, _)) => format!("{}... [truncated]", &context[..idx]),
        None => context.to_string(),
    }
}

/// Conversational completion.
pub struct GroqChat {
    http: GroqHttp,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl GroqChat {
    pub fn new(config: &GroqConfig) -> Self {
        Self {
            http: GroqHttp::new(config),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn messages(request: &ChatRequest) -> Vec<Message> {
        let mut messages = vec![Message {
            role: "system",
            content: request.system_prompt.clone(),
        }];
        if let Some(context) = request.context.as_deref().filter(|c| !c.trim().is_empty()) {
            messages.push(Message {
                role: "assistant",
                content: format!("Previous context: {}", truncate_context(context)),
            });
        }
        messages.push(Message {
            role: "user",
            content: request.message.clone(),
        });
        messages
    }

    async fn call_api(&self, request: &ChatRequest) -> Result<Completion> {
        if request.message.trim().is_empty() {
            return Err(ProviderError::InvalidInput("message is empty".to_string()));
        }
        let api_key = self.http.api_key()?;

        let response = self
            .http
            .client
            .post(format!("{}/chat/completions", self.http.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": &self.model,
                "messages": Self::messages(request),
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
            }))
            .send()
            .await?;

        let result: ChatResponse = GroqHttp::check(response).await?.json().await?;
        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let tokens_used = result
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| text.split_whitespace().count() as u64);

        Ok(Completion { text, tokens_used })
    }
}

#[async_trait]
impl Provider for GroqChat {
    type Input = ChatRequest;
    type Output = Completion;

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn operation(&self) -> &str {
        "chat_completion"
    }

    #[instrument(skip(self, input), fields(model = %self.model))]
    async fn invoke(&self, input: &ChatRequest) -> Outcome<Completion> {
        self.call_api(input).await.into()
    }
}

/// Whisper transcription over multipart upload.
pub struct GroqTranscriber {
    http: GroqHttp,
    model: String,
}

impl GroqTranscriber {
    pub fn new(config: &GroqConfig) -> Self {
        Self {
            http: GroqHttp::new(config),
            model: config.transcription_model.clone(),
        }
    }

    async fn call_api(&self, audio: &AudioInput) -> Result<Transcription> {
        if audio.bytes.is_empty() {
            return Err(ProviderError::InvalidInput("audio is empty".to_string()));
        }
        let api_key = self.http.api_key()?;

        let file = Part::bytes(audio.bytes.clone())
            .file_name(audio.filename.clone())
            .mime_str(&audio.content_type)?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .http
            .client
            .post(format!("{}/audio/transcriptions", self.http.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let result: TranscriptionResponse = GroqHttp::check(response).await?.json().await?;
        Ok(Transcription {
            text: result.text.trim().to_string(),
            confidence: 0.95,
            language: result.language,
        })
    }
}

#[async_trait]
impl Provider for GroqTranscriber {
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
        self.call_api(input).await.into()
    }
}
