use intelliassist_core::{TaskCandidate, TaskExtractor};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, warn};

use crate::chain::{AttemptResult, ChainOutcome, FallbackChain};
use crate::provider::{ChatRequest, Completion};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are IntelliAssist, a productivity assistant. \
Answer clearly and concisely. When the user describes work to be done, list concrete \
action items as a numbered list, one task per line.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    /// No provider is configured
    Placeholder,
    /// Providers are configured but none answered
    ApiError,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedResponse {
    pub text: String,
    pub tokens_used: u64,
    pub latency_ms: f64,
    pub status: ResponseStatus,
    pub provider: Option<String>,
    pub tasks: Vec<TaskCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatHealthStatus {
    NotConfigured,
    Healthy,
    Error,
}

/// Result of a one-line round trip through the chat chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChatHealth {
    pub status: ChatHealthStatus,
    pub provider: Option<String>,
    pub response_time_ms: f64,
    /// First characters of the reply
    pub sample: Option<String>,
    pub error: Option<String>,
}

const HEALTH_SAMPLE_CHARS: usize = 50;

/// Conversational completion with the same chain discipline as media.
pub struct ResponseGenerator {
    chain: FallbackChain<ChatRequest, Completion>,
    extractor: Arc<TaskExtractor>,
    system_prompt: String,
}

impl ResponseGenerator {
    pub fn new(chain: FallbackChain<ChatRequest, Completion>, extractor: Arc<TaskExtractor>) -> Self {
        Self {
            chain,
            extractor,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.chain.is_empty()
    }

    pub fn providers(&self) -> Vec<String> {
        self.chain.provider_names()
    }

    /// Always returns text; failures become labelled placeholder replies.
    #[instrument(skip(self, prompt, context), fields(prompt_len = prompt.len()))]
    pub async fn generate(&self, prompt: &str, context: Option<&str>) -> GeneratedResponse {
        let started = Instant::now();

        if prompt.trim().is_empty() {
            return Self::fallback(
                "Please enter a message so I can help.".to_string(),
                ResponseStatus::ApiError,
                started,
            );
        }

        if self.chain.is_empty() {
            let text = format!(
                "[PLACEHOLDER MODE] You said: {}\n\nNo AI provider is configured, so this is an \
                 automatic reply. Configure an API key to receive real answers.",
                prompt.trim()
            );
            return Self::fallback(text, ResponseStatus::Placeholder, started);
        }

        let request = ChatRequest {
            system_prompt: self.system_prompt.clone(),
            message: prompt.to_string(),
            context: context.map(str::to_string),
        };

        match self.chain.run(&request).await {
            ChainOutcome::Success {
                output, provider, ..
            } => {
                let tasks = self.extractor.extract(&output.text);
                GeneratedResponse {
                    tokens_used: output.tokens_used,
                    text: output.text,
                    latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                    status: ResponseStatus::Success,
                    provider: Some(provider),
                    tasks,
                }
            }
            ChainOutcome::Exhausted { attempts, fatal } => {
                warn!(
                    attempts = attempts.len(),
                    error = %fatal.map(|e| e.to_string()).unwrap_or_default(),
                    "No provider produced a response"
                );
                Self::fallback(
                    "I'm having trouble reaching the AI service right now. \
                     Please try again in a moment."
                        .to_string(),
                    ResponseStatus::ApiError,
                    started,
                )
            }
        }
    }

    /// Send a short greeting through the chain and report how it went.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> ChatHealth {
        let started = Instant::now();
        if self.chain.is_empty() {
            return ChatHealth {
                status: ChatHealthStatus::NotConfigured,
                provider: None,
                response_time_ms: 0.0,
                sample: None,
                error: Some("no chat provider configured".to_string()),
            };
        }

        let request = ChatRequest {
            system_prompt: self.system_prompt.clone(),
            message: "Hello".to_string(),
            context: None,
        };
        let outcome = self.chain.run(&request).await;
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            ChainOutcome::Success {
                output, provider, ..
            } => ChatHealth {
                status: ChatHealthStatus::Healthy,
                provider: Some(provider),
                response_time_ms,
                sample: Some(output.text.chars().take(HEALTH_SAMPLE_CHARS).collect()),
                error: None,
            },
            ChainOutcome::Exhausted { attempts, fatal } => {
                let error = fatal.map(|e| e.to_string()).or_else(|| {
                    attempts.last().map(|a| match &a.result {
                        AttemptResult::Failed(e) | AttemptResult::Fatal(e) => {
                            format!("{}: {}", a.provider, e)
                        }
                        AttemptResult::TimedOut => format!("{}: timed out", a.provider),
                        AttemptResult::RateLimited => format!("{}: rate limited", a.provider),
                        AttemptResult::Success => a.provider.clone(),
                    })
                });
                warn!(error = %error.as_deref().unwrap_or_default(), "Chat health check failed");
                ChatHealth {
                    status: ChatHealthStatus::Error,
                    provider: attempts.last().map(|a| a.provider.clone()),
                    response_time_ms,
                    sample: None,
                    error,
                }
            }
        }
    }

    fn fallback(text: String, status: ResponseStatus, started: Instant) -> GeneratedResponse {
        GeneratedResponse {
            tokens_used: text.split_whitespace().count() as u64,
            text,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            status,
            provider: None,
            tasks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groq::{GroqChat, GroqConfig};
    use crate::metrics::{CallOutcome, MetricRecorder};
    use std::time::Duration;

    fn generator(metrics: &Arc<MetricRecorder>, base_url: Option<String>) -> ResponseGenerator {
        let mut chain = FallbackChain::new("chat", metrics.clone(), Duration::from_secs(5));
        if let Some(base_url) = base_url {
            chain.push(Arc::new(GroqChat::new(&GroqConfig {
                api_key: Some("key".to_string()),
                base_url,
                ..Default::default()
            })));
        }
        ResponseGenerator::new(chain, Arc::new(TaskExtractor::builtin().unwrap()))
    }

    #[tokio::test]
    async fn test_placeholder_without_provider() {
        let metrics = Arc::new(MetricRecorder::default());
        let response = generator(&metrics, None).generate("plan my week", None).await;
        assert_eq!(response.status, ResponseStatus::Placeholder);
        assert!(response.text.starts_with("[PLACEHOLDER MODE] You said: plan my week"));
        assert!(response.tokens_used > 0);
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn test_success_extracts_tasks() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"content":"Here is a plan:\n1. Call dentist\n2. Finish report"}}],
                    "usage":{"total_tokens":17}}"#,
            )
            .create_async()
            .await;

        let metrics = Arc::new(MetricRecorder::default());
        let response = generator(&metrics, Some(server.url()))
            .generate("help me plan", Some("earlier chat"))
            .await;

        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.provider.as_deref(), Some("groq"));
        assert_eq!(response.tokens_used, 17);
        let titles: Vec<&str> = response.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Call dentist", "Finish report"]);
        assert_eq!(metrics.recent(1)[0].outcome, CallOutcome::Success);
    }

    #[tokio::test]
    async fn test_api_failure_returns_labelled_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(502)
            .create_async()
            .await;

        let metrics = Arc::new(MetricRecorder::default());
        let response = generator(&metrics, Some(server.url())).generate("hello", None).await;
        assert_eq!(response.status, ResponseStatus::ApiError);
        assert!(!response.text.is_empty());
        assert!(response.tasks.is_empty());
        assert_eq!(metrics.health("groq").total_errors, 1);
    }

    #[tokio::test]
    async fn test_blank_prompt() {
        let metrics = Arc::new(MetricRecorder::default());
        let response = generator(&metrics, None).generate("   ", None).await;
        assert_eq!(response.status, ResponseStatus::ApiError);
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_without_provider() {
        let metrics = Arc::new(MetricRecorder::default());
        let health = generator(&metrics, None).health_check().await;
        assert_eq!(health.status, ChatHealthStatus::NotConfigured);
        assert!(health.provider.is_none());
        assert!(metrics.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_reports_sample_and_failure() {
        let mut server = mockito::Server::new_async().await;
        let reply = "Hello! I am ready to help you organize your day and everything in it.";
        let ok = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::Regex("Hello".to_string()))
            .with_status(200)
            .with_body(serde_json::json!({"choices": [{"message": {"content": reply}}]}).to_string())
            .expect(1)
            .create_async()
            .await;

        let metrics = Arc::new(MetricRecorder::default());
        let generator = generator(&metrics, Some(server.url()));
        let health = generator.health_check().await;
        assert_eq!(health.status, ChatHealthStatus::Healthy);
        assert_eq!(health.provider.as_deref(), Some("groq"));
        assert_eq!(health.sample.as_deref().map(|s| s.chars().count()), Some(50));
        assert!(health.error.is_none());
        ok.assert_async().await;

        ok.remove_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;
        let health = generator.health_check().await;
        assert_eq!(health.status, ChatHealthStatus::Error);
        assert!(health.error.unwrap().starts_with("groq"));
        assert_eq!(metrics.health("groq").total_errors, 1);
    }
}
