use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    Unavailable(String),

    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Model is loading: {0}")]
    Loading(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("Provider returned empty output")]
    EmptyOutput,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction rules error: {0}")]
    Rules(#[from] intelliassist_core::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    /// HTTP status associated with the failure, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status, .. } => Some(*status),
            ProviderError::Loading(_) => Some(503),
            ProviderError::RateLimited(_) => Some(429),
            ProviderError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Errors no other provider could recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
