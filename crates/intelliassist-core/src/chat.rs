use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RecordId;

/// Stored chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: RecordId,
    pub user_id: Option<String>,
    pub message: String,
    pub response: String,
    pub model: Option<String>,
    pub response_time_ms: i64,
    pub tokens_used: i64,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub user_id: Option<String>,
    pub message: String,
    pub response: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response_time_ms: i64,
    #[serde(default)]
    pub tokens_used: i64,
    #[serde(default)]
    pub context: Option<String>,
}

impl NewChatMessage {
    pub fn new(message: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            user_id: None,
            message: message.into(),
            response: response.into(),
            model: None,
            response_time_ms: 0,
            tokens_used: 0,
            context: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_usage(mut self, response_time_ms: i64, tokens_used: i64) -> Self {
        self.response_time_ms = response_time_ms.max(0);
        self.tokens_used = tokens_used.max(0);
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn into_message(self, id: RecordId, now: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id,
            user_id: self.user_id,
            message: self.message,
            response: self.response,
            model: self.model,
            response_time_ms: self.response_time_ms,
            tokens_used: self.tokens_used,
            context: self.context,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_is_clamped() {
        let message = NewChatMessage::new("hi", "hello").with_usage(-5, -1);
        assert_eq!(message.response_time_ms, 0);
        assert_eq!(message.tokens_used, 0);
    }

    #[test]
    fn test_into_message_keeps_fields() {
        let now = Utc::now();
        let stored = NewChatMessage::new("plan my week", "Here is a plan")
            .with_user(Some("u1".to_string()))
            .with_model(Some("llama3-8b-8192".to_string()))
            .into_message(RecordId::Int(3), now);

        assert_eq!(stored.id, RecordId::Int(3));
        assert_eq!(stored.user_id.as_deref(), Some("u1"));
        assert_eq!(stored.created_at, now);
    }
}
