//! Backend row shapes and their translation to the canonical types.

use chrono::{DateTime, TimeZone, Utc};
use intelliassist_core::{ChatMessage, RecordId, Task, TaskId, DEFAULT_CATEGORY};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRecord {
    pub id: i64,
    pub summary: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TaskRecord> for Task {
    fn from(record: TaskRecord) -> Self {
        Task {
            id: TaskId::Int(record.id),
            summary: record.summary,
            category: record.category,
            priority: record.priority.parse().unwrap_or_default(),
            status: record.status.parse().unwrap_or_default(),
            user_id: record.user_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatRecord {
    pub id: i64,
    pub user_id: Option<String>,
    pub message: String,
    pub response: String,
    pub model: Option<String>,
    pub response_time_ms: i64,
    pub tokens_used: i64,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ChatRecord> for ChatMessage {
    fn from(record: ChatRecord) -> Self {
        ChatMessage {
            id: RecordId::Int(record.id),
            user_id: record.user_id,
            message: record.message,
            response: record.response,
            model: record.model,
            response_time_ms: record.response_time_ms,
            tokens_used: record.tokens_used,
            context: record.context,
            created_at: record.created_at,
        }
    }
}

/// Supabase stores timestamps either as epoch seconds or RFC 3339 text.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    fn into_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(secs) => {
                let millis = (secs * 1000.0).round() as i64;
                Utc.timestamp_millis_opt(millis).single()
            }
            RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
        }
    }
}

fn flexible_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    Ok(raw.and_then(RawTimestamp::into_datetime))
}

/// Row of the Supabase `tasks` table. Older rows use `title` instead of `summary`.
#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseTaskRow {
    pub id: TaskId,
    #[serde(alias = "title")]
    pub summary: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<SupabaseTaskRow> for Task {
    fn from(row: SupabaseTaskRow) -> Self {
        let created_at = row.created_at.unwrap_or_else(Utc::now);
        Task {
            id: row.id,
            summary: row.summary,
            category: row
                .category
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            priority: row
                .priority
                .and_then(|p| p.parse().ok())
                .unwrap_or_default(),
            status: row.status.and_then(|s| s.parse().ok()).unwrap_or_default(),
            user_id: row.user_id,
            created_at,
            updated_at: row.updated_at.unwrap_or(created_at),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseChatRow {
    pub id: RecordId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response_time_ms: Option<i64>,
    #[serde(default)]
    pub tokens_used: Option<i64>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<SupabaseChatRow> for ChatMessage {
    fn from(row: SupabaseChatRow) -> Self {
        ChatMessage {
            id: row.id,
            user_id: row.user_id,
            message: row.message,
            response: row.response,
            model: row.model,
            response_time_ms: row.response_time_ms.unwrap_or(0),
            tokens_used: row.tokens_used.unwrap_or(0),
            context: row.context,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelliassist_core::{TaskPriority, TaskStatus};

    #[test]
    fn test_record_with_unknown_priority_falls_back() {
        let now = Utc::now();
        let task: Task = TaskRecord {
            id: 7,
            summary: "Pay rent".into(),
            category: "general".into(),
            priority: "whenever".into(),
            status: "in_progress".into(),
            user_id: None,
            created_at: now,
            updated_at: now,
        }
        .into();
        assert_eq!(task.id, TaskId::Int(7));
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_supabase_row_accepts_title_and_epoch() {
        let row: SupabaseTaskRow = serde_json::from_str(
            r#"{"id": 3, "title": "Book flights", "priority": "high", "created_at": 1700000000.5}"#,
        )
        .unwrap();
        let task: Task = row.into();
        assert_eq!(task.summary, "Book flights");
        assert_eq!(task.category, "general");
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.created_at.timestamp_millis(), 1_700_000_000_500);
        assert_eq!(task.updated_at, task.created_at);
    }

    #[test]
    fn test_supabase_row_with_uuid_and_text_timestamps() {
        let row: SupabaseTaskRow = serde_json::from_str(
            r#"{"id": "6f1c2a9e-3b1d-4a55-9d1e-0c2b7f1e9a10", "summary": "Review PR",
                "status": "completed", "created_at": "2024-05-01T10:00:00+00:00",
                "updated_at": "2024-05-02T08:30:00.123456"}"#,
        )
        .unwrap();
        let task: Task = row.into();
        assert!(matches!(task.id, TaskId::Uuid(_)));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.updated_at > task.created_at);
    }
}
