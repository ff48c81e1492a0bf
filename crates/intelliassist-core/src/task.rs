use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Error, Result};

/// Backend-assigned task identifier.
///
/// Relational and in-memory backends hand out integers, remote backends may
/// use UUIDs. An id is only meaningful for the backend that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Int(i64),
    Uuid(Uuid),
}

/// Identifier of any stored row; chat history shares the task id space.
pub type RecordId = TaskId;

impl TaskId {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TaskId::Int(id) => Some(*id),
            TaskId::Uuid(_) => None,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Int(id) => write!(f, "{}", id),
            TaskId::Uuid(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(id) = s.parse::<i64>() {
            return Ok(TaskId::Int(id));
        }
        Uuid::parse_str(s)
            .map(TaskId::Uuid)
            .map_err(|_| Error::InvalidTaskId(s.to_string()))
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        TaskId::Int(id)
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        TaskId::Uuid(id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "todo" => Ok(TaskStatus::Pending),
            "in_progress" | "in-progress" | "inprogress" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            other => Err(Error::InvalidTaskField(format!("unknown status: {}", other))),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" | "normal" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "critical" | "urgent" => Ok(TaskPriority::Critical),
            other => Err(Error::InvalidTaskField(format!("unknown priority: {}", other))),
        }
    }
}

/// Canonical task shape returned by every storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub summary: String,
    pub category: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Materialize a new task with a backend-assigned id
    pub fn from_new(id: TaskId, new_task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            summary: new_task.summary,
            category: new_task.category,
            priority: new_task.priority,
            status: new_task.status,
            user_id: new_task.user_id,
            created_at: now,
            updated_at: now,
        }
    }
}

pub const DEFAULT_CATEGORY: &str = "general";

/// Task creation payload; the id and timestamps are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub summary: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl NewTask {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            category: default_category(),
            priority: TaskPriority::Medium,
            status: TaskStatus::Pending,
            user_id: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.summary.trim().is_empty() {
            return Err(Error::InvalidTaskField("summary must not be empty".to_string()));
        }
        if self.category.trim().is_empty() {
            return Err(Error::InvalidTaskField("category must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.category.is_none()
            && self.priority.is_none()
            && self.status.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(&self.summary, Some(s) if s.trim().is_empty()) {
            return Err(Error::InvalidTaskField("summary must not be empty".to_string()));
        }
        if matches!(&self.category, Some(c) if c.trim().is_empty()) {
            return Err(Error::InvalidTaskField("category must not be empty".to_string()));
        }
        Ok(())
    }

    /// Apply the patch in place and bump `updated_at`
    pub fn apply_to(&self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(summary) = &self.summary {
            task.summary = summary.clone();
        }
        if let Some(category) = &self.category {
            task.category = category.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        task.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        let user_ok = match &self.user_id {
            Some(user) => task.user_id.as_deref() == Some(user.as_str()),
            None => true,
        };
        let status_ok = self.status.map_or(true, |s| task.status == s);
        user_ok && status_ok
    }
}
