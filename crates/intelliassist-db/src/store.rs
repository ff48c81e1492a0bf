use async_trait::async_trait;
use intelliassist_core::{ChatMessage, NewChatMessage, NewTask, Task, TaskFilter, TaskId, TaskPatch};

use crate::{BackendKind, Result};

/// Uniform task and chat-history contract every backend satisfies.
///
/// Tasks are listed newest first. Chat history returns the most recent
/// `limit` messages in chronological order.
#[async_trait]
pub trait TaskStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Lightweight connectivity check
    async fn probe(&self) -> Result<()>;

    async fn create_task(&self, task: NewTask) -> Result<Task>;

    async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task>;

    async fn delete_task(&self, id: &TaskId) -> Result<()>;

    /// Returns the number of removed tasks
    async fn clear_tasks(&self, filter: &TaskFilter) -> Result<u64>;

    async fn save_chat_message(&self, message: NewChatMessage) -> Result<ChatMessage>;

    async fn get_chat_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<ChatMessage>>;

    async fn clear_chat_history(&self, user_id: Option<&str>) -> Result<u64>;
}
