use async_trait::async_trait;
use chrono::Utc;
use intelliassist_core::{
    ChatMessage, NewChatMessage, NewTask, RecordId, Task, TaskFilter, TaskId, TaskPatch,
};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::store::TaskStore;
use crate::{BackendKind, Error, Result};

/// In-process store. Always available; contents live as long as the process.
#[derive(Debug)]
pub struct MemoryStore {
    tasks: RwLock<Vec<Task>>,
    chats: RwLock<Vec<ChatMessage>>,
    next_task_id: AtomicI64,
    next_chat_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(Vec::new()),
            chats: RwLock::new(Vec::new()),
            next_task_id: AtomicI64::new(1),
            next_chat_id: AtomicI64::new(1),
        }
    }

    fn not_found(id: &TaskId) -> Error {
        Error::TaskNotFound(id.to_string())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        task.validate()?;
        let id = TaskId::Int(self.next_task_id.fetch_add(1, Ordering::SeqCst));
        let task = Task::from_new(id, task, Utc::now());
        self.tasks.write().await.push(task.clone());
        Ok(task)
    }

    async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.iter().rev().filter(|t| filter.matches(t)).cloned().collect())
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        patch.validate()?;
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        patch.apply_to(task, Utc::now());
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let index = tasks
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        tasks.remove(index);
        Ok(())
    }

    async fn clear_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|t| !filter.matches(t));
        Ok((before - tasks.len()) as u64)
    }

    async fn save_chat_message(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let id = RecordId::Int(self.next_chat_id.fetch_add(1, Ordering::SeqCst));
        let message = message.into_message(id, Utc::now());
        self.chats.write().await.push(message.clone());
        Ok(message)
    }

    async fn get_chat_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<ChatMessage>> {
        let chats = self.chats.read().await;
        let mut recent: Vec<ChatMessage> = chats
            .iter()
            .rev()
            .filter(|m| user_id.map_or(true, |u| m.user_id.as_deref() == Some(u)))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn clear_chat_history(&self, user_id: Option<&str>) -> Result<u64> {
        let mut chats = self.chats.write().await;
        let before = chats.len();
        chats.retain(|m| !user_id.map_or(true, |u| m.user_id.as_deref() == Some(u)));
        Ok((before - chats.len()) as u64)
    }
}
