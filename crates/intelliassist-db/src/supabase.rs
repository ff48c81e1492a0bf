//! Supabase backend over the PostgREST API.

use async_trait::async_trait;
use chrono::Utc;
use intelliassist_core::{ChatMessage, NewChatMessage, NewTask, Task, TaskFilter, TaskId, TaskPatch};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::models::{SupabaseChatRow, SupabaseTaskRow};
use crate::store::TaskStore;
use crate::{BackendKind, Error, Result};

const TASKS: &str = "tasks";
const CHAT_HISTORY: &str = "chat_history";
const PLACEHOLDER_MARKERS: &[&str] = &["your-project", "your_project", "your-anon-key", "your_supabase"];

fn api_error(operation: &'static str) -> impl FnOnce(reqwest::Error) -> Error {
    move |e| Error::backend(BackendKind::Supabase, operation, e)
}

#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    rest_url: String,
    anon_key: String,
}

impl SupabaseStore {
    /// Rejects empty or template credentials without touching the network.
    pub fn new(url: &str, anon_key: &str, timeout: Duration) -> Result<Self> {
        let url = url.trim().trim_end_matches('/');
        let anon_key = anon_key.trim();
        let looks_placeholder = |value: &str| {
            let lower = value.to_lowercase();
            PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
        };
        if url.is_empty() || anon_key.is_empty() || looks_placeholder(url) || looks_placeholder(anon_key) {
            return Err(Error::backend(
                BackendKind::Supabase,
                "connect",
                "missing or placeholder credentials",
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(api_error("connect"))?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", url),
            anon_key: anon_key.to_string(),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
    ) -> Result<T> {
        let response = request.send().await.map_err(api_error(operation))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(
                BackendKind::Supabase,
                operation,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }
        response.json::<T>().await.map_err(api_error(operation))
    }

    fn task_filters(filter: &TaskFilter) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(user_id) = &filter.user_id {
            query.push(("user_id", format!("eq.{}", user_id)));
        }
        if let Some(status) = filter.status {
            query.push(("status", format!("eq.{}", status.as_str())));
        }
        query
    }

    fn patch_body(patch: &TaskPatch) -> Value {
        let mut body = Map::new();
        if let Some(summary) = &patch.summary {
            body.insert("summary".into(), json!(summary));
        }
        if let Some(category) = &patch.category {
            body.insert("category".into(), json!(category));
        }
        if let Some(priority) = patch.priority {
            body.insert("priority".into(), json!(priority.as_str()));
        }
        if let Some(status) = patch.status {
            body.insert("status".into(), json!(status.as_str()));
        }
        body.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));
        Value::Object(body)
    }

    fn first_task(rows: Vec<SupabaseTaskRow>, id: &TaskId) -> Result<Task> {
        rows.into_iter()
            .next()
            .map(Task::from)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }
}

#[async_trait]
impl TaskStore for SupabaseStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Supabase
    }

    async fn probe(&self) -> Result<()> {
        let request = self
            .request(Method::GET, TASKS)
            .query(&[("select", "id"), ("limit", "1")]);
        let _: Vec<Value> = self.send(request, "probe").await?;
        Ok(())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        task.validate()?;
        let now = Utc::now().to_rfc3339();
        let request = self
            .request(Method::POST, TASKS)
            .header("Prefer", "return=representation")
            .json(&json!({
                "summary": task.summary,
                "category": task.category,
                "priority": task.priority.as_str(),
                "status": task.status.as_str(),
                "user_id": task.user_id,
                "created_at": now,
                "updated_at": now,
            }));
        let rows: Vec<SupabaseTaskRow> = self.send(request, "create_task").await?;
        rows.into_iter()
            .next()
            .map(Task::from)
            .ok_or_else(|| Error::backend(BackendKind::Supabase, "create_task", "no row returned"))
    }

    async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let request = self
            .request(Method::GET, TASKS)
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .query(&Self::task_filters(filter));
        let rows: Vec<SupabaseTaskRow> = self.send(request, "get_tasks").await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        patch.validate()?;
        let request = self
            .request(Method::PATCH, TASKS)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))])
            .json(&Self::patch_body(patch));
        let rows: Vec<SupabaseTaskRow> = self.send(request, "update_task").await?;
        Self::first_task(rows, id)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        let request = self
            .request(Method::DELETE, TASKS)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{}", id))]);
        let rows: Vec<SupabaseTaskRow> = self.send(request, "delete_task").await?;
        Self::first_task(rows, id).map(|_| ())
    }

    async fn clear_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        // PostgREST refuses unfiltered deletes
        let request = self
            .request(Method::DELETE, TASKS)
            .header("Prefer", "return=representation")
            .query(&[("id", "not.is.null")])
            .query(&Self::task_filters(filter));
        let rows: Vec<Value> = self.send(request, "clear_tasks").await?;
        Ok(rows.len() as u64)
    }

    async fn save_chat_message(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let request = self
            .request(Method::POST, CHAT_HISTORY)
            .header("Prefer", "return=representation")
            .json(&json!({
                "user_id": message.user_id,
                "message": message.message,
                "response": message.response,
                "model": message.model,
                "response_time_ms": message.response_time_ms,
                "tokens_used": message.tokens_used,
                "context": message.context,
                "created_at": Utc::now().to_rfc3339(),
            }));
        let rows: Vec<SupabaseChatRow> = self.send(request, "save_chat_message").await?;
        rows.into_iter().next().map(ChatMessage::from).ok_or_else(|| {
            Error::backend(BackendKind::Supabase, "save_chat_message", "no row returned")
        })
    }

    async fn get_chat_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut request = self
            .request(Method::GET, CHAT_HISTORY)
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .query(&[("limit", limit.to_string())]);
        if let Some(user_id) = user_id {
            request = request.query(&[("user_id", format!("eq.{}", user_id))]);
        }
        let rows: Vec<SupabaseChatRow> = self.send(request, "get_chat_history").await?;
        let mut messages: Vec<ChatMessage> = rows.into_iter().map(ChatMessage::from).collect();
        messages.reverse();
        Ok(messages)
    }

    async fn clear_chat_history(&self, user_id: Option<&str>) -> Result<u64> {
        let filter = match user_id {
            Some(user_id) => ("user_id", format!("eq.{}", user_id)),
            None => ("id", "not.is.null".to_string()),
        };
        let request = self
            .request(Method::DELETE, CHAT_HISTORY)
            .header("Prefer", "return=representation")
            .query(&[filter]);
        let rows: Vec<Value> = self.send(request, "clear_chat_history").await?;
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelliassist_core::{TaskPriority, TaskStatus};
    use mockito::Matcher;

    fn store(server: &mockito::ServerGuard) -> SupabaseStore {
        SupabaseStore::new(&server.url(), "anon-key", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_placeholder_credentials_are_rejected() {
        let timeout = Duration::from_secs(1);
        assert!(SupabaseStore::new("https://your-project-id.supabase.co", "key", timeout).is_err());
        assert!(SupabaseStore::new("https://abc.supabase.co", "your-anon-key", timeout).is_err());
        assert!(SupabaseStore::new("", "key", timeout).is_err());
        assert!(SupabaseStore::new("https://abc.supabase.co", "real-key", timeout).is_ok());
    }

    #[tokio::test]
    async fn test_create_task_translates_columns() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/tasks")
            .match_header("apikey", "anon-key")
            .match_header("prefer", "return=representation")
            .match_body(Matcher::PartialJson(json!({"summary": "Call dentist", "priority": "high"})))
            .with_status(201)
            .with_body(
                r#"[{"id": 12, "title": "Call dentist", "category": "communication",
                     "priority": "high", "status": "pending", "user_id": "u1",
                     "created_at": "2024-05-01T09:00:00+00:00"}]"#,
            )
            .create_async()
            .await;

        let task = store(&server)
            .create_task(
                NewTask::new("Call dentist")
                    .with_priority(TaskPriority::High)
                    .with_user("u1"),
            )
            .await
            .unwrap();
        assert_eq!(task.id, TaskId::Int(12));
        assert_eq!(task.summary, "Call dentist");
        assert_eq!(task.category, "communication");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_tasks_sends_filters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/tasks")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("user_id".into(), "eq.u1".into()),
                Matcher::UrlEncoded("status".into(), "eq.completed".into()),
                Matcher::UrlEncoded("order".into(), "created_at.desc".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"id": 1, "summary": "Done thing", "status": "completed", "created_at": 1714554000}]"#)
            .create_async()
            .await;

        let tasks = store(&server)
            .get_tasks(&TaskFilter::for_user("u1").with_status(TaskStatus::Completed))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_missing_task() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/rest/v1/tasks")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.99".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let result = store(&server)
            .update_task(&TaskId::Int(99), &TaskPatch::status(TaskStatus::Completed))
            .await;
        assert!(matches!(result, Err(Error::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_http_failure_names_backend_and_operation() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/rest/v1/tasks")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        match store(&server).clear_tasks(&TaskFilter::default()).await {
            Err(Error::Backend {
                backend, operation, ..
            }) => {
                assert_eq!(backend, BackendKind::Supabase);
                assert_eq!(operation, "clear_tasks");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_history_is_chronological() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/chat_history")
            .match_query(Matcher::UrlEncoded("limit".into(), "2".into()))
            .with_status(200)
            .with_body(
                r#"[{"id": 2, "message": "second", "response": "b", "created_at": "2024-05-01T09:01:00+00:00"},
                    {"id": 1, "message": "first", "response": "a", "created_at": "2024-05-01T09:00:00+00:00"}]"#,
            )
            .create_async()
            .await;

        let history = store(&server).get_chat_history(None, 2).await.unwrap();
        let messages: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_probe_requires_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/tasks")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;
        assert!(store(&server).probe().await.is_err());
    }
}
