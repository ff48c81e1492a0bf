use async_trait::async_trait;
use intelliassist_core::{ChatMessage, NewChatMessage, NewTask, Task, TaskFilter, TaskId, TaskPatch};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;

use crate::models::{ChatRecord, TaskRecord};
use crate::store::TaskStore;
use crate::{BackendKind, Error, Result};

const TASK_COLUMNS: &str = "id, summary, category, priority, status, user_id, created_at, updated_at";
const CHAT_COLUMNS: &str =
    "id, user_id, message, response, model, response_time_ms, tokens_used, context, created_at";

fn db_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::backend(BackendKind::Postgres, operation, e)
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create new database connection
    pub async fn connect(database_url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .map_err(db_error("connect"))?;

        Ok(Self { pool })
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id BIGSERIAL PRIMARY KEY,
                summary TEXT NOT NULL,
                category VARCHAR(50) NOT NULL DEFAULT 'general',
                priority VARCHAR(20) NOT NULL DEFAULT 'medium',
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                user_id VARCHAR(255),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("init_schema"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                id BIGSERIAL PRIMARY KEY,
                user_id VARCHAR(255),
                message TEXT NOT NULL,
                response TEXT NOT NULL,
                model VARCHAR(100),
                response_time_ms BIGINT NOT NULL DEFAULT 0,
                tokens_used BIGINT NOT NULL DEFAULT 0,
                context TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("init_schema"))?;

        // Create indexes
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_chat_history_user_id ON chat_history(user_id, created_at DESC)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error("init_schema"))?;
        }

        Ok(())
    }

    fn int_id(id: &TaskId) -> Result<i64> {
        id.as_int()
            .ok_or_else(|| Error::InvalidTaskId(id.to_string()))
    }
}

#[async_trait]
impl TaskStore for PostgresStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn probe(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("probe"))?;
        Ok(())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task> {
        task.validate()?;
        let record = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            INSERT INTO tasks (summary, category, priority, status, user_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(&task.summary)
        .bind(&task.category)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(&task.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("create_task"))?;

        Ok(record.into())
    }

    async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let records = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            SELECT {} FROM tasks
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            "#,
            TASK_COLUMNS
        ))
        .bind(&filter.user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("get_tasks"))?;

        Ok(records.into_iter().map(Task::from).collect())
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        patch.validate()?;
        let record = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            UPDATE tasks SET
                summary = COALESCE($2, summary),
                category = COALESCE($3, category),
                priority = COALESCE($4, priority),
                status = COALESCE($5, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(Self::int_id(id)?)
        .bind(&patch.summary)
        .bind(&patch.category)
        .bind(patch.priority.map(|p| p.as_str()))
        .bind(patch.status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("update_task"))?;

        record
            .map(Task::from)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(Self::int_id(id)?)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete_task"))?;

        if result.rows_affected() == 0 {
            return Err(Error::TaskNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn clear_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            "#,
        )
        .bind(&filter.user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await
        .map_err(db_error("clear_tasks"))?;

        Ok(result.rows_affected())
    }

    async fn save_chat_message(&self, message: NewChatMessage) -> Result<ChatMessage> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!(
            r#"
            INSERT INTO chat_history (user_id, message, response, model, response_time_ms, tokens_used, context)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            CHAT_COLUMNS
        ))
        .bind(&message.user_id)
        .bind(&message.message)
        .bind(&message.response)
        .bind(&message.model)
        .bind(message.response_time_ms)
        .bind(message.tokens_used)
        .bind(&message.context)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("save_chat_message"))?;

        Ok(record.into())
    }

    async fn get_chat_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<ChatMessage>> {
        let records = sqlx::query_as::<_, ChatRecord>(&format!(
            r#"
            SELECT * FROM (
                SELECT {} FROM chat_history
                WHERE ($1::TEXT IS NULL OR user_id = $1)
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, id ASC
            "#,
            CHAT_COLUMNS
        ))
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("get_chat_history"))?;

        Ok(records.into_iter().map(ChatMessage::from).collect())
    }

    async fn clear_chat_history(&self, user_id: Option<&str>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chat_history WHERE ($1::TEXT IS NULL OR user_id = $1)")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("clear_chat_history"))?;

        Ok(result.rows_affected())
    }
}
