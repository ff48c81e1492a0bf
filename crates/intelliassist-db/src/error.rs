use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Storage backends in probe priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Supabase,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Supabase => "supabase",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{backend} backend failed during {operation}: {message}")]
    Backend {
        backend: BackendKind,
        operation: &'static str,
        message: String,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task id for this backend: {0}")]
    InvalidTaskId(String),

    #[error("Invalid task: {0}")]
    InvalidTask(#[from] intelliassist_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn backend(
        backend: BackendKind,
        operation: &'static str,
        message: impl fmt::Display,
    ) -> Self {
        Error::Backend {
            backend,
            operation,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
