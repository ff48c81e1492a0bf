use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid extraction pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid extraction rules: {0}")]
    InvalidRules(String),

    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    #[error("Invalid task field: {0}")]
    InvalidTaskField(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
