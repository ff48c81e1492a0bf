use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Extraction rules error: {0}")]
    Rules(#[from] intelliassist_core::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] intelliassist_ai::ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] intelliassist_db::Error),

    #[error("Logging initialisation failed: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
