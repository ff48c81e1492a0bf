pub mod error;
pub mod service;
pub mod settings;
pub mod telemetry;

// Re-exports
pub use error::{Error, Result};
pub use service::{AnalyzedMedia, AssistantService, ChatReply, MultimodalReply, ServiceDashboard};
pub use settings::{
    ExtractionSettings, LoggingSettings, MetricsSettings, PipelineSettings, ProviderSettings,
    Settings, StorageSettings,
};
pub use telemetry::init_tracing;
