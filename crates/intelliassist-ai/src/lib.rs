pub mod chain;
pub mod error;
pub mod groq;
pub mod heuristics;
pub mod huggingface;
pub mod local;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod responder;

pub use chain::{AttemptRecord, AttemptResult, ChainOutcome, DynProvider, FallbackChain};
pub use error::{ProviderError, Result};
pub use groq::{GroqChat, GroqConfig, GroqTranscriber};
pub use huggingface::{HuggingFaceCaptioner, HuggingFaceConfig, HuggingFaceTranscriber};
pub use local::{LocalCaptioner, LocalCommandConfig, LocalTranscriber};
pub use metrics::{
    CallMetric, CallOutcome, Clock, HealthStatus, ManualClock, MetricRecorder, MetricSample,
    MetricsConfig, MetricsDashboard, MetricsExport, ProviderHealth, RateCheck, RateWarning, RateWindow,
    SystemClock,
};
pub use pipeline::{MediaKind, MediaPipeline, MediaResult, MediaStatus, PipelineConfig};
pub use provider::{
    AudioInput, Caption, ChatRequest, Completion, ImageInput, Outcome, Provider, ProviderInput,
    ProviderOutput, Transcription,
};
pub use responder::{ChatHealth, ChatHealthStatus, GeneratedResponse, ResponseGenerator, ResponseStatus};
