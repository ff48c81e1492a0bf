//! The assistant service: one value built at startup that owns the metric
//! recorder, the provider chains, the extractor and the storage selector.

use intelliassist_ai::{
    AudioInput, Caption, ChatHealth, ChatRequest, Completion, FallbackChain, GeneratedResponse, GroqChat,
    GroqTranscriber, HuggingFaceCaptioner, HuggingFaceTranscriber, ImageInput, LocalCaptioner,
    LocalTranscriber, MediaPipeline, MediaResult, MetricRecorder, MetricsDashboard,
    ResponseGenerator, ResponseStatus, Transcription,
};
use intelliassist_core::{
    ChatMessage, ExtractionRules, NewChatMessage, NewTask, Suggestion, SuggestionExtractor, Task,
    TaskCandidate, TaskExtractor, TaskFilter, TaskId, TaskPatch,
};
use intelliassist_db::{BackendState, StorageHealth, StorageSelector};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::settings::Settings;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: GeneratedResponse,
    pub suggestions: Vec<Suggestion>,
    pub history_saved: bool,
}

/// Media result plus the assistant's task analysis of its content.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedMedia {
    pub media: MediaResult,
    pub analysis: Option<GeneratedResponse>,
    /// Tasks from the media output merged with tasks from the analysis
    pub tasks: Vec<TaskCandidate>,
    /// Sectioned items from the analysis text
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultimodalReply {
    pub audio: Option<MediaResult>,
    pub image: Option<MediaResult>,
    pub response: GeneratedResponse,
    pub tasks: Vec<TaskCandidate>,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDashboard {
    pub metrics: MetricsDashboard,
    pub storage: BackendState,
    pub chat_providers: Vec<String>,
    pub audio_providers: Vec<String>,
    pub image_providers: Vec<String>,
}

pub struct AssistantService {
    metrics: Arc<MetricRecorder>,
    extractor: Arc<TaskExtractor>,
    suggestions: SuggestionExtractor,
    pipeline: MediaPipeline,
    responder: ResponseGenerator,
    storage: StorageSelector,
    recent_minutes: i64,
}

impl AssistantService {
    pub fn new(
        metrics: Arc<MetricRecorder>,
        extractor: Arc<TaskExtractor>,
        suggestions: SuggestionExtractor,
        pipeline: MediaPipeline,
        responder: ResponseGenerator,
        storage: StorageSelector,
    ) -> Self {
        Self {
            metrics,
            extractor,
            suggestions,
            pipeline,
            responder,
            storage,
            recent_minutes: 60,
        }
    }

    /// Build every component from settings. Only configured providers join
    /// their chains; storage is selected lazily on first use.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let metrics = Arc::new(MetricRecorder::new(settings.metrics.to_config()));

        let rules = match &settings.extraction.rules_path {
            Some(path) => {
                info!(path = %path.display(), "Loading extraction rules");
                ExtractionRules::load(path)?
            }
            None => ExtractionRules::default(),
        };
        let extractor = Arc::new(TaskExtractor::new(rules)?);
        let suggestions = SuggestionExtractor::builtin()?;

        let timeout = settings.pipeline.attempt_timeout();
        let providers = &settings.providers;

        let mut chat: FallbackChain<ChatRequest, Completion> =
            FallbackChain::new("chat", metrics.clone(), timeout);
        let mut audio: FallbackChain<AudioInput, Transcription> =
            FallbackChain::new("audio", metrics.clone(), timeout);
        let mut image: FallbackChain<ImageInput, Caption> =
            FallbackChain::new("image", metrics.clone(), timeout);

        if providers.groq.is_configured() {
            chat.push(Arc::new(GroqChat::new(&providers.groq)));
            audio.push(Arc::new(GroqTranscriber::new(&providers.groq)));
        } else {
            warn!("GROQ_API_KEY not set, chat runs in placeholder mode");
        }
        if providers.huggingface.is_configured() {
            audio.push(Arc::new(HuggingFaceTranscriber::new(&providers.huggingface)));
            image.push(Arc::new(HuggingFaceCaptioner::new(&providers.huggingface)));
        }
        if let Some(local) = &providers.local_transcription {
            audio.push(Arc::new(LocalTranscriber::new(local.clone())));
        }
        if let Some(local) = &providers.local_captioning {
            image.push(Arc::new(LocalCaptioner::new(local.clone())));
        }

        info!(
            chat = ?chat.provider_names(),
            audio = ?audio.provider_names(),
            image = ?image.provider_names(),
            "Provider chains ready"
        );

        let pipeline = MediaPipeline::new(audio, image, extractor.clone(), settings.pipeline.to_config());
        let responder = ResponseGenerator::new(chat, extractor.clone());
        let storage = StorageSelector::from_config(&settings.storage.to_config());

        let mut service = Self::new(metrics, extractor, suggestions, pipeline, responder, storage);
        service.recent_minutes = settings.metrics.dashboard_recent_minutes;
        Ok(service)
    }

    pub fn metrics(&self) -> &Arc<MetricRecorder> {
        &self.metrics
    }

    pub fn extractor(&self) -> &TaskExtractor {
        &self.extractor
    }

    /// Select the storage backend now instead of on the first storage call.
    pub async fn initialize_storage(&self) -> &BackendState {
        self.storage.initialize().await
    }

    /// Chat reply with extracted tasks. History persistence failures are
    /// logged and reported through `history_saved`, never as an error.
    #[instrument(skip(self, message, context))]
    pub async fn chat(&self, message: &str, user_id: Option<&str>, context: Option<&str>) -> ChatReply {
        let response = self.responder.generate(message, context).await;
        let suggestions = self.suggestions_from(&response);

        if message.trim().is_empty() {
            return ChatReply {
                response,
                suggestions,
                history_saved: false,
            };
        }

        let record = NewChatMessage::new(message, response.text.clone())
            .with_user(user_id.map(str::to_string))
            .with_model(response.provider.clone())
            .with_usage(response.latency_ms.round() as i64, response.tokens_used as i64)
            .with_context(context.map(str::to_string));

        let history_saved = match self.storage.save_chat_message(record).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Failed to save chat history");
                false
            }
        };

        ChatReply {
            response,
            suggestions,
            history_saved,
        }
    }

    pub async fn process_audio(&self, audio: AudioInput) -> AnalyzedMedia {
        let media = self.pipeline.transcribe(audio).await;
        let prompt = format!(
            "Analyze this audio transcription and list any action items, deadlines or \
             follow-ups as a numbered list.\n\nTranscription:\n{}",
            media.raw_output
        );
        self.analyze(media, &prompt).await
    }

    pub async fn process_image(&self, image: ImageInput, context: &str) -> AnalyzedMedia {
        let media = self.pipeline.caption(image, context).await;
        let prompt = format!(
            "An image was described as: \"{}\" (context: {}). List any tasks or follow-ups \
             it suggests as a numbered list.",
            media.raw_output, media.content_hint
        );
        self.analyze(media, &prompt).await
    }

    async fn analyze(&self, media: MediaResult, prompt: &str) -> AnalyzedMedia {
        if media.is_degraded() || !self.responder.is_configured() {
            let tasks = media.tasks.clone();
            return AnalyzedMedia {
                media,
                analysis: None,
                tasks,
                suggestions: Vec::new(),
            };
        }

        let analysis = self.responder.generate(prompt, None).await;
        let tasks = if analysis.status == ResponseStatus::Success {
            self.merge_tasks(&media.tasks, &analysis.tasks)
        } else {
            media.tasks.clone()
        };
        let suggestions = self.suggestions_from(&analysis);

        AnalyzedMedia {
            media,
            analysis: Some(analysis),
            tasks,
            suggestions,
        }
    }

    /// Media parts go through their pipelines; their output and the text are
    /// combined into a single prompt.
    #[instrument(skip_all, fields(has_audio = audio.is_some(), has_image = image.is_some()))]
    pub async fn process_multimodal(
        &self,
        text: Option<&str>,
        audio: Option<AudioInput>,
        image: Option<ImageInput>,
        context: &str,
    ) -> MultimodalReply {
        let audio = match audio {
            Some(audio) => Some(self.pipeline.transcribe(audio).await),
            None => None,
        };
        let image = match image {
            Some(image) => Some(self.pipeline.caption(image, context).await),
            None => None,
        };

        let mut parts = Vec::new();
        if let Some(result) = &audio {
            parts.push(format!("Audio transcription: {}", result.raw_output));
        }
        if let Some(result) = &image {
            parts.push(format!("Image description: {}", result.raw_output));
        }
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            parts.push(format!("User message: {}", text.trim()));
        }

        let response = self.responder.generate(&parts.join("\n\n"), None).await;

        let mut tasks = Vec::new();
        for result in audio.iter().chain(image.iter()) {
            tasks = self.merge_tasks(&tasks, &result.tasks);
        }
        tasks = self.merge_tasks(&tasks, &response.tasks);
        let suggestions = self.suggestions_from(&response);

        MultimodalReply {
            audio,
            image,
            response,
            tasks,
            suggestions,
        }
    }

    /// Placeholder and error replies carry no suggestions.
    fn suggestions_from(&self, response: &GeneratedResponse) -> Vec<Suggestion> {
        if response.status == ResponseStatus::Success {
            self.suggestions.extract(&response.text)
        } else {
            Vec::new()
        }
    }

    /// Case-insensitive dedup by title, capped like a single extraction.
    fn merge_tasks(&self, first: &[TaskCandidate], second: &[TaskCandidate]) -> Vec<TaskCandidate> {
        let cap = self.extractor.rules().max_candidates;
        let mut seen = HashSet::new();
        first
            .iter()
            .chain(second.iter())
            .filter(|candidate| seen.insert(candidate.title.to_lowercase()))
            .take(cap)
            .cloned()
            .collect()
    }

    /// Persist extracted candidates as tasks owned by `user_id`.
    pub async fn save_candidates(
        &self,
        candidates: Vec<TaskCandidate>,
        user_id: Option<&str>,
    ) -> Result<Vec<Task>> {
        let mut saved = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let task = candidate.into_new_task(user_id.map(str::to_string));
            saved.push(self.storage.create_task(task).await?);
        }
        info!(count = saved.len(), "Saved extracted tasks");
        Ok(saved)
    }

    pub async fn create_task(&self, task: NewTask) -> Result<Task> {
        Ok(self.storage.create_task(task).await?)
    }

    pub async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.storage.get_tasks(filter).await?)
    }

    pub async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        Ok(self.storage.update_task(id, patch).await?)
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<()> {
        Ok(self.storage.delete_task(id).await?)
    }

    pub async fn clear_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        Ok(self.storage.clear_tasks(filter).await?)
    }

    pub async fn chat_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<ChatMessage>> {
        Ok(self.storage.get_chat_history(user_id, limit).await?)
    }

    pub async fn clear_chat_history(&self, user_id: Option<&str>) -> Result<u64> {
        Ok(self.storage.clear_chat_history(user_id).await?)
    }

    pub async fn dashboard(&self) -> ServiceDashboard {
        let storage = self.storage.initialize().await.clone();
        ServiceDashboard {
            metrics: self.metrics.dashboard(self.recent_minutes),
            storage,
            chat_providers: self.responder.providers(),
            audio_providers: self.pipeline.audio_providers(),
            image_providers: self.pipeline.image_providers(),
        }
    }

    pub async fn storage_health(&self) -> StorageHealth {
        self.storage.health_check().await
    }

    pub async fn chat_health(&self) -> ChatHealth {
        self.responder.health_check().await
    }

    /// Write the metrics dashboard with the last day of calls to `path`.
    pub async fn export_metrics(&self, path: impl AsRef<Path>) -> Result<()> {
        Ok(self.metrics.export(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelliassist_core::{TaskCategory, TaskPriority};

    fn service() -> AssistantService {
        AssistantService::from_settings(&Settings::default()).unwrap()
    }

    fn candidate(title: &str) -> TaskCandidate {
        TaskCandidate {
            title: title.to_string(),
            description: title.to_string(),
            priority: TaskPriority::Medium,
            category: TaskCategory::General,
        }
    }

    #[test]
    fn test_unconfigured_service_has_empty_chains() {
        let service = service();
        assert!(service.responder.providers().is_empty());
        assert!(service.pipeline.audio_providers().is_empty());
        assert!(service.pipeline.image_providers().is_empty());
    }

    #[test]
    fn test_missing_rules_file_fails_construction() {
        let mut settings = Settings::default();
        settings.extraction.rules_path = Some("/nonexistent/rules.json".into());
        assert!(AssistantService::from_settings(&settings).is_err());
    }

    #[test]
    fn test_rules_file_replaces_builtin_rules() {
        let rules = ExtractionRules {
            max_candidates: 1,
            ..ExtractionRules::default()
        };
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&rules).unwrap()).unwrap();

        let mut settings = Settings::default();
        settings.extraction.rules_path = Some(file.path().to_path_buf());
        let service = AssistantService::from_settings(&settings).unwrap();

        let tasks = service.extractor().extract("1. Call dentist\n2. Finish report");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Call dentist");
    }

    #[test]
    fn test_merge_tasks_dedups_and_caps() {
        let service = service();
        let first = vec![candidate("Call dentist"), candidate("Finish report")];
        let second: Vec<TaskCandidate> = std::iter::once(candidate("call DENTIST"))
            .chain((0..20).map(|i| candidate(&format!("Task {}", i))))
            .collect();

        let merged = service.merge_tasks(&first, &second);
        assert_eq!(merged.len(), service.extractor().rules().max_candidates);
        assert_eq!(merged[0].title, "Call dentist");
        assert_eq!(merged[1].title, "Finish report");
        assert_eq!(merged[2].title, "Task 0");
    }

    #[tokio::test]
    async fn test_placeholder_chat_is_saved() {
        let service = service();
        let reply = service.chat("need to buy milk.", Some("u1"), None).await;
        assert_eq!(reply.response.status, ResponseStatus::Placeholder);
        assert!(reply.history_saved);

        let history = service.chat_history(Some("u1"), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "need to buy milk.");
    }

    #[tokio::test]
    async fn test_unconfigured_chat_health_and_metrics_export() {
        let service = service();
        assert_eq!(
            service.chat_health().await.status,
            intelliassist_ai::ChatHealthStatus::NotConfigured
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        service.export_metrics(&path).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["dashboard"]["total_calls"], 0);
    }

    #[tokio::test]
    async fn test_blank_chat_is_not_saved() {
        let service = service();
        let reply = service.chat("   ", None, None).await;
        assert!(!reply.history_saved);
        assert!(service.chat_history(None, 10).await.unwrap().is_empty());
    }
}
