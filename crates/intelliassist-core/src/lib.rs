pub mod task;
pub mod chat;
pub mod rules;
pub mod extractor;
pub mod suggestions;
pub mod error;

// Re-exports
pub use task::{
    NewTask, RecordId, Task, TaskFilter, TaskId, TaskPatch, TaskPriority, TaskStatus,
    DEFAULT_CATEGORY,
};
pub use chat::{ChatMessage, NewChatMessage};
pub use rules::{CategoryRule, ExtractionRules, PatternRule, PatternScope, TaskCategory};
pub use extractor::{TaskCandidate, TaskExtractor};
pub use suggestions::{Suggestion, SuggestionExtractor, SuggestionRules};
pub use error::{Error, Result};
