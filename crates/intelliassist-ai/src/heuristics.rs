//! Filename and caption heuristics used when describing media.

use intelliassist_core::{TaskCandidate, TaskCategory, TaskPriority};
use serde::Serialize;
use std::path::Path;

/// Lower-cased extension without the dot.
pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn audio_content_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("mp3") | Some("mpeg") | Some("mpga") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a") | Some("mp4") => "audio/mp4",
        _ => "audio/wav",
    }
}

pub fn image_content_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

/// Alphanumeric tokens of the file stem, lower-cased.
fn name_tokens(filename: &str) -> Vec<String> {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    stem.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn mentions(tokens: &[String], words: &[&str]) -> bool {
    tokens
        .iter()
        .any(|token| words.iter().any(|word| token.starts_with(word)))
}

fn candidate(
    title: &str,
    description: String,
    priority: TaskPriority,
    category: TaskCategory,
) -> TaskCandidate {
    TaskCandidate {
        title: title.to_string(),
        description,
        priority,
        category,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioKind {
    MeetingRecording,
    VoiceNote,
    Interview,
    Presentation,
    General,
}

impl AudioKind {
    pub fn from_filename(filename: &str) -> Self {
        let tokens = name_tokens(filename);
        if mentions(&tokens, &["meeting", "conference", "call", "standup", "sync"]) {
            AudioKind::MeetingRecording
        } else if mentions(&tokens, &["note", "memo", "reminder", "voice"]) {
            AudioKind::VoiceNote
        } else if mentions(&tokens, &["interview", "conversation", "discussion"]) {
            AudioKind::Interview
        } else if mentions(&tokens, &["presentation", "speech", "talk", "lecture", "reading"]) {
            AudioKind::Presentation
        } else {
            AudioKind::General
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AudioKind::MeetingRecording => "meeting recording",
            AudioKind::VoiceNote => "voice note",
            AudioKind::Interview => "interview/conversation",
            AudioKind::Presentation => "presentation/speech",
            AudioKind::General => "general audio",
        }
    }

    pub fn follow_up(&self, filename: &str) -> TaskCandidate {
        match self {
            AudioKind::MeetingRecording => candidate(
                "Review meeting recording",
                format!("Listen to {} and capture decisions and action items", filename),
                TaskPriority::High,
                TaskCategory::Meetings,
            ),
            AudioKind::VoiceNote => candidate(
                "Review voice note",
                format!("Listen to {} and note any reminders", filename),
                TaskPriority::Medium,
                TaskCategory::Planning,
            ),
            AudioKind::Interview => candidate(
                "Summarize conversation",
                format!("Listen to {} and summarize the key points", filename),
                TaskPriority::Medium,
                TaskCategory::Communication,
            ),
            AudioKind::Presentation => candidate(
                "Review presentation audio",
                format!("Listen to {} and write down the main takeaways", filename),
                TaskPriority::Medium,
                TaskCategory::Research,
            ),
            AudioKind::General => candidate(
                "Review audio file",
                format!("Listen to {} and decide on next steps", filename),
                TaskPriority::Low,
                TaskCategory::General,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Screenshot,
    Diagram,
    ScannedDocument,
    Design,
    Photograph,
    General,
}

impl ImageKind {
    pub fn from_filename(filename: &str) -> Self {
        let tokens = name_tokens(filename);
        if mentions(&tokens, &["screenshot", "screen", "capture"]) {
            ImageKind::Screenshot
        } else if mentions(&tokens, &["diagram", "chart", "graph", "flowchart"]) {
            ImageKind::Diagram
        } else if mentions(&tokens, &["document", "scan", "pdf", "receipt", "invoice"]) {
            ImageKind::ScannedDocument
        } else if tokens.iter().any(|t| t == "ui" || t == "ux")
            || mentions(&tokens, &["mockup", "wireframe", "design"])
        {
            ImageKind::Design
        } else if mentions(&tokens, &["photo", "picture", "img", "dsc"]) {
            ImageKind::Photograph
        } else {
            ImageKind::General
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ImageKind::Screenshot => "screenshot",
            ImageKind::Diagram => "diagram/chart",
            ImageKind::ScannedDocument => "scanned document",
            ImageKind::Design => "UI/design",
            ImageKind::Photograph => "photograph",
            ImageKind::General => "general image",
        }
    }

    pub fn follow_up(&self, filename: &str) -> TaskCandidate {
        match self {
            ImageKind::Screenshot => candidate(
                "Review screenshot content",
                format!("Analyze and extract information from {}", filename),
                TaskPriority::Medium,
                TaskCategory::General,
            ),
            ImageKind::Diagram => candidate(
                "Analyze diagram/chart",
                format!("Extract insights and action items from {}", filename),
                TaskPriority::High,
                TaskCategory::Research,
            ),
            ImageKind::ScannedDocument => candidate(
                "Process scanned document",
                format!("Review and extract information from {}", filename),
                TaskPriority::High,
                TaskCategory::General,
            ),
            ImageKind::Design => candidate(
                "Review UI/design",
                format!("Analyze design and plan implementation for {}", filename),
                TaskPriority::Medium,
                TaskCategory::Development,
            ),
            ImageKind::Photograph | ImageKind::General => candidate(
                "Review image",
                format!("Process and organize {}", filename),
                TaskPriority::Low,
                TaskCategory::General,
            ),
        }
    }
}

const MEETING_WORDS: &[&str] = &[
    "meeting",
    "presentation",
    "slide",
    "whiteboard",
    "projector",
    "conference",
    "discussion",
];
const PLANNING_WORDS: &[&str] = &[
    "calendar", "schedule", "plan", "timeline", "chart", "graph", "diagram", "list", "notes",
];
const DOCUMENT_WORDS: &[&str] = &["document", "paper", "text", "book", "report", "form", "contract"];
const CHART_WORDS: &[&str] = &["data", "statistics", "numbers", "percentage", "bar", "pie"];

/// Narrows the requested context using what the caption describes.
pub fn image_context(caption: &str, requested: &str) -> String {
    let caption = caption.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| caption.contains(w));

    let context = if has(MEETING_WORDS) {
        "meeting"
    } else if has(PLANNING_WORDS) {
        "planning"
    } else if has(DOCUMENT_WORDS) {
        "document"
    } else if has(CHART_WORDS) {
        "chart"
    } else if requested.trim().is_empty() {
        "general"
    } else {
        requested.trim()
    };
    context.to_string()
}
