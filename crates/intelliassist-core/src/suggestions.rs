//! Structured suggestions from sectioned model analysis.
//!
//! Analysis prompts ask for headed sections ("ACTIONABLE TASKS:",
//! "NEXT STEPS:" ...). Each list item under a section becomes a
//! [`Suggestion`] tagged with that section's name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extractor::compile;
use crate::{Error, Result, TaskPriority};

pub const GENERAL_SECTION: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionRules {
    /// Upper-case markers that turn a line into a section header
    pub section_markers: Vec<String>,
    /// Each pattern exposes the item text as its first capture group
    pub item_patterns: Vec<String>,
    /// Items must be longer than this many characters
    pub min_chars: usize,
    pub high_priority_keywords: Vec<String>,
    pub low_priority_keywords: Vec<String>,
    pub actionable_keywords: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SuggestionRules {
    fn default() -> Self {
        Self {
            section_markers: strings(&[
                "CONTENT ANALYSIS",
                "ACTIONABLE TASKS",
                "PRIORITIES",
                "NEXT STEPS",
                "ORGANIZATION",
                "DATA INSIGHTS",
                "DECISION POINTS",
                "MONITORING TASKS",
                "VISUAL CONTENT",
                "WORK-RELATED ELEMENTS",
                "ACTIONABLE INSIGHTS",
            ]),
            item_patterns: strings(&[
                r"^\d+\.\s*(.+)",
                r"^[-*•]\s*(.+)",
                r"^(?:suggestion|recommendation|action)(?:\s*\d+)?[:\s]+(.+)",
            ]),
            min_chars: 15,
            high_priority_keywords: strings(&["urgent", "immediately", "asap", "critical"]),
            low_priority_keywords: strings(&["consider", "eventually", "when possible"]),
            actionable_keywords: strings(&["create", "schedule", "review", "update", "contact", "organize"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    /// Lower-cased header of the enclosing section, or `general`
    pub section: String,
    pub priority: TaskPriority,
    pub actionable: bool,
}

static BUILTIN: Lazy<Result<SuggestionExtractor>> =
    Lazy::new(|| SuggestionExtractor::new(SuggestionRules::default()));

#[derive(Debug, Clone)]
pub struct SuggestionExtractor {
    rules: SuggestionRules,
    items: Vec<Regex>,
}

impl SuggestionExtractor {
    pub fn builtin() -> Result<Self> {
        BUILTIN
            .as_ref()
            .map(Clone::clone)
            .map_err(|e| Error::InvalidRules(format!("built-in suggestion rules: {}", e)))
    }

    pub fn new(mut rules: SuggestionRules) -> Result<Self> {
        if rules.item_patterns.is_empty() {
            return Err(Error::InvalidRules("no suggestion item patterns".to_string()));
        }
        let items = rules
            .item_patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;
        for keywords in [
            &mut rules.high_priority_keywords,
            &mut rules.low_priority_keywords,
            &mut rules.actionable_keywords,
        ] {
            keywords.iter_mut().for_each(|k| *k = k.to_lowercase());
        }
        rules
            .section_markers
            .iter_mut()
            .for_each(|m| *m = m.to_uppercase());
        Ok(Self { rules, items })
    }

    pub fn rules(&self) -> &SuggestionRules {
        &self.rules
    }

    pub fn extract(&self, text: &str) -> Vec<Suggestion> {
        let mut section = GENERAL_SECTION.to_string();
        let mut suggestions = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if self.is_header(line) {
                section = section_name(line);
                continue;
            }

            let item = self
                .items
                .iter()
                .find_map(|regex| regex.captures(line)?.get(1))
                .map(|m| m.as_str().trim());
            let Some(item) = item else { continue };
            if item.chars().count() <= self.rules.min_chars {
                continue;
            }

            let lower = item.to_lowercase();
            suggestions.push(Suggestion {
                text: item.to_string(),
                section: section.clone(),
                priority: self.priority(&lower),
                actionable: contains_any(&lower, &self.rules.actionable_keywords),
            });
        }

        suggestions
    }

    fn is_header(&self, line: &str) -> bool {
        let upper = line.to_uppercase();
        self.rules
            .section_markers
            .iter()
            .any(|marker| upper.contains(marker.as_str()))
    }

    fn priority(&self, lower: &str) -> TaskPriority {
        if contains_any(lower, &self.rules.high_priority_keywords) {
            TaskPriority::High
        } else if contains_any(lower, &self.rules.low_priority_keywords) {
            TaskPriority::Low
        } else {
            TaskPriority::Medium
        }
    }
}

fn contains_any(lower: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| !k.is_empty() && lower.contains(k.as_str()))
}

/// `"**NEXT STEPS:**"` becomes `"next steps"`.
fn section_name(line: &str) -> String {
    line.replace(':', "")
        .trim_matches(|c: char| c == '#' || c == '*' || c.is_whitespace())
        .to_lowercase()
}
