//! Rule tables driving task extraction.
//!
//! The tables are plain data so they can be loaded from JSON, inspected and
//! tested without running the extractor. Patterns are matched
//! case-insensitively and must expose the task text through a named `task`
//! capture group.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::{Error, Result, TaskPriority};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Communication,
    Meetings,
    Research,
    Development,
    Planning,
    #[default]
    General,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Communication => "communication",
            TaskCategory::Meetings => "meetings",
            TaskCategory::Research => "research",
            TaskCategory::Development => "development",
            TaskCategory::Planning => "planning",
            TaskCategory::General => "general",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a pattern is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternScope {
    /// Whole line, before sentence splitting (list items, labels)
    Line,
    /// Each sentence of a line that no line pattern claimed
    Sentence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    pub pattern: String,
    pub scope: PatternScope,
    /// Used when keyword lookup yields `general`
    #[serde(default)]
    pub category_hint: Option<TaskCategory>,
    /// Used when keyword lookup yields `medium`
    #[serde(default)]
    pub priority_hint: Option<TaskPriority>,
}

impl PatternRule {
    fn new(name: &str, scope: PatternScope, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            scope,
            category_hint: None,
            priority_hint: None,
        }
    }

    fn with_category_hint(mut self, category: TaskCategory) -> Self {
        self.category_hint = Some(category);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: TaskCategory,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRules {
    /// Tried in order; the first match claims the line or sentence
    pub patterns: Vec<PatternRule>,
    pub high_priority_keywords: Vec<String>,
    pub low_priority_keywords: Vec<String>,
    /// First matching category wins
    pub categories: Vec<CategoryRule>,
    /// Gate for the single generic fallback candidate
    pub task_indicators: Vec<String>,
    /// Candidate texts dropped outright
    pub ignored_phrases: Vec<String>,
    pub min_candidate_chars: usize,
    pub max_title_chars: usize,
    pub max_description_chars: usize,
    pub max_candidates: usize,
    pub fallback_min_chars: usize,
    pub fallback_title_prefix: String,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for ExtractionRules {
    fn default() -> Self {
        use PatternScope::{Line, Sentence};

        let patterns = vec![
            PatternRule::new("numbered_item", Line, r"^\s*\(?\d{1,3}[.)]\s+(?P<task>.+)$"),
            PatternRule::new(
                "bullet_item",
                Line,
                r"^\s*[-*•+]\s+(?:\[[ x]?\]\s+)?(?P<task>.+)$",
            ),
            PatternRule::new(
                "labeled_item",
                Line,
                r"^\s*(?:task|todo|to-do|to do|action item|action|step)(?:\s*\d+)?\s*[:\-]\s*(?P<task>.+)$",
            ),
            PatternRule::new(
                "reminder",
                Sentence,
                r"\b(?:remember to|don't forget to|do not forget to|make sure to)\s+(?P<task>.+)",
            ),
            PatternRule::new(
                "obligation",
                Sentence,
                r"\b(?:need to|needs to|have to|has to|must|should|got to|plan to)\s+(?P<task>.+)",
            ),
            PatternRule::new(
                "follow_up",
                Sentence,
                r"\b(?P<task>follow[\s-]?up\s+(?:on|with)\s+.+)",
            )
            .with_category_hint(TaskCategory::Communication),
            PatternRule::new(
                "scheduling",
                Sentence,
                r"\b(?P<task>(?:schedule|set up|arrange|book)\s+.+)",
            )
            .with_category_hint(TaskCategory::Planning),
            PatternRule::new(
                "contact",
                Sentence,
                r"\b(?P<task>(?:call|email|e-mail|contact|phone)\s+.+)",
            )
            .with_category_hint(TaskCategory::Communication),
            PatternRule::new(
                "imperative",
                Sentence,
                r"^\s*(?P<task>(?:review|check|verify|confirm|create|build|develop|send|submit|deliver|update|finish|complete|prepare|buy|pay|write|fix|order|pick up)\s+.+)",
            ),
        ];

        Self {
            patterns,
            high_priority_keywords: words(&[
                "urgent",
                "asap",
                "critical",
                "important",
                "immediately",
            ]),
            low_priority_keywords: words(&["later", "eventually", "when possible", "someday"]),
            categories: vec![
                CategoryRule {
                    category: TaskCategory::Communication,
                    keywords: words(&[
                        "call", "email", "e-mail", "contact", "reply", "phone", "message",
                    ]),
                },
                CategoryRule {
                    category: TaskCategory::Meetings,
                    keywords: words(&[
                        "meeting",
                        "discuss",
                        "appointment",
                        "conference",
                        "standup",
                        "sync",
                    ]),
                },
                CategoryRule {
                    category: TaskCategory::Research,
                    keywords: words(&[
                        "research",
                        "analyze",
                        "analyse",
                        "study",
                        "learn",
                        "investigate",
                    ]),
                },
                CategoryRule {
                    category: TaskCategory::Development,
                    keywords: words(&[
                        "create",
                        "build",
                        "develop",
                        "design",
                        "implement",
                        "code",
                        "deploy",
                    ]),
                },
                CategoryRule {
                    category: TaskCategory::Planning,
                    keywords: words(&["plan", "organize", "organise", "schedule", "prepare"]),
                },
            ],
            task_indicators: words(&[
                "plan",
                "task",
                "todo",
                "step",
                "action",
                "schedule",
                "organize",
                "deadline",
                "project",
                "complete",
                "finish",
                "work on",
                "need to",
                "follow up",
                "review",
            ]),
            ignored_phrases: words(&["continue", "next", "done"]),
            min_candidate_chars: 4,
            max_title_chars: 100,
            max_description_chars: 200,
            max_candidates: 10,
            fallback_min_chars: 20,
            fallback_title_prefix: "Follow up".to_string(),
        }
    }
}

impl ExtractionRules {
    pub fn from_json(json: &str) -> Result<Self> {
        let rules: Self = serde_json::from_str(json)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Load a rule table from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidRules(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.patterns.is_empty() {
            return Err(Error::InvalidRules("at least one pattern is required".to_string()));
        }
        if self.max_candidates == 0 {
            return Err(Error::InvalidRules("max_candidates must be positive".to_string()));
        }
        if self.max_title_chars < self.min_candidate_chars {
            return Err(Error::InvalidRules(
                "max_title_chars must not be smaller than min_candidate_chars".to_string(),
            ));
        }
        for rule in &self.patterns {
            if !rule.pattern.contains("(?P<task>") && !rule.pattern.contains("(?<task>") {
                return Err(Error::InvalidRules(format!(
                    "pattern '{}' has no `task` capture group",
                    rule.name
                )));
            }
        }
        Ok(())
    }

    pub fn patterns_in(&self, scope: PatternScope) -> impl Iterator<Item = &PatternRule> {
        self.patterns.iter().filter(move |rule| rule.scope == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_are_valid() {
        let rules = ExtractionRules::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.max_candidates, 10);
        assert_eq!(rules.patterns_in(PatternScope::Line).count(), 3);
    }

    #[test]
    fn test_list_patterns_come_first() {
        let rules = ExtractionRules::default();
        let names: Vec<&str> = rules.patterns.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(&names[..2], &["numbered_item", "bullet_item"]);
    }

    #[test]
    fn test_category_table_order() {
        let rules = ExtractionRules::default();
        let order: Vec<TaskCategory> = rules.categories.iter().map(|c| c.category).collect();
        assert_eq!(
            order,
            vec![
                TaskCategory::Communication,
                TaskCategory::Meetings,
                TaskCategory::Research,
                TaskCategory::Development,
                TaskCategory::Planning,
            ]
        );
    }

    #[test]
    fn test_json_round_trip_of_default_rules() {
        let json = serde_json::to_string(&ExtractionRules::default()).unwrap();
        let rules = ExtractionRules::from_json(&json).unwrap();
        assert_eq!(rules, ExtractionRules::default());
    }

    #[test]
    fn test_pattern_without_task_group_is_rejected() {
        let mut rules = ExtractionRules::default();
        rules.patterns.push(PatternRule::new("broken", PatternScope::Sentence, r"todo\s+.+"));
        assert!(matches!(rules.validate(), Err(Error::InvalidRules(_))));
    }

    #[test]
    fn test_zero_cap_is_rejected() {
        let rules = ExtractionRules {
            max_candidates: 0,
            ..Default::default()
        };
        assert!(rules.validate().is_err());
    }
}
