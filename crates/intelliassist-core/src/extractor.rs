//! Rule-based task extraction from free text.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::rules::{ExtractionRules, PatternRule, PatternScope, TaskCategory};
use crate::{Error, NewTask, Result, TaskPriority};

const FALLBACK_TITLE_CHARS: usize = 60;

/// A task proposed by the extractor, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub category: TaskCategory,
}

impl TaskCandidate {
    pub fn into_new_task(self, user_id: Option<String>) -> NewTask {
        let mut task = NewTask::new(self.title)
            .with_category(self.category.as_str())
            .with_priority(self.priority);
        task.user_id = user_id;
        task
    }
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    name: String,
    regex: Regex,
    category_hint: Option<TaskCategory>,
    priority_hint: Option<TaskPriority>,
}

impl CompiledPattern {
    fn compile(rule: &PatternRule) -> Result<Self> {
        Ok(Self {
            name: rule.name.clone(),
            regex: compile(&rule.pattern)?,
            category_hint: rule.category_hint,
            priority_hint: rule.priority_hint,
        })
    }
}

pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Builds `\b(?:a|b|c)\b` from a keyword list; `None` for an empty list.
fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    compile(&format!(r"\b(?:{})\b", alternatives.join("|"))).map(Some)
}

static BUILTIN: Lazy<Result<TaskExtractor>> = Lazy::new(|| TaskExtractor::new(ExtractionRules::default()));

/// Compiled extraction rules.
#[derive(Debug, Clone)]
pub struct TaskExtractor {
    rules: ExtractionRules,
    line_patterns: Vec<CompiledPattern>,
    sentence_patterns: Vec<CompiledPattern>,
    high_priority: Option<Regex>,
    low_priority: Option<Regex>,
    categories: Vec<(TaskCategory, Regex)>,
}

impl TaskExtractor {
    /// The built-in rule set, compiled once per process.
    pub fn builtin() -> Result<Self> {
        BUILTIN
            .as_ref()
            .map(Clone::clone)
            .map_err(|e| Error::InvalidRules(format!("built-in rules: {}", e)))
    }

    pub fn new(rules: ExtractionRules) -> Result<Self> {
        rules.validate()?;

        let line_patterns = rules
            .patterns_in(PatternScope::Line)
            .map(CompiledPattern::compile)
            .collect::<Result<Vec<_>>>()?;
        let sentence_patterns = rules
            .patterns_in(PatternScope::Sentence)
            .map(CompiledPattern::compile)
            .collect::<Result<Vec<_>>>()?;

        let mut categories = Vec::with_capacity(rules.categories.len());
        for rule in &rules.categories {
            if let Some(regex) = keyword_regex(&rule.keywords)? {
                categories.push((rule.category, regex));
            }
        }

        Ok(Self {
            high_priority: keyword_regex(&rules.high_priority_keywords)?,
            low_priority: keyword_regex(&rules.low_priority_keywords)?,
            line_patterns,
            sentence_patterns,
            categories,
            rules,
        })
    }

    pub fn rules(&self) -> &ExtractionRules {
        &self.rules
    }

    /// Extract up to `max_candidates` task candidates, in order of appearance.
    pub fn extract(&self, text: &str) -> Vec<TaskCandidate> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let mut seen = HashSet::new();

        'lines: for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            for pattern in &self.line_patterns {
                if let Some(task) = capture_task(&pattern.regex, line) {
                    self.push_candidate(&mut candidates, &mut seen, task, line, pattern);
                    if candidates.len() >= self.rules.max_candidates {
                        break 'lines;
                    }
                    continue 'lines;
                }
            }

            for sentence in split_sentences(line) {
                let matched = self
                    .sentence_patterns
                    .iter()
                    .find_map(|p| capture_task(&p.regex, sentence).map(|task| (p, task)));
                if let Some((pattern, task)) = matched {
                    self.push_candidate(&mut candidates, &mut seen, task, sentence, pattern);
                    if candidates.len() >= self.rules.max_candidates {
                        break 'lines;
                    }
                }
            }
        }

        if candidates.is_empty() {
            if let Some(candidate) = self.fallback_candidate(text) {
                candidates.push(candidate);
            }
        }

        candidates
    }

    pub fn classify_priority(&self, text: &str) -> TaskPriority {
        if self.high_priority.as_ref().is_some_and(|r| r.is_match(text)) {
            TaskPriority::High
        } else if self.low_priority.as_ref().is_some_and(|r| r.is_match(text)) {
            TaskPriority::Low
        } else {
            TaskPriority::Medium
        }
    }

    pub fn classify_category(&self, text: &str) -> TaskCategory {
        self.categories
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(category, _)| *category)
            .unwrap_or_default()
    }

    fn push_candidate(
        &self,
        candidates: &mut Vec<TaskCandidate>,
        seen: &mut HashSet<String>,
        task: &str,
        source: &str,
        pattern: &CompiledPattern,
    ) {
        let title = clean_candidate(task);
        if title.chars().count() < self.rules.min_candidate_chars {
            return;
        }
        let key = title.to_lowercase();
        if self.rules.ignored_phrases.iter().any(|p| p.eq_ignore_ascii_case(&key)) {
            return;
        }
        if !seen.insert(key) {
            return;
        }

        let mut priority = self.classify_priority(source);
        if priority == TaskPriority::Medium {
            priority = pattern.priority_hint.unwrap_or(priority);
        }
        let mut category = self.classify_category(source);
        if category == TaskCategory::General {
            category = pattern.category_hint.unwrap_or(category);
        }

        tracing::trace!(pattern = %pattern.name, title = %title, "Task candidate matched");

        candidates.push(TaskCandidate {
            title: truncate_chars(&title, self.rules.max_title_chars),
            description: truncate_chars(source, self.rules.max_description_chars),
            priority,
            category,
        });
    }

    fn fallback_candidate(&self, text: &str) -> Option<TaskCandidate> {
        let text = text.trim();
        if text.chars().count() < self.rules.fallback_min_chars {
            return None;
        }
        let lowered = text.to_lowercase();
        if !self
            .rules
            .task_indicators
            .iter()
            .any(|indicator| lowered.contains(indicator.as_str()))
        {
            return None;
        }

        let first_line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or(text);
        let collapsed = collapse_whitespace(text);
        let title = format!(
            "{}: {}",
            self.rules.fallback_title_prefix,
            truncate_chars(&clean_candidate(first_line), FALLBACK_TITLE_CHARS)
        );

        Some(TaskCandidate {
            title: truncate_chars(&title, self.rules.max_title_chars),
            description: truncate_chars(&collapsed, self.rules.max_description_chars),
            priority: self.classify_priority(text),
            category: self.classify_category(text),
        })
    }
}

fn capture_task<'t>(regex: &Regex, text: &'t str) -> Option<&'t str> {
    regex
        .captures(text)
        .and_then(|caps| caps.name("task"))
        .map(|m| m.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// Splits after `.`, `!`, `?` or `;` when followed by whitespace or the end.
fn split_sentences(line: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = line.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if matches!(ch, '.' | '!' | '?' | ';') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = idx + ch.len_utf8();
                let sentence = line[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    let rest = line[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

fn clean_candidate(raw: &str) -> String {
    let collapsed = collapse_whitespace(raw);
    collapsed
        .trim_matches(|c: char| matches!(c, '*' | '"' | '\'' | '`' | '_'))
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ';' | ':' | ',') || c.is_whitespace())
        .trim()
        .to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<TaskCandidate> {
        TaskExtractor::builtin().unwrap().extract(text)
    }

    #[test]
    fn test_builtin_rules_compile() {
        let extractor = TaskExtractor::builtin().unwrap();
        assert_eq!(extractor.rules(), &ExtractionRules::default());
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(extract("").is_empty());
        assert!(extract("   \n\t ").is_empty());
    }

    #[test]
    fn test_obligation_sentence() {
        let tasks = extract("need to buy milk.");
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].title.contains("buy milk"));
        assert_eq!(tasks[0].priority, TaskPriority::Medium);
    }

    #[test]
    fn test_urgent_keywords_raise_priority() {
        let tasks = extract("urgent: call the client asap.");
        assert!(!tasks.is_empty());
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[0].category, TaskCategory::Communication);
    }

    #[test]
    fn test_numbered_list_keeps_order() {
        let tasks = extract("1. Call dentist\n2. Finish report");
        let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Call dentist", "Finish report"]);
        assert!(tasks.iter().all(|t| t.priority == TaskPriority::Medium));
        assert_eq!(tasks[0].category, TaskCategory::Communication);
        assert_eq!(tasks[1].category, TaskCategory::General);
    }

    #[test]
    fn test_low_priority_keywords() {
        let tasks = extract("- clean the garage eventually");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority, TaskPriority::Low);
    }

    #[test]
    fn test_bullets_and_checkboxes() {
        let tasks = extract("* [ ] Design the landing page\n• Research competitor pricing");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "Design the landing page");
        assert_eq!(tasks[0].category, TaskCategory::Development);
        assert_eq!(tasks[1].category, TaskCategory::Research);
    }

    #[test]
    fn test_duplicates_are_dropped_case_insensitively() {
        let tasks = extract("- Book flights\n- book flights");
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_short_and_ignored_items_are_dropped() {
        assert!(extract("- ok\n- done").is_empty());
    }

    #[test]
    fn test_candidates_are_capped() {
        let text: String = (1..=15).map(|i| format!("{}. Write chapter {}\n", i, i)).collect();
        let tasks = extract(&text);
        assert_eq!(tasks.len(), 10);
        assert_eq!(tasks[9].title, "Write chapter 10");
    }

    #[test]
    fn test_sentences_are_split_within_a_line() {
        let tasks = extract("I have to review the contract. Remember to email Sarah tomorrow!");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "review the contract");
        assert_eq!(tasks[1].title, "email Sarah tomorrow");
    }

    #[test]
    fn test_fallback_candidate_when_indicators_present() {
        let tasks = extract("The project deadline is coming up quickly this month");
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].title.starts_with("Follow up: "));
    }

    #[test]
    fn test_no_fallback_for_plain_chatter() {
        assert!(extract("The weather was lovely on the beach today").is_empty());
    }

    #[test]
    fn test_title_is_truncated_on_char_boundary() {
        let long = format!("- {}", "é".repeat(150));
        let tasks = extract(&long);
        assert_eq!(tasks[0].title.chars().count(), 100);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let text = "Need to prepare slides. Schedule a meeting with the team.";
        assert_eq!(extract(text), extract(text));
    }

    #[test]
    fn test_custom_rules_from_json() {
        let mut rules = ExtractionRules::default();
        rules.patterns.insert(
            0,
            PatternRule {
                name: "ticket".to_string(),
                pattern: r"^ticket\s+(?P<task>.+)$".to_string(),
                scope: PatternScope::Line,
                category_hint: Some(TaskCategory::Development),
                priority_hint: Some(TaskPriority::High),
            },
        );
        let json = serde_json::to_string(&rules).unwrap();
        let extractor = TaskExtractor::new(ExtractionRules::from_json(&json).unwrap()).unwrap();

        let tasks = extractor.extract("TICKET resolve login bug");
        assert_eq!(tasks[0].title, "resolve login bug");
        assert_eq!(tasks[0].category, TaskCategory::Development);
        assert_eq!(tasks[0].priority, TaskPriority::High);
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        let mut rules = ExtractionRules::default();
        rules.patterns[0].pattern = r"(?P<task>[unclosed".to_string();
        assert!(matches!(
            TaskExtractor::new(rules),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_candidate_into_new_task() {
        let task = extract("- Call the bank")
            .remove(0)
            .into_new_task(Some("u1".to_string()));
        assert_eq!(task.summary, "Call the bank");
        assert_eq!(task.category, "communication");
        assert_eq!(task.user_id.as_deref(), Some("u1"));
    }
}
