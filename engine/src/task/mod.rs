//! Task module - the unit of work in the queue and its classification.
//!
//! On disk a task is a plain string; the `llm:` prefix marks an LLM
//! directive and anything else is a shell command. In memory the prefix is
//! parsed exactly once into [`Task`], and [`Task`]'s `Display` reproduces the
//! original string byte for byte.

mod classifier;

pub use classifier::{is_fence_only, Classifier, AMBIGUOUS_WORDS};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix marking a task that is interpreted by the planner
pub const LLM_MARKER: &str = "llm:";

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Task {
    /// Executed as an OS command through the user's shell
    Shell(String),

    /// Sent to the planner; holds the text after the `llm:` marker verbatim
    LlmDirective(String),
}

impl Task {
    /// Parse a persisted task string.
    ///
    /// No heuristics run here: a stored string without the marker was
    /// classified as a shell command when it was enqueued.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(LLM_MARKER) {
            Some(rest) => Task::LlmDirective(rest.to_string()),
            None => Task::Shell(raw.to_string()),
        }
    }

    /// Build an LLM directive from free text (the marker is prepended on display)
    pub fn directive(text: impl Into<String>) -> Self {
        Task::LlmDirective(text.into())
    }

    /// Build a shell task
    pub fn shell(command: impl Into<String>) -> Self {
        Task::Shell(command.into())
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, Task::Shell(_))
    }

    /// Text handed to the shell or planner, with surrounding whitespace removed
    pub fn payload(&self) -> &str {
        match self {
            Task::Shell(command) => command.trim(),
            Task::LlmDirective(text) => text.trim(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Shell(command) => f.write_str(command),
            Task::LlmDirective(text) => write!(f, "{}{}", LLM_MARKER, text),
        }
    }
}

impl From<String> for Task {
    fn from(raw: String) -> Self {
        Task::parse(&raw)
    }
}

impl From<Task> for String {
    fn from(task: Task) -> Self {
        task.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_llm_directive() {
        let task = Task::parse("llm: summarize the logs");
        assert_eq!(task, Task::LlmDirective(" summarize the logs".to_string()));
        assert_eq!(task.payload(), "summarize the logs");
        assert!(!task.is_shell());
    }

    #[test]
    fn test_parse_shell() {
        let task = Task::parse("df -h");
        assert_eq!(task, Task::shell("df -h"));
        assert!(task.is_shell());
    }

    #[test]
    fn test_display_reproduces_persisted_string() {
        for raw in ["llm:x", "llm: spaced", "echo hi", "  ls  "] {
            assert_eq!(Task::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let tasks = vec![Task::shell("uptime"), Task::directive(" plan next")];
        let json = serde_json::to_string(&tasks).unwrap();
        assert_eq!(json, r#"["uptime","llm: plan next"]"#);

        let back: Vec<Task> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tasks);
    }
}
