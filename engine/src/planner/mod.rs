//! Planner
//!
//! Turns a goal plus recent activity into a [`Plan`]: an optional answer and
//! a list of follow-up tasks. The language model is asked for a JSON object
//! `{"answer": string|null, "tasks": [string]}`. When the model is
//! unavailable or its reply cannot be used, a deterministic offline plan is
//! returned instead; planning itself never fails.
//!
//! The planner never touches the queue. Callers enqueue the returned tasks.

pub mod json_extract;

pub use json_extract::extract_first_json_object;

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::agent::reflection::entry_failed;
use crate::config::Config;
use crate::llm::{GenerationRequest, LLMProvider};
use crate::store::LogEntry;
use crate::task::{Classifier, Task};

const SYSTEM_PROMPT: &str = "You are the planning component of an autonomous task runner.\n\
Reply with ONLY a JSON object of the form {\"answer\": string or null, \"tasks\": [string]}.\n\
- \"answer\": a short reply to the goal, or null.\n\
- \"tasks\": follow-up steps. A step is either a single shell command to run as-is, \
or an instruction prefixed with \"llm:\" that needs further planning.\n\
Use an empty tasks array when nothing remains to be done. No markdown, no explanation.";

/// Structured planning result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub answer: Option<String>,
    pub tasks: Vec<Task>,
}

/// A plan plus how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub plan: Plan,

    /// True when the offline plan was used
    pub used_fallback: bool,

    /// Why the model's plan was not used
    pub fallback_reason: Option<String>,
}

/// Tunables for one planner instance
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub context_logs: usize,
    pub context_chars: usize,
    pub allow_shell_tasks: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            context_logs: 5,
            context_chars: 500,
            allow_shell_tasks: true,
            temperature: 0.2,
            max_tokens: 500,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PlannerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            context_logs: config.planner.context_logs,
            context_chars: config.planner.context_chars,
            allow_shell_tasks: config.planner.allow_shell_tasks,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

pub struct Planner {
    provider: Arc<dyn LLMProvider>,
    classifier: Classifier,
    settings: PlannerSettings,
}

impl Planner {
    pub fn new(provider: Arc<dyn LLMProvider>, classifier: Classifier) -> Self {
        Self::with_settings(provider, classifier, PlannerSettings::default())
    }

    pub fn with_settings(
        provider: Arc<dyn LLMProvider>,
        classifier: Classifier,
        settings: PlannerSettings,
    ) -> Self {
        Self {
            provider,
            classifier,
            settings,
        }
    }

    /// Number of trailing log entries a caller should pass as context
    pub fn context_window(&self) -> usize {
        self.settings.context_logs
    }

    /// Produce a plan for `goal`. Never fails.
    pub async fn plan(&self, goal: &str, context: &[LogEntry]) -> PlanOutcome {
        let request = GenerationRequest::new(self.build_prompt(goal, context))
            .with_system(SYSTEM_PROMPT)
            .with_sampling(self.settings.temperature, self.settings.max_tokens);

        let reply = match tokio::time::timeout(
            self.settings.timeout,
            self.provider.generate(&request),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return self.fallback(goal, context, e.to_string()),
            Err(_) => {
                return self.fallback(
                    goal,
                    context,
                    format!("model timed out after {}s", self.settings.timeout.as_secs()),
                )
            }
        };

        match self.parse_plan(&reply) {
            Ok(plan) => {
                debug!(
                    provider = self.provider.name(),
                    tasks = plan.tasks.len(),
                    has_answer = plan.answer.is_some(),
                    "plan received"
                );
                PlanOutcome {
                    plan,
                    used_fallback: false,
                    fallback_reason: None,
                }
            }
            Err(reason) => self.fallback(goal, context, reason),
        }
    }

    fn build_prompt(&self, goal: &str, context: &[LogEntry]) -> String {
        let start = context.len().saturating_sub(self.settings.context_logs);
        let recent = &context[start..];

        let mut prompt = format!("Goal: {}\n\nRecent activity:\n", goal.trim());
        if recent.is_empty() {
            prompt.push_str("(none)\n");
        }
        for entry in recent {
            prompt.push_str(&format!(
                "[{}] $ {}\n{}\n",
                entry.timestamp,
                entry.task,
                clip(&entry.output, self.settings.context_chars)
            ));
        }
        prompt
    }

    /// Validate the model reply. Errors carry a human-readable reason.
    fn parse_plan(&self, reply: &str) -> Result<Plan, String> {
        let object = extract_first_json_object(reply)
            .ok_or_else(|| "no JSON object in model reply".to_string())?;

        let answer = match object.get("answer") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) => None,
            Some(_) => return Err("\"answer\" must be a string or null".to_string()),
            None => return Err("missing \"answer\"".to_string()),
        };

        let tasks = string_array(&object, "tasks")?
            .into_iter()
            .filter_map(|raw| self.classify(raw))
            .collect();

        Ok(Plan { answer, tasks })
    }

    fn classify(&self, raw: &str) -> Option<Task> {
        if self.settings.allow_shell_tasks {
            self.classifier.classify(raw)
        } else {
            self.classifier.classify_as_directive(raw)
        }
    }

    fn fallback(&self, goal: &str, context: &[LogEntry], reason: String) -> PlanOutcome {
        warn!(
            provider = self.provider.name(),
            reason = %reason,
            "planner falling back to offline plan"
        );
        PlanOutcome {
            plan: self.default_plan(goal, context),
            used_fallback: true,
            fallback_reason: Some(reason),
        }
    }

    /// Deterministic plan used when the model cannot be consulted.
    ///
    /// Records the goal as a reflection step, and asks to revisit the last
    /// task when it failed. The same inputs always give the same plan.
    pub fn default_plan(&self, goal: &str, context: &[LogEntry]) -> Plan {
        let goal = goal.trim();
        let mut steps = vec![format!(
            "echo {}",
            shell_quote(&format!("[reflection] goal: {}", goal))
        )];

        if let Some(last) = context.last().filter(|e| entry_failed(e)) {
            steps.push(format!(
                "echo {}",
                shell_quote(&format!("[reflection] revisit: {}", last.task))
            ));
        }

        Plan {
            answer: Some(format!(
                "Language model unavailable; recorded offline reflection for goal: {}",
                goal
            )),
            tasks: steps
                .iter()
                .filter_map(|s| self.classifier.classify(s))
                .collect(),
        }
    }
}

fn string_array<'a>(object: &'a Map<String, Value>, key: &str) -> Result<Vec<&'a str>, String> {
    match object.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| format!("\"{}\" must contain only strings", key))
            })
            .collect(),
        Some(_) => Err(format!("\"{}\" must be an array", key)),
        None => Err(format!("missing \"{}\"", key)),
    }
}

/// Single-quote `s` for a POSIX shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Keep at most `limit` characters of `s`
fn clip(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
