//! Memory aggregate: the task queue, the execution log and loop state.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::task::Task;

/// The whole persisted aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// FIFO queue; the front is executed next
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Append-only execution log
    #[serde(default)]
    pub logs: Vec<LogEntry>,

    /// Loop state
    #[serde(default, deserialize_with = "deserialize_state")]
    pub state: State,
}

impl Memory {
    /// Remove and return the oldest queued task
    pub fn pop_task(&mut self) -> Option<Task> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(self.tasks.remove(0))
        }
    }

    /// The last `n` log entries, oldest first
    pub fn recent_logs(&self, n: usize) -> &[LogEntry] {
        let start = self.logs.len().saturating_sub(n);
        &self.logs[start..]
    }

    /// Append a log entry and record it as the latest result
    pub fn record(&mut self, entry: LogEntry) {
        self.state.last_task = Some(entry.task.clone());
        self.state.last_output = Some(entry.output.clone());
        self.logs.push(entry);
    }
}

/// Immutable record of one executed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp
    pub timestamp: String,

    /// The task string exactly as it was queued
    pub task: String,

    /// Captured output
    pub output: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn now(task: &Task, output: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            task: task.to_string(),
            output: output.into(),
        }
    }
}

/// Loop mode. Unknown strings are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    Idle,
    Autonomous,
    Booting,
    Stopped,
    Cycling,
    Other(String),
}

impl From<String> for Mode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "idle" => Mode::Idle,
            "autonomous" => Mode::Autonomous,
            "booting" => Mode::Booting,
            "stopped" => Mode::Stopped,
            "cycling" => Mode::Cycling,
            _ => Mode::Other(raw),
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => f.write_str("idle"),
            Mode::Autonomous => f.write_str("autonomous"),
            Mode::Booting => f.write_str("booting"),
            Mode::Stopped => f.write_str("stopped"),
            Mode::Cycling => f.write_str("cycling"),
            Mode::Other(raw) => f.write_str(raw),
        }
    }
}

/// Loop state with the recognised keys; anything else is preserved in `extra`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_task: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl State {
    /// State holding only a mode
    pub fn with_mode(mode: Mode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.unwrap_or(false)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StateRepr {
    /// Older files stored the mode as a bare string
    Legacy(String),
    Current(State),
    Unrecognized(Value),
}

fn deserialize_state<'de, D>(deserializer: D) -> Result<State, D::Error>
where
    D: Deserializer<'de>,
{
    let state = match Option::<StateRepr>::deserialize(deserializer)? {
        Some(StateRepr::Legacy(mode)) => State::with_mode(Mode::from(mode)),
        Some(StateRepr::Current(state)) => state,
        Some(StateRepr::Unrecognized(_)) | None => State::default(),
    };
    Ok(state)
}
