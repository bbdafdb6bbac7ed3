//! Scoring recent activity and rendering the log for export.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use crate::store::LogEntry;

static EXIT_STATUS: OnceLock<Regex> = OnceLock::new();

/// Which way the next plans should lean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    /// Recent work mostly succeeded; keep going
    Reinforce,
    /// Recent work mostly failed; try something else
    Explore,
    Neutral,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Reinforce => f.write_str("reinforce"),
            Bias::Explore => f.write_str("explore"),
            Bias::Neutral => f.write_str("neutral"),
        }
    }
}

/// Score over a window of recent log entries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reflection {
    /// Fraction of entries that did not fail, rounded to two decimals
    pub success_rate: f64,
    pub sample_size: usize,
    pub bias: Bias,
    pub summary: String,
}

/// Whether a log entry records a failure.
///
/// Only the executor's own markers count: an `[ERROR]` line (spawn failure,
/// timeout, empty command), a non-zero exit status, or a kill by signal.
/// Text a command happens to print, such as "error", does not.
pub fn entry_failed(entry: &LogEntry) -> bool {
    let output = &entry.output;
    if output.lines().any(|line| line.starts_with("[ERROR]"))
        || output.contains("[terminated by signal")
    {
        return true;
    }
    matches!(exit_status(output), Some(code) if code != 0)
}

/// The last `[exit status: N]` marker in `output`
fn exit_status(output: &str) -> Option<i32> {
    let pattern = EXIT_STATUS.get_or_init(|| {
        Regex::new(r"\[exit status: (-?\d+)\]").expect("Invalid exit status pattern")
    });
    pattern
        .captures_iter(output)
        .last()
        .and_then(|caps| caps[1].parse().ok())
}

/// Score the last `window` entries of `logs`
pub fn reflect(logs: &[LogEntry], window: usize) -> Reflection {
    let start = logs.len().saturating_sub(window);
    let recent = &logs[start..];

    if recent.is_empty() {
        return Reflection {
            success_rate: 0.0,
            sample_size: 0,
            bias: Bias::Neutral,
            summary: "no activity yet".to_string(),
        };
    }

    let failures = recent.iter().filter(|e| entry_failed(e)).count();
    let successes = recent.len() - failures;
    let rate = successes as f64 / recent.len() as f64;
    let success_rate = (rate * 100.0).round() / 100.0;

    let bias = if rate >= 0.8 {
        Bias::Reinforce
    } else if rate < 0.5 {
        Bias::Explore
    } else {
        Bias::Neutral
    };

    let mut summary = format!("{} of {} recent tasks succeeded", successes, recent.len());
    if let Some(last_failed) = recent.iter().rev().find(|e| entry_failed(e)) {
        summary.push_str(&format!("; last failure: {}", last_failed.task));
    }

    Reflection {
        success_rate,
        sample_size: recent.len(),
        bias,
        summary,
    }
}

/// Render logs as `[timestamp] $ task\noutput\n\n` blocks
pub fn export_logs(logs: &[LogEntry]) -> String {
    logs.iter()
        .map(|e| format!("[{}] $ {}\n{}\n\n", e.timestamp, e.task, e.output))
        .collect()
}
