//! Executor
//!
//! Takes the task at the front of the queue and runs it. Shell tasks go to
//! [`ShellRunner`]; `llm:` directives go to the [`Planner`], whose follow-up
//! tasks are appended to the back of the queue. Every popped task produces
//! exactly one log entry, whatever happens while running it.
//!
//! The pop is persisted before the task runs and the log entry is appended
//! by reloading the memory afterwards, so enqueues made while a task runs
//! are never lost.

pub mod shell;

pub use shell::{truncate_output, ShellRunner};

use sdk::errors::EngineError;
use std::sync::Arc;
use tracing::{debug, info};

use crate::planner::Planner;
use crate::store::{LogEntry, Memory, Store};
use crate::task::Task;

/// Prefix on LLM task output produced by the offline planner
pub const FALLBACK_MARKER: &str = "[fallback planner]";

pub struct Executor {
    store: Arc<Store>,
    planner: Arc<Planner>,
    shell: ShellRunner,
}

impl Executor {
    pub fn new(store: Arc<Store>, planner: Arc<Planner>, shell: ShellRunner) -> Self {
        Self {
            store,
            planner,
            shell,
        }
    }

    /// Run the oldest queued task.
    ///
    /// Returns the appended log entry and the memory as saved, or `None`
    /// when the queue is empty.
    pub async fn execute_next_task(&self) -> Result<Option<(LogEntry, Memory)>, EngineError> {
        if self.store.load().tasks.is_empty() {
            return Ok(None);
        }

        let (popped, memory) = self.store.update(|m| m.pop_task())?;
        let Some(task) = popped else {
            return Ok(None);
        };

        info!(task = %task, remaining = memory.tasks.len(), "executing task");

        let (output, follow_ups) = match &task {
            Task::Shell(command) => (self.shell.run(command).await, Vec::new()),
            Task::LlmDirective(_) => self.interpret(&task, &memory).await,
        };

        let entry = LogEntry::now(&task, output);
        let added = follow_ups.len();
        let (_, memory) = self.store.update(|m| {
            m.tasks.extend(follow_ups);
            m.record(entry.clone());
        })?;

        debug!(task = %task, follow_ups = added, queued = memory.tasks.len(), "task logged");
        Ok(Some((entry, memory)))
    }

    async fn interpret(&self, task: &Task, memory: &Memory) -> (String, Vec<Task>) {
        let directive = task.payload();
        if directive.is_empty() {
            return ("[ERROR] empty llm directive".to_string(), Vec::new());
        }

        let context = memory.recent_logs(self.planner.context_window());
        let outcome = self.planner.plan(directive, context).await;
        let plan = outcome.plan;

        let mut output = match plan.answer.filter(|a| !a.trim().is_empty()) {
            Some(answer) => answer,
            None => format!("planned {} follow-up task(s)", plan.tasks.len()),
        };
        if outcome.used_fallback {
            output = format!("{} {}", FALLBACK_MARKER, output);
        }

        (output, plan.tasks)
    }
}
