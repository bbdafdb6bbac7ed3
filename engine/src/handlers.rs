//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - enqueue: Classify input and queue it
//! - next: Execute one task
//! - cycle / run: Bounded and continuous autonomy loops
//! - stop: Persist a stop request
//! - status / logs / export: Inspect the memory file

use anyhow::{Context, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::agent::{export_logs, reflect, AgentCore, AutonomyController, CycleReport, StopToken};
use crate::store::LogEntry;

/// Number of log entries scored by `status`
const REFLECTION_WINDOW: usize = 10;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Classify and enqueue one input
pub fn handle_enqueue(text: &str, agent: &AgentCore, format: OutputFormat) -> Result<()> {
    let accepted = agent.enqueue(text).context("Failed to enqueue task")?;
    let queued = agent.get_memory().tasks.len();

    match format {
        OutputFormat::Text => {
            if accepted {
                println!("Queued ({} task(s) waiting)", queued);
            } else {
                println!("Input dropped: empty or only a code block");
            }
        }
        OutputFormat::Json => {
            let output = json!({ "accepted": accepted, "queued": queued });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Execute the oldest queued task
pub async fn handle_next(agent: &AgentCore, format: OutputFormat) -> Result<()> {
    let executed = agent
        .execute_next_task()
        .await
        .context("Failed to execute task")?;

    match (executed, format) {
        (None, OutputFormat::Text) => println!("Queue is empty"),
        (None, OutputFormat::Json) => println!("{}", json!({ "executed": null })),
        (Some((entry, memory)), OutputFormat::Text) => {
            print!("{}", format_entry(&entry));
            println!("({} task(s) waiting)", memory.tasks.len());
        }
        (Some((entry, memory)), OutputFormat::Json) => {
            let output = json!({ "executed": entry, "queued": memory.tasks.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Run a bounded autonomy cycle until it finishes, Ctrl-C or a persisted stop
pub async fn handle_cycle(
    steps: usize,
    goal: &str,
    agent: &AgentCore,
    format: OutputFormat,
) -> Result<()> {
    let token = StopToken::new();
    let cycle = agent.autonomy_cycle(steps, goal, &token);
    tokio::pin!(cycle);

    let result = tokio::select! {
        result = &mut cycle => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, stopping autonomy cycle");
            token.cancel();
            cycle.await
        }
    };

    let report = result.context("Autonomy cycle failed")?;
    print_report(&report, format)
}

/// Run the continuous loop in the foreground until Ctrl-C or a persisted stop
pub async fn handle_run(goal: &str, agent: Arc<AgentCore>, format: OutputFormat) -> Result<()> {
    let controller = AutonomyController::new(agent);
    controller
        .start(goal)
        .context("Failed to start autonomy loop")?;

    if let OutputFormat::Text = format {
        println!("Autonomy loop running for goal: {}", goal);
        println!("Press Ctrl-C or run `agenti stop` to stop.");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, stopping autonomy loop");
            controller.stop().context("Failed to persist stop request")?;
        }
        _ = wait_until_finished(&controller) => {}
    }

    let report = controller.join().await.context("Autonomy loop failed")?;
    print_report(&report, format)
}

async fn wait_until_finished(controller: &AutonomyController) {
    while controller.is_running() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

/// Persist a stop request for any running loop
pub fn handle_stop(agent: &AgentCore, format: OutputFormat) -> Result<()> {
    agent.request_stop().context("Failed to persist stop request")?;
    match format {
        OutputFormat::Text => println!("Stop requested; a running loop exits at its next iteration."),
        OutputFormat::Json => println!("{}", json!({ "stop_requested": true })),
    }
    Ok(())
}

/// Show loop state, queue and a reflection over recent activity
pub fn handle_status(agent: &AgentCore, format: OutputFormat) -> Result<()> {
    let memory = agent.get_memory();
    let reflection = reflect(&memory.logs, REFLECTION_WINDOW);
    let state = &memory.state;

    match format {
        OutputFormat::Text => {
            println!(
                "Mode:     {}",
                state
                    .mode
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "unset".to_string())
            );
            println!("Running:  {}", state.is_running());
            if let Some(goal) = &state.goal {
                println!("Goal:     {}", goal);
            }
            println!("Queued:   {}", memory.tasks.len());
            println!("Logged:   {}", memory.logs.len());
            if let Some(task) = &state.last_task {
                println!("Last:     {}", task);
            }
            println!(
                "Score:    {:.2} over {} task(s), bias {}",
                reflection.success_rate, reflection.sample_size, reflection.bias
            );
            println!("          {}", reflection.summary);

            if !memory.tasks.is_empty() {
                println!();
                println!("Next up:");
                for task in memory.tasks.iter().take(5) {
                    println!("  {}", task);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "state": state,
                "queued": memory.tasks,
                "logged": memory.logs.len(),
                "reflection": reflection,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Show the last `limit` log entries
pub fn handle_logs(limit: usize, agent: &AgentCore, format: OutputFormat) -> Result<()> {
    let memory = agent.get_memory();
    let entries = memory.recent_logs(limit);

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No log entries");
                return Ok(());
            }
            println!("Log (last {} entries):", entries.len());
            println!();
            for entry in entries {
                print!("{}", format_entry(entry));
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "logs": entries,
                "count": entries.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Export the whole log as text
pub fn handle_export(path: &Path, agent: &AgentCore, format: OutputFormat) -> Result<()> {
    let memory = agent.get_memory();
    std::fs::write(path, export_logs(&memory.logs))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    match format {
        OutputFormat::Text => println!(
            "Exported {} log entries to {}",
            memory.logs.len(),
            path.display()
        ),
        OutputFormat::Json => println!(
            "{}",
            json!({ "exported": memory.logs.len(), "path": path.display().to_string() })
        ),
    }
    Ok(())
}

fn print_report(report: &CycleReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!(
                "{} round(s), {} task(s) executed, {} task(s) planned ({})",
                report.rounds, report.executed, report.tasks_added, report.stop_reason
            );
            if report.used_fallback_rounds > 0 {
                println!(
                    "Offline planner used in {} round(s)",
                    report.used_fallback_rounds
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn format_entry(entry: &LogEntry) -> String {
    let mut text = format!("[{}] $ {}\n", entry.timestamp, entry.task);
    for line in entry.output.lines() {
        text.push_str("  ");
        text.push_str(line);
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::OfflineProvider;
    use tempfile::TempDir;

    fn agent(temp: &TempDir) -> AgentCore {
        AgentCore::with_provider(&Config::with_data_dir(temp.path()), Arc::new(OfflineProvider))
    }

    #[test]
    fn test_format_entry_indents_output() {
        let entry = LogEntry {
            timestamp: "2024-05-01T12:00:00.000000Z".to_string(),
            task: "echo hi".to_string(),
            output: "hi\n[exit status: 0]".to_string(),
        };
        assert_eq!(
            format_entry(&entry),
            "[2024-05-01T12:00:00.000000Z] $ echo hi\n  hi\n  [exit status: 0]\n"
        );
    }

    #[test]
    fn test_export_writes_file() {
        let temp = TempDir::new().unwrap();
        let agent = agent(&temp);
        let mut memory = agent.get_memory();
        memory.record(LogEntry {
            timestamp: "t".to_string(),
            task: "uptime".to_string(),
            output: "up".to_string(),
        });
        agent.store().save(&memory).unwrap();

        let out = temp.path().join("export.txt");
        handle_export(&out, &agent, OutputFormat::Json).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "[t] $ uptime\nup\n\n");
    }

    #[test]
    fn test_enqueue_and_stop_handlers() {
        let temp = TempDir::new().unwrap();
        let agent = agent(&temp);

        handle_enqueue("ls", &agent, OutputFormat::Json).unwrap();
        handle_enqueue("   ", &agent, OutputFormat::Text).unwrap();
        assert_eq!(agent.get_memory().tasks.len(), 1);

        handle_stop(&agent, OutputFormat::Text).unwrap();
        assert!(!agent.get_memory().state.is_running());
        handle_status(&agent, OutputFormat::Json).unwrap();
    }
}
