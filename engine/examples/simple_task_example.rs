//! Example demonstrating the task queue with the Agent Core
//!
//! This example shows how to:
//! - Create an agent over a scratch memory file
//! - Enqueue a shell command and a directive
//! - Drain the queue and view the log
//! - Run a short bounded autonomy cycle
//!
//! No language model is needed: the offline provider makes the planner use
//! its deterministic fallback. Point `provider` at `OllamaProvider` to plan
//! with a local model instead.

use agenti_engine::{
    agent::{export_logs, reflect, AgentCore, StopToken},
    config::Config,
    llm::{LLMProvider, OfflineProvider},
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Simple Task Queue Example ===\n");

    let temp_dir = TempDir::new()?;
    let config = Config::with_data_dir(temp_dir.path());

    let provider: Arc<dyn LLMProvider> = Arc::new(OfflineProvider);
    println!(
        "✓ LLM Provider: {} (local: {})",
        provider.name(),
        provider.is_local()
    );

    let agent = AgentCore::with_provider(&config, provider);
    println!("✓ Memory file: {}\n", agent.store().path().display());

    agent.enqueue("echo hello from the queue")?;
    agent.enqueue("summarize what just happened")?;
    agent.enqueue("```\nthis fenced block is ignored\n```")?;

    while let Some((entry, memory)) = agent.execute_next_task().await? {
        println!("ran {:?} ({} left)", entry.task, memory.tasks.len());
    }

    let report = agent
        .autonomy_cycle(2, "check the machine", &StopToken::new())
        .await?;
    println!(
        "\ncycle: {} round(s), {} executed, stopped: {}",
        report.rounds, report.executed, report.stop_reason
    );

    let memory = agent.get_memory();
    let reflection = reflect(&memory.logs, 10);
    println!("score: {:.2} ({})\n", reflection.success_rate, reflection.bias);
    print!("{}", export_logs(&memory.logs));

    Ok(())
}
