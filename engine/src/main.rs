// Agenti autonomous task runner
// Main entry point for the agenti binary

use clap::Parser;
use std::sync::Arc;

use agenti_engine::agent::AgentCore;
use agenti_engine::cli::{Cli, Command};
use agenti_engine::config::Config;
use agenti_engine::handlers::{
    handle_cycle, handle_enqueue, handle_export, handle_logs, handle_next, handle_run,
    handle_status, handle_stop, OutputFormat,
};
use agenti_engine::telemetry::init_telemetry_with_level;
use sdk::errors::{AgentErrorExt, EngineError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log overrides the config level; RUST_LOG overrides both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        memory = %config.memory_path().display(),
        provider = %config.llm.default_provider,
        "agenti starting"
    );

    let agent = Arc::new(AgentCore::from_config(&config));

    let result = match cli.command {
        Command::Enqueue { text } => handle_enqueue(&text, &agent, format),
        Command::Next => handle_next(&agent, format).await,
        Command::Cycle { steps, goal } => handle_cycle(steps, &goal, &agent, format).await,
        Command::Run { goal } => handle_run(&goal, agent, format).await,
        Command::Stop => handle_stop(&agent, format),
        Command::Status => handle_status(&agent, format),
        Command::Logs { limit } => handle_logs(limit, &agent, format),
        Command::Export { path } => handle_export(&path, &agent, format),
    };

    if let Err(e) = &result {
        if let Some(engine_error) = e.downcast_ref::<EngineError>() {
            eprintln!("hint: {}", engine_error.user_hint());
        }
    }
    result
}
