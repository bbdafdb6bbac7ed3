//! CLI interface for Agenti
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the task queue and
//! the autonomy loops.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Agenti autonomous task runner
///
/// Queues shell commands and natural-language directives, executes them one
/// at a time, and plans follow-up work towards a goal.
#[derive(Parser, Debug)]
#[command(name = "agenti")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify input and add it to the task queue
    Enqueue {
        /// Shell command or free-text directive
        text: String,
    },

    /// Execute the oldest queued task
    Next,

    /// Run a bounded number of autonomy rounds
    Cycle {
        /// Number of rounds (clamped to 1..=50)
        #[arg(short, long, default_value = "3")]
        steps: usize,

        /// Goal to plan towards
        #[arg(short, long)]
        goal: String,
    },

    /// Run the continuous autonomy loop until Ctrl-C or `agenti stop`
    Run {
        /// Goal to plan towards
        #[arg(short, long)]
        goal: String,
    },

    /// Ask a running loop to stop at its next iteration
    Stop,

    /// Show loop state, queue length and recent activity
    Status,

    /// Show recent log entries
    Logs {
        /// Number of entries to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Write the execution log to a text file
    Export {
        /// Destination file
        path: PathBuf,
    },
}
