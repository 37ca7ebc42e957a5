//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "crucible",
    version,
    about = "Iterative refinement jobs over a generate/evaluate/refine engine"
)]
pub struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a problem for iterative refinement
    Submit(SubmitArgs),
    /// Show the status of a job
    Status(StatusArgs),
    /// Request cooperative cancellation of a job
    Cancel(JobIdArgs),
    /// Delete a job's record entirely
    Purge(JobIdArgs),
    /// List all live jobs
    Jobs,
}

#[derive(Args)]
pub struct SubmitArgs {
    /// The question or task to refine
    pub question: String,

    /// Supplementary context for the problem
    #[arg(long)]
    pub context: Option<String>,

    /// Constraints the answer must satisfy
    #[arg(long)]
    pub constraints: Option<String>,

    /// Orchestration mode: single or coordinated
    #[arg(long, default_value = "single")]
    pub mode: String,

    /// Iteration cap for the root role
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Iteration cap for each subordinate role
    #[arg(long)]
    pub subordinate_max_iterations: Option<u32>,

    /// Delegation levels below the root coordinator
    #[arg(long)]
    pub delegation_depth: Option<u32>,

    /// Model selector, overriding the configured default
    #[arg(long)]
    pub model: Option<String>,

    /// Convergence marker, overriding the configured default
    #[arg(long)]
    pub stop_marker: Option<String>,

    /// Print the job id and return without waiting for the result
    #[arg(long)]
    pub detach: bool,

    /// Seconds to wait for the result before giving up
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

#[derive(Args)]
pub struct StatusArgs {
    pub job_id: Uuid,

    /// Include full evolution histories
    #[arg(long)]
    pub history: bool,

    /// Include the in-progress partial result
    #[arg(long)]
    pub partial: bool,
}

#[derive(Args)]
pub struct JobIdArgs {
    pub job_id: Uuid,
}

/// Print an error in the selected format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json: bool) -> ! {
    if json {
        let payload = serde_json::json!({ "error": err.to_string() });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
