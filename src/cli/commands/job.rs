use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::adapters::anthropic::AnthropicClient;
use crate::adapters::mock::MockProvider;
use crate::adapters::sqlite::{create_pool, SqliteJobStore};
use crate::cli::output::format_jobs_table;
use crate::cli::{JobIdArgs, StatusArgs, SubmitArgs};
use crate::domain::models::job::{JobRecord, JobStatus, StatusOptions};
use crate::domain::models::role::{ExecutionMode, Problem};
use crate::domain::models::Config;
use crate::domain::ports::provider::CompletionProvider;
use crate::jobs::{JobManager, SubmitOptions};

/// Wire the job manager from configuration: database pool, store, and the
/// selected provider backend.
pub async fn build_manager(config: &Config) -> Result<JobManager> {
    let pool = create_pool(&config.database).await?;
    let store = Arc::new(SqliteJobStore::new(pool));

    let provider: Arc<dyn CompletionProvider> = match config.provider.backend.as_str() {
        "mock" => Arc::new(MockProvider::demo()),
        "anthropic" => Arc::new(AnthropicClient::new(config)?),
        other => bail!("unknown provider backend '{other}' (expected 'anthropic' or 'mock')"),
    };

    Ok(JobManager::new(store, provider, config))
}

pub async fn handle_submit(manager: &JobManager, args: SubmitArgs, json: bool) -> Result<()> {
    let mode = ExecutionMode::from_str(&args.mode)
        .with_context(|| format!("invalid mode '{}' (expected 'single' or 'coordinated')", args.mode))?;

    let mut problem = Problem::new(args.question);
    problem.context = args.context;
    problem.constraints = args.constraints;

    let options = SubmitOptions {
        mode,
        max_iterations: args.max_iterations,
        subordinate_max_iterations: args.subordinate_max_iterations,
        delegation_depth: args.delegation_depth,
        model: args.model,
        stop_marker: args.stop_marker,
    };

    let id = manager
        .submit(problem, options)
        .await
        .context("Failed to submit job")?;

    if args.detach {
        if json {
            println!("{}", serde_json::json!({ "job_id": id }));
        } else {
            println!("Job submitted.");
            println!("  Job ID: {id}");
        }
        return Ok(());
    }

    let record = manager
        .wait_terminal(id, Duration::from_secs(args.timeout))
        .await
        .context("Failed while waiting for the job")?;
    print_record(&record, json)?;
    Ok(())
}

pub async fn handle_status(manager: &JobManager, args: StatusArgs, json: bool) -> Result<()> {
    let record = manager
        .status(
            args.job_id,
            StatusOptions {
                include_history: args.history,
                include_partial: args.partial,
            },
        )
        .await
        .context("Failed to fetch job status")?;
    print_record(&record, json)?;
    Ok(())
}

pub async fn handle_cancel(manager: &JobManager, args: JobIdArgs, json: bool) -> Result<()> {
    let record = manager
        .cancel(args.job_id)
        .await
        .context("Failed to cancel job")?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "job_id": args.job_id, "status": record.status.as_str() })
        );
    } else if record.status.is_terminal() && record.status != JobStatus::Cancelled {
        println!(
            "Job {} already finished ({}); nothing to cancel.",
            args.job_id,
            record.status.as_str()
        );
    } else {
        println!("Cancellation requested for job {}.", args.job_id);
    }
    Ok(())
}

pub async fn handle_purge(manager: &JobManager, args: JobIdArgs, json: bool) -> Result<()> {
    manager
        .purge(args.job_id)
        .await
        .context("Failed to purge job")?;

    if json {
        println!("{}", serde_json::json!({ "job_id": args.job_id, "purged": true }));
    } else {
        println!("Job {} purged.", args.job_id);
    }
    Ok(())
}

pub async fn handle_jobs(manager: &JobManager, json: bool) -> Result<()> {
    let records = manager.list().await.context("Failed to list jobs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No jobs found.");
    } else {
        println!("{}", format_jobs_table(&records));
        println!("\n{} job(s)", records.len());
    }
    Ok(())
}

fn print_record(record: &JobRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!("Job {}", record.id);
    println!("  Status: {}", record.status.as_str());
    println!("  Mode: {}", record.mode.as_str());
    println!("  Progress: {:.0}%", record.progress * 100.0);
    if let Some(phase) = &record.current_phase {
        println!("  Phase: {phase}");
    }
    if let Some(partial) = &record.partial {
        println!(
            "  Partial: {} iteration(s), {} engine(s) running",
            partial.iterations,
            partial.engines_started - partial.engines_finished
        );
    }
    if let Some(error) = &record.error {
        println!("  Error: {error}");
    }
    if let Some(result) = &record.result {
        println!("  Converged: {}", result.converged);
        println!("  Stop reason: {}", result.stop_reason.as_str());
        println!("  Iterations: {}", result.iterations);
        let usage = result.total_usage();
        println!(
            "  Tokens: {} in / {} out",
            usage.input_tokens, usage.output_tokens
        );
        if !result.delegations.is_empty() {
            println!("  Delegations:");
            for delegation in &result.delegations {
                println!(
                    "    - {} ({}, {} iteration(s))",
                    delegation.specialization,
                    delegation.result.stop_reason.as_str(),
                    delegation.result.iterations
                );
            }
        }
        println!("\n{}", result.artifact);
    }
    Ok(())
}
