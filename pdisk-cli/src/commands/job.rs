//! Job command handlers
//!
//! Lists and shows the jobs the controllers work on.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use pdisk_core::domain::job::{Job, JobState};
use pdisk_core::keys;
use pdisk_store::{DocumentStore, KeyRange, Versioned, typed};

use crate::id_resolver::resolve_job_id;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs
    List {
        /// Only show jobs in this state (queued, running, success, failed)
        #[arg(long)]
        state: Option<JobState>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Handle job commands
pub async fn handle_job_command(command: JobCommands, store: &dyn DocumentStore) -> Result<()> {
    match command {
        JobCommands::List { state } => list_jobs(store, state).await,
        JobCommands::Get { id } => get_job(store, &id).await,
    }
}

/// List jobs, optionally filtered by state
async fn list_jobs(store: &dyn DocumentStore, state: Option<JobState>) -> Result<()> {
    let (jobs, failures) = typed::query::<Job>(store, &KeyRange::prefix(keys::JOB_PREFIX)).await?;

    let jobs: Vec<_> = jobs
        .into_iter()
        .filter(|job| state.is_none_or(|state| job.value.state == state))
        .collect();

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in &jobs {
            print_job_summary(job);
        }
    }

    for failure in failures {
        println!("{} {}", "⚠".yellow(), failure.to_string().dimmed());
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(store: &dyn DocumentStore, id: &str) -> Result<()> {
    let id = resolve_job_id(store, id).await?;
    let job = typed::get::<Job>(store, &id).await?;

    print_job_details(&job);

    Ok(())
}

fn print_job_summary(job: &Versioned<Job>) {
    println!("  {} {}", "▸".cyan(), job.id.dimmed());
    println!(
        "    Action:   {} {}",
        job.value.action,
        target(&job.value).dimmed()
    );
    println!(
        "    State:    {} ({}%)",
        colorize_state(job.value.state),
        job.value.progress
    );
    if let Some(executor) = &job.value.properties.sl_executor {
        println!("    Executor: {}", executor.dimmed());
    }
    println!();
}

fn print_job_details(job: &Versioned<Job>) {
    let value = &job.value;

    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.id.cyan());
    println!("  Action:    {}", value.action);
    println!("  Target:    {}", target(value));
    println!("  State:     {}", colorize_state(value.state));
    println!("  Progress:  {}%", value.progress);

    if let Some(executor) = &value.properties.sl_executor {
        println!("  Executor:  {}", executor);
    }
    if let Some(created) = value.created {
        println!("  Created:   {}", created.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(changed) = value.time_of_status_change {
        println!("  Changed:   {}", changed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(created) = value.created {
            let seconds = changed.signed_duration_since(created).num_seconds();
            println!("  Age:       {}s", seconds);
        }
    }

    if let Some(message) = &value.status_message {
        println!("\n{}", "Message:".bold());
        if value.state == JobState::Failed {
            println!("{}", message.red());
        } else {
            println!("{}", message);
        }
    }
}

fn target(job: &Job) -> &str {
    job.target_resource
        .as_ref()
        .map(|target| target.href.as_str())
        .unwrap_or("-")
}

/// Colorize job state for display
fn colorize_state(state: JobState) -> ColoredString {
    let text = state.as_str();
    match state {
        JobState::Queued => text.yellow(),
        JobState::Running => text.cyan(),
        JobState::Success => text.green(),
        JobState::Failed => text.red(),
    }
}
