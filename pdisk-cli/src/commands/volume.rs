//! Volume command handlers
//!
//! Creating or deleting a volume only submits a job; a running controller
//! picks it up on its next poll.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::*;
use pdisk_core::domain::job::{Job, JobAction};
use pdisk_core::domain::volume::{Volume, VolumeState, kilobytes_to_gigabytes};
use pdisk_core::keys;
use pdisk_store::{DocumentStore, KeyRange, Versioned, typed};

use crate::id_resolver::resolve_volume_id;

/// Volume subcommands
#[derive(Subcommand)]
pub enum VolumeCommands {
    /// Submit a new volume for creation
    Create {
        /// Requested size in kilobytes
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        capacity_kb: i64,

        /// Tag passed to the disk service
        #[arg(long)]
        name: Option<String>,
    },
    /// Submit a volume for deletion
    Delete {
        /// Volume ID or unambiguous prefix
        id: String,
    },
    /// List all volumes
    List,
    /// Get volume details
    Get {
        /// Volume ID or unambiguous prefix
        id: String,
    },
}

/// Handle volume commands
pub async fn handle_volume_command(
    command: VolumeCommands,
    store: &dyn DocumentStore,
) -> Result<()> {
    match command {
        VolumeCommands::Create { capacity_kb, name } => {
            let (volume_id, job_id) = submit_create(store, capacity_kb, name).await?;
            println!("{}", "✓ Volume submitted".green().bold());
            println!("  Volume: {}", volume_id.cyan());
            println!("  Job:    {}", job_id.cyan());
            println!(
                "  Size:   {} GB",
                kilobytes_to_gigabytes(capacity_kb).to_string().dimmed()
            );
            Ok(())
        }
        VolumeCommands::Delete { id } => {
            let volume_id = resolve_volume_id(store, &id).await?;
            let job_id = submit_delete(store, &volume_id).await?;
            println!("{}", "✓ Deletion submitted".green().bold());
            println!("  Volume: {}", volume_id.cyan());
            println!("  Job:    {}", job_id.cyan());
            Ok(())
        }
        VolumeCommands::List => list_volumes(store).await,
        VolumeCommands::Get { id } => get_volume(store, &id).await,
    }
}

/// Stores a pending volume and the job that creates it
///
/// Returns the volume and job ids.
pub async fn submit_create(
    store: &dyn DocumentStore,
    capacity_kb: i64,
    name: Option<String>,
) -> Result<(String, String)> {
    let now = Utc::now();
    let volume_id = keys::new_volume_id();
    let job_id = keys::new_job_id();

    typed::insert(store, &volume_id, &Volume::pending(capacity_kb, name, now))
        .await
        .with_context(|| format!("Failed to store volume {}", volume_id))?;

    typed::insert(store, &job_id, &Job::queued(JobAction::Create, &volume_id, now))
        .await
        .with_context(|| format!("Failed to store job {}", job_id))?;

    Ok((volume_id, job_id))
}

/// Stores a job deleting an existing volume
pub async fn submit_delete(store: &dyn DocumentStore, volume_id: &str) -> Result<String> {
    let volume = typed::get::<Volume>(store, volume_id)
        .await
        .with_context(|| format!("Failed to read volume {}", volume_id))?;

    if volume.value.backend_uuid().is_none() {
        anyhow::bail!(
            "Volume {} is {} and has no backend identifier; nothing to delete",
            volume_id,
            volume.value.state
        );
    }

    let job_id = keys::new_job_id();
    typed::insert(store, &job_id, &Job::queued(JobAction::Delete, volume_id, Utc::now()))
        .await
        .with_context(|| format!("Failed to store job {}", job_id))?;

    Ok(job_id)
}

async fn list_volumes(store: &dyn DocumentStore) -> Result<()> {
    let (volumes, failures) =
        typed::query::<Volume>(store, &KeyRange::prefix(keys::VOLUME_PREFIX)).await?;

    if volumes.is_empty() {
        println!("{}", "No volumes found.".yellow());
    } else {
        println!("{}", format!("Found {} volume(s):", volumes.len()).bold());
        println!();
        for volume in &volumes {
            print_volume_summary(volume);
        }
    }

    for failure in failures {
        println!("{} {}", "⚠".yellow(), failure.to_string().dimmed());
    }

    Ok(())
}

async fn get_volume(store: &dyn DocumentStore, id: &str) -> Result<()> {
    let id = resolve_volume_id(store, id).await?;
    let volume = typed::get::<Volume>(store, &id).await?;

    print_volume_details(&volume);

    Ok(())
}

fn print_volume_summary(volume: &Versioned<Volume>) {
    let value = &volume.value;

    println!("  {} {}", "▸".cyan(), volume.id.dimmed());
    println!("    State: {}", colorize_state(value.state));
    println!("    Size:  {}", size(value));
    if let Some(name) = &value.name {
        println!("    Name:  {}", name);
    }
    println!();
}

fn print_volume_details(volume: &Versioned<Volume>) {
    let value = &volume.value;

    println!("{}", "Volume Details:".bold());
    println!("  ID:       {}", volume.id.cyan());
    println!("  State:    {}", colorize_state(value.state));
    println!("  Size:     {}", size(value));

    if let Some(name) = &value.name {
        println!("  Name:     {}", name);
    }
    if let Some(uuid) = value.backend_uuid() {
        println!("  UUID:     {}", uuid);
    }
    if let Some(created) = value.created {
        println!("  Created:  {}", created.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(updated) = value.updated {
        println!("  Updated:  {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(message) = &value.properties.sl_msg {
        println!("\n{}", "Message:".bold());
        println!("{}", message.red());
    }
}

fn size(volume: &Volume) -> String {
    match (volume.capacity, volume.size_gb()) {
        (Some(kb), Some(gb)) => format!("{} KB ({} GB)", kb, gb),
        _ => "-".to_string(),
    }
}

/// Colorize volume state for display
fn colorize_state(state: VolumeState) -> ColoredString {
    let text = state.as_str();
    match state {
        VolumeState::Queued | VolumeState::Creating => text.yellow(),
        VolumeState::Available => text.green(),
        VolumeState::Error => text.red(),
        VolumeState::Deleting => text.dimmed(),
    }
}
