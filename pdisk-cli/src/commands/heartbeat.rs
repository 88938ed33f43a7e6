//! Heartbeat command handlers

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::*;
use pdisk_core::domain::heartbeat::{Heartbeat, HeartbeatStatus};
use pdisk_core::keys;
use pdisk_store::{DocumentStore, KeyRange, Versioned, typed};

/// Heartbeat subcommands
#[derive(Subcommand)]
pub enum HeartbeatCommands {
    /// Show controller heartbeats
    Get {
        /// Service name
        #[arg(long, default_value = "pdc")]
        service: String,

        /// Only show this host; all hosts of the service otherwise
        #[arg(long)]
        host: Option<String>,
    },
}

/// Handle heartbeat commands
pub async fn handle_heartbeat_command(
    command: HeartbeatCommands,
    store: &dyn DocumentStore,
) -> Result<()> {
    match command {
        HeartbeatCommands::Get { service, host } => match host {
            Some(host) => get_heartbeat(store, &service, &host).await,
            None => list_heartbeats(store, &service).await,
        },
    }
}

async fn get_heartbeat(store: &dyn DocumentStore, service: &str, host: &str) -> Result<()> {
    let id = keys::heartbeat_id(service, host);
    let heartbeat = typed::get::<Heartbeat>(store, &id)
        .await
        .with_context(|| format!("No heartbeat at {}", id))?;

    print_heartbeat(&heartbeat);
    Ok(())
}

async fn list_heartbeats(store: &dyn DocumentStore, service: &str) -> Result<()> {
    let prefix = keys::heartbeat_id(service, "");
    let (heartbeats, failures) =
        typed::query::<Heartbeat>(store, &KeyRange::prefix(prefix)).await?;

    if heartbeats.is_empty() {
        println!(
            "{}",
            format!("No heartbeats found for service {}.", service).yellow()
        );
    }
    for heartbeat in &heartbeats {
        print_heartbeat(heartbeat);
    }

    for failure in failures {
        println!("{} {}", "⚠".yellow(), failure.to_string().dimmed());
    }

    Ok(())
}

fn print_heartbeat(heartbeat: &Versioned<Heartbeat>) {
    let value = &heartbeat.value;
    let age = Utc::now()
        .signed_duration_since(value.timestamp)
        .num_seconds();

    println!(
        "  {} {} {} {}",
        "▸".cyan(),
        heartbeat.id,
        colorize_status(value.status),
        format!("{}s ago", age).dimmed()
    );
    if !value.message.is_empty() {
        println!("    {}", value.message);
    }
}

fn colorize_status(status: HeartbeatStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        HeartbeatStatus::Ok => text.green(),
        HeartbeatStatus::Error => text.red(),
        HeartbeatStatus::Stopped => text.dimmed(),
    }
}
