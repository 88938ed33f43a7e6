//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod heartbeat;
mod job;
mod volume;

pub use heartbeat::HeartbeatCommands;
pub use job::JobCommands;
pub use volume::VolumeCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Volume management
    Volume {
        #[command(subcommand)]
        command: VolumeCommands,
    },
    /// Job inspection
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Controller liveness
    Heartbeat {
        #[command(subcommand)]
        command: HeartbeatCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let store = config.store();

    match command {
        Commands::Volume { command } => volume::handle_volume_command(command, &store).await,
        Commands::Job { command } => job::handle_job_command(command, &store).await,
        Commands::Heartbeat { command } => {
            heartbeat::handle_heartbeat_command(command, &store).await
        }
    }
}
