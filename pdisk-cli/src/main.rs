//! Persistent Disk CLI
//!
//! Command-line interface for submitting volume jobs and inspecting the
//! state the controllers leave in the document store.

mod commands;
mod config;
mod id_resolver;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "pdisk")]
#[command(about = "Persistent disk job CLI", long_about = None)]
struct Cli {
    /// Document store URL
    #[arg(long, env = "PDC_STORE_URL", default_value = "http://localhost:5984")]
    store_url: String,

    /// Bucket holding the controller documents
    #[arg(long, env = "PDC_BUCKET", default_value = "stratuslab")]
    bucket: String,

    /// Store user name
    #[arg(long, env = "PDC_USERNAME")]
    username: Option<String>,

    /// Store password
    #[arg(long, env = "PDC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        store_url: cli.store_url,
        bucket: cli.bucket,
        username: cli.username,
        password: cli.password,
    };

    handle_command(cli.command, &config).await
}
