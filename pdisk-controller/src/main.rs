//! Persistent Disk Controller
//!
//! A polling daemon that provisions and destroys persistent disk volumes.
//!
//! Architecture:
//! - Configuration: Load bootstrap settings from environment or defaults
//! - Context: Store handle, backend provider and heartbeat, shared by iterations
//! - Services: Claim/update protocol, volume handlers, settings, heartbeats
//! - Scheduler: Job polling and lifecycle management
//!
//! Any number of controllers may run against the same document store; the
//! CAS token on each job document decides which one executes it.

mod backend;
mod config;
mod context;
mod scheduler;
mod service;
#[cfg(test)]
mod testing;

use anyhow::{Context as AnyhowContext, Result};
use pdisk_store::{CouchStore, DocumentStore};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::HttpBackendProvider;
use crate::config::Config;
use crate::context::ControllerContext;
use crate::scheduler::JobPoller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdisk_controller=info,pdisk_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Persistent Disk Controller");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate()?;
    info!(
        "Loaded configuration: executor_id={}, store_url={}, bucket={}",
        config.executor_id, config.store_url, config.bucket
    );

    // Initialize document store
    let client = reqwest::Client::builder()
        .timeout(config.backend_timeout)
        .build()
        .context("Failed to build store HTTP client")?;
    let mut couch = CouchStore::with_client(&config.store_url, &config.bucket, client);
    if let Some(username) = &config.username {
        couch = couch.with_credentials(username.clone(), config.password.clone());
    }
    let store: Arc<dyn DocumentStore> = Arc::new(couch);

    info!("Document store client initialized");

    let backends = Arc::new(HttpBackendProvider::new(config.backend_timeout)?);

    info!(
        "Poll interval: {:?}, retries: {} x {:?}",
        config.poll_interval, config.max_retries, config.retry_delay
    );

    let context = ControllerContext::new(config, store, backends);
    let poller = JobPoller::new(context);

    // Start polling loop
    info!("Starting job polling loop");
    if let Err(e) = poller.run(shutdown_signal()).await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    info!("Controller stopped");
    Ok(())
}

/// Completes on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
