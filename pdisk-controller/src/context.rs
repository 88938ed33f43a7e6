//! Controller context
//!
//! Holds what the poll loop needs across iterations:
//! - Bootstrap configuration
//! - Document store handle
//! - Volume backend provider
//! - Heartbeat writer
//!
//! The service settings are the only mutable part. They are re-read on every
//! iteration by [`ControllerContext::refresh`], which produces a fresh
//! [`Iteration`] instead of mutating the context.

use anyhow::{Context as AnyhowContext, Result};
use pdisk_store::DocumentStore;
use std::sync::Arc;

use crate::backend::BackendProvider;
use crate::config::Config;
use crate::service::heartbeat::HeartbeatWriter;
use crate::service::protocol::RetryPolicy;
use crate::service::settings::{self, BackendSettings};
use crate::service::volumes::VolumeHandler;

/// State shared by every poll iteration
pub struct ControllerContext {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub backends: Arc<dyn BackendProvider>,
    pub heartbeat: HeartbeatWriter,
    pub retry: RetryPolicy,
}

/// Per-iteration view built from the current service settings
pub struct Iteration {
    pub settings: BackendSettings,
    pub handler: VolumeHandler,
}

impl ControllerContext {
    /// Creates the context once at startup
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        backends: Arc<dyn BackendProvider>,
    ) -> Self {
        let heartbeat =
            HeartbeatWriter::new(store.clone(), config.heartbeat_id(), config.heartbeat_ttl);
        let retry = config.retry_policy();

        Self {
            config,
            store,
            backends,
            heartbeat,
            retry,
        }
    }

    /// Loads the service settings and builds this iteration's backend
    pub async fn refresh(&self) -> Result<Iteration> {
        let settings = settings::load(self.store.as_ref(), &self.config.config_doc_id).await?;

        let backend = self
            .backends
            .backend(&settings)
            .with_context(|| format!("Failed to set up volume backend at {}", settings.endpoint))?;

        let handler = VolumeHandler::new(self.store.clone(), backend, self.retry.clone());

        Ok(Iteration { settings, handler })
    }
}
