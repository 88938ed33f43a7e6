//! Heartbeat service
//!
//! Writes this instance's liveness document. Heartbeats are best effort:
//! a failed write is logged and otherwise ignored.

use pdisk_core::domain::heartbeat::Heartbeat;
use pdisk_store::{DocumentStore, typed};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Writes heartbeats to a fixed document id
#[derive(Clone)]
pub struct HeartbeatWriter {
    store: Arc<dyn DocumentStore>,
    id: String,
    ttl: Option<Duration>,
}

impl HeartbeatWriter {
    pub fn new(store: Arc<dyn DocumentStore>, id: String, ttl: Option<Duration>) -> Self {
        Self { store, id, ttl }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Writes `heartbeat`, returning whether the write succeeded
    pub async fn beat(&self, heartbeat: Heartbeat) -> bool {
        debug!("Sending {} heartbeat to {}", heartbeat.status, self.id);

        match typed::set(self.store.as_ref(), &self.id, &heartbeat, self.ttl).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to write heartbeat {}: {}", self.id, e);
                false
            }
        }
    }
}
