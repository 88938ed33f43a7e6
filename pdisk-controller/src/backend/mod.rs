//! Volume provisioning backend
//!
//! The backend physically allocates and destroys storage. The controller
//! only needs two operations from it and treats any error as terminal for
//! the job at hand.
//!
//! Backends are built per iteration from the service settings, since the
//! endpoint and credentials can change while the daemon runs.

mod http;

pub use http::HttpBackendProvider;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::service::settings::BackendSettings;

/// Parameters of a volume creation
///
/// Volumes are always created private to the owning account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVolumeRequest {
    /// Size in whole gigabytes
    pub size_gb: u64,
    /// Optional tag shown by the backend
    pub tag: Option<String>,
}

/// Backend trait for volume lifecycle operations
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Creates a volume and returns the backend-assigned identifier
    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<String>;

    /// Destroys the volume with the given identifier
    async fn delete_volume(&self, uuid: &str) -> Result<()>;
}

/// Builds a backend from validated settings
pub trait BackendProvider: Send + Sync {
    fn backend(&self, settings: &BackendSettings) -> Result<Arc<dyn VolumeBackend>>;
}
