//! HTTP volume backend
//!
//! JSON REST client for the persistent disk service:
//! - `POST {endpoint}/disks` with `{size, tag, visibility}` returns `{uuid}`
//! - `DELETE {endpoint}/disks/{uuid}`
//!
//! Every request carries HTTP basic auth with the service credentials.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{BackendProvider, CreateVolumeRequest, VolumeBackend};
use crate::service::settings::BackendSettings;

const PRIVATE: &str = "private";

/// HTTP implementation of VolumeBackend
pub struct HttpVolumeBackend {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
}

impl HttpVolumeBackend {
    /// Creates a new HTTP volume backend
    ///
    /// # Arguments
    /// * `settings` - Endpoint and credentials of the disk service
    /// * `client` - A configured reqwest Client
    pub fn new(settings: &BackendSettings, client: Client) -> Self {
        Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Appends percent-encoded path segments to the endpoint
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid disk service endpoint '{}'", self.endpoint))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Disk service endpoint '{}' cannot be a base", self.endpoint))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl VolumeBackend for HttpVolumeBackend {
    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<String> {
        let url = self.url(&["disks"])?;
        debug!("Creating {} GB volume at {}", request.size_gb, url);

        let response = self
            .client
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&CreateDiskBody {
                size: request.size_gb,
                tag: request.tag.as_deref(),
                visibility: PRIVATE,
            })
            .send()
            .await
            .context("Failed to reach disk service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to create volume: {} - {}", status, body);
        }

        let created = response
            .json::<CreatedDisk>()
            .await
            .context("Failed to parse disk creation response")?;

        if created.uuid.is_empty() {
            anyhow::bail!("Disk service returned an empty volume identifier");
        }

        Ok(created.uuid)
    }

    async fn delete_volume(&self, uuid: &str) -> Result<()> {
        let url = self.url(&["disks", uuid])?;
        debug!("Deleting volume {} at {}", uuid, url);

        let response = self
            .client
            .delete(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .context("Failed to reach disk service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to delete volume {}: {} - {}", uuid, status, body);
        }

        Ok(())
    }
}

/// Builds [`HttpVolumeBackend`]s sharing one HTTP client
pub struct HttpBackendProvider {
    client: Client,
}

impl HttpBackendProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for the disk service")?;
        Ok(Self { client })
    }
}

impl BackendProvider for HttpBackendProvider {
    fn backend(&self, settings: &BackendSettings) -> Result<Arc<dyn VolumeBackend>> {
        if !settings.endpoint.starts_with("http://") && !settings.endpoint.starts_with("https://")
        {
            anyhow::bail!(
                "disk service endpoint '{}' must start with http:// or https://",
                settings.endpoint
            );
        }
        let backend = HttpVolumeBackend::new(settings, self.client.clone());
        debug!("Using disk service at {}", backend.endpoint());
        Ok(Arc::new(backend))
    }
}

#[derive(Debug, Serialize)]
struct CreateDiskBody<'a> {
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
    visibility: &'static str,
}

#[derive(Debug, Deserialize)]
struct CreatedDisk {
    uuid: String,
}
