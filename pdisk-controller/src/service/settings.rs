//! Service settings
//!
//! The controller's runtime settings live in a document in the store so
//! operators can change them without restarting the daemon. The document
//! is re-read and validated at the start of every poll iteration.

use anyhow::{Context, Result};
use pdisk_store::{DocumentStore, typed};
use serde::Deserialize;

/// Service configuration document as stored
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSettings {
    #[serde(default)]
    pub pdisk_endpoint: Option<String>,
    #[serde(default)]
    pub pdisk_username: Option<String>,
    #[serde(default)]
    pub pdisk_password: Option<String>,
}

/// Validated volume backend connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub endpoint: String,
    pub username: String,
    pub password: String,
}

impl ServiceSettings {
    /// Checks that every required key is present and non-empty
    ///
    /// All missing keys are reported in one message.
    pub fn validate(&self) -> Result<BackendSettings> {
        let required = [
            ("pdisk_endpoint", &self.pdisk_endpoint),
            ("pdisk_username", &self.pdisk_username),
            ("pdisk_password", &self.pdisk_password),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(key, _)| *key)
            .collect();

        if !missing.is_empty() {
            anyhow::bail!("missing configuration value(s): {}", missing.join(", "));
        }

        Ok(BackendSettings {
            endpoint: self.pdisk_endpoint.clone().unwrap_or_default(),
            username: self.pdisk_username.clone().unwrap_or_default(),
            password: self.pdisk_password.clone().unwrap_or_default(),
        })
    }
}

/// Reads and validates the service configuration document
pub async fn load(store: &dyn DocumentStore, doc_id: &str) -> Result<BackendSettings> {
    let settings = typed::get::<ServiceSettings>(store, doc_id)
        .await
        .with_context(|| format!("Failed to read configuration document {}", doc_id))?;

    settings
        .value
        .validate()
        .with_context(|| format!("Invalid configuration document {}", doc_id))
}
