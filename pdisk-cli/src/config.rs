//! Configuration module
//!
//! Connection settings for the document store shared with the controller.

use pdisk_store::CouchStore;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the document store
    pub store_url: String,
    /// Bucket (database) holding jobs, volumes and heartbeats
    pub bucket: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Config {
    /// Opens a client for the configured store
    pub fn store(&self) -> CouchStore {
        let store = CouchStore::new(&self.store_url, &self.bucket);
        match &self.username {
            Some(username) => store.with_credentials(username.clone(), self.password.clone()),
            None => store,
        }
    }
}
