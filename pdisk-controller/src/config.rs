//! Controller configuration
//!
//! Bootstrap settings for the daemon: where the document store lives, who
//! this instance is, and how the poll loop and retry protocol are paced.
//! The volume backend credentials are not part of this; they live in the
//! service configuration document and are re-read every iteration (see
//! `service::settings`).

use pdisk_core::keys;
use std::str::FromStr;
use std::time::Duration;

use crate::service::protocol::RetryPolicy;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Document store base URL (e.g., "http://localhost:5984")
    pub store_url: String,

    /// Bucket (database) holding jobs, volumes and heartbeats
    pub bucket: String,

    /// Store credentials, if the store requires them
    pub username: Option<String>,
    pub password: Option<String>,

    /// Id of the service configuration document
    pub config_doc_id: String,

    /// Service name used in the heartbeat id
    pub service: String,

    /// Host name used in the heartbeat id
    pub hostname: String,

    /// Value stamped into `properties.sl_executor` of claimed jobs
    pub executor_id: String,

    /// Pause between poll iterations
    pub poll_interval: Duration,

    /// Attempts made by the update protocol before giving up on a conflict
    pub max_retries: u32,

    /// Delay between conflicting attempts
    pub retry_delay: Duration,

    /// Expiry applied to heartbeat documents
    pub heartbeat_ttl: Option<Duration>,

    /// HTTP timeout for volume backend calls
    pub backend_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(store_url: String, hostname: String) -> Self {
        let executor_id = format!("{}-{}", hostname, uuid::Uuid::new_v4());
        Self {
            store_url,
            bucket: "stratuslab".to_string(),
            username: None,
            password: None,
            config_doc_id: keys::DEFAULT_CONFIG_DOC.to_string(),
            service: "pdc".to_string(),
            hostname,
            executor_id,
            poll_interval: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            heartbeat_ttl: None,
            backend_timeout: Duration::from_secs(60),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - PDC_STORE_URL (default: http://localhost:5984)
    /// - PDC_BUCKET (default: stratuslab)
    /// - PDC_USERNAME, PDC_PASSWORD
    /// - PDC_CONFIG_DOC (default: Configuration/pdc)
    /// - PDC_SERVICE (default: pdc)
    /// - PDC_HOSTNAME, falling back to HOSTNAME (default: localhost)
    /// - PDC_EXECUTOR_ID (default: <hostname>-<uuid>)
    /// - PDC_POLL_INTERVAL (seconds, default: 10)
    /// - PDC_MAX_RETRIES (default: 3)
    /// - PDC_RETRY_DELAY_MS (default: 2000)
    /// - PDC_HEARTBEAT_TTL (seconds, default: 0 = never expires)
    /// - PDC_BACKEND_TIMEOUT (seconds, default: 60)
    pub fn from_env() -> anyhow::Result<Self> {
        let store_url = env_var("PDC_STORE_URL").unwrap_or_else(|| "http://localhost:5984".into());
        let hostname = env_var("PDC_HOSTNAME")
            .or_else(|| env_var("HOSTNAME"))
            .unwrap_or_else(|| "localhost".into());

        let mut config = Self::new(store_url, hostname);

        if let Some(bucket) = env_var("PDC_BUCKET") {
            config.bucket = bucket;
        }
        config.username = env_var("PDC_USERNAME");
        config.password = env_var("PDC_PASSWORD");
        if let Some(doc) = env_var("PDC_CONFIG_DOC") {
            config.config_doc_id = doc;
        }
        if let Some(service) = env_var("PDC_SERVICE") {
            config.service = service;
        }
        if let Some(executor_id) = env_var("PDC_EXECUTOR_ID") {
            config.executor_id = executor_id;
        }
        if let Some(secs) = parse_env::<u64>("PDC_POLL_INTERVAL")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_env::<u32>("PDC_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(millis) = parse_env::<u64>("PDC_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(millis);
        }
        if let Some(secs) = parse_env::<u64>("PDC_HEARTBEAT_TTL")? {
            config.heartbeat_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_env::<u64>("PDC_BACKEND_TIMEOUT")? {
            config.backend_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Retry discipline for CAS-protected writes
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    /// Id of this instance's heartbeat document
    pub fn heartbeat_id(&self) -> String {
        keys::heartbeat_id(&self.service, &self.hostname)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.store_url.starts_with("http://") && !self.store_url.starts_with("https://") {
            anyhow::bail!("store_url must start with http:// or https://");
        }

        if self.bucket.is_empty() {
            anyhow::bail!("bucket cannot be empty");
        }

        if self.config_doc_id.is_empty() {
            anyhow::bail!("config_doc_id cannot be empty");
        }

        if self.service.is_empty() || self.hostname.is_empty() {
            anyhow::bail!("service and hostname cannot be empty");
        }

        if self.executor_id.is_empty() {
            anyhow::bail!("executor_id cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }

        if self.backend_timeout.is_zero() {
            anyhow::bail!("backend_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("http://localhost:5984".to_string(), "localhost".to_string())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_env<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", name, raw, e))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.config_doc_id, "Configuration/pdc");
        assert!(config.executor_id.starts_with("localhost-"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Invalid URL should fail
        config.store_url = "localhost:5984".to_string();
        assert!(config.validate().is_err());

        config.store_url = "https://couch.example.org".to_string();
        assert!(config.validate().is_ok());

        // No retries at all is not a valid protocol
        config.max_retries = 0;
        assert!(config.validate().is_err());
        config.max_retries = 3;

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_id() {
        let mut config = Config::default();
        config.hostname = "node-7".to_string();
        assert_eq!(config.heartbeat_id(), "Heartbeat/pdc/node-7");
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let mut config = Config::default();
        config.max_retries = 5;
        config.retry_delay = Duration::from_millis(10);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(10));
    }
}
