//! Document id conventions
//!
//! Every document kind lives under its own id prefix, which is what lets
//! the controller discover jobs with a single range query.

use uuid::Uuid;

pub const JOB_PREFIX: &str = "Job/";
pub const VOLUME_PREFIX: &str = "Volume/";
pub const HEARTBEAT_PREFIX: &str = "Heartbeat/";

/// Default id of the controller's service configuration document
pub const DEFAULT_CONFIG_DOC: &str = "Configuration/pdc";

pub fn new_job_id() -> String {
    format!("{}{}", JOB_PREFIX, Uuid::new_v4())
}

pub fn new_volume_id() -> String {
    format!("{}{}", VOLUME_PREFIX, Uuid::new_v4())
}

pub fn heartbeat_id(service: &str, host: &str) -> String {
    format!("{}{}/{}", HEARTBEAT_PREFIX, service, host)
}

pub fn is_volume_id(id: &str) -> bool {
    id.len() > VOLUME_PREFIX.len() && id.starts_with(VOLUME_PREFIX)
}

/// Prepends `prefix` unless `id` already carries it
pub fn qualify(prefix: &str, id: &str) -> String {
    if id.starts_with(prefix) {
        id.to_string()
    } else {
        format!("{}{}", prefix, id)
    }
}
