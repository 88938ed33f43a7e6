//! Service layer for the controller
//!
//! Business logic sitting between the poll loop and the document store:
//! - `protocol`: CAS-protected job and volume updates
//! - `volumes`: create/delete job handlers
//! - `settings`: per-iteration service configuration
//! - `heartbeat`: liveness reporting

pub mod heartbeat;
pub mod protocol;
pub mod settings;
pub mod volumes;
