//! Heartbeat domain model
//!
//! A heartbeat is a small status document each controller instance writes
//! on every poll iteration so external monitoring can see it is alive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness document written at `Heartbeat/<service>/<host>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub status: HeartbeatStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
}

/// Status reported by a controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HeartbeatStatus {
    /// Iteration completed normally
    Ok,

    /// Configuration or iteration failure; see `message`
    Error,

    /// The daemon has shut down cleanly
    Stopped,
}

impl std::fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeartbeatStatus::Ok => write!(f, "OK"),
            HeartbeatStatus::Error => write!(f, "ERROR"),
            HeartbeatStatus::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl Heartbeat {
    pub fn new(status: HeartbeatStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(HeartbeatStatus::Ok, "")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(HeartbeatStatus::Error, message)
    }

    pub fn stopped() -> Self {
        Self::new(HeartbeatStatus::Stopped, "")
    }
}
