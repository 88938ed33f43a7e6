//! Volume domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const BYTES_PER_KILOBYTE: u128 = 1_000;
const BYTES_PER_GIGABYTE: u128 = 1_000_000_000;

/// Volume document as stored in the document store
///
/// `properties.sl_uuid` is only ever set together with the `AVAILABLE`
/// state, through [`Volume::mark_available`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub state: VolumeState,
    /// Requested size in kilobytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
    /// Optional tag passed to the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: VolumeProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Volume lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeState {
    Queued,
    Creating,
    Available,
    Error,
    Deleting,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeProperties {
    /// Backend-assigned volume identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sl_uuid: Option<String>,
    /// Last diagnostic written by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sl_msg: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VolumeState {
    /// QUEUED and CREATING both mean "waiting for the backend"
    pub fn is_pending(self) -> bool {
        matches!(self, VolumeState::Queued | VolumeState::Creating)
    }

    /// Whether a volume may move from `self` to `next`
    pub fn can_transition_to(self, next: VolumeState) -> bool {
        match (self, next) {
            (from, VolumeState::Available) => from.is_pending(),
            (VolumeState::Queued, VolumeState::Creating) => true,
            (VolumeState::Available, VolumeState::Deleting) => true,
            (from, VolumeState::Error) => from != VolumeState::Error,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VolumeState::Queued => "QUEUED",
            VolumeState::Creating => "CREATING",
            VolumeState::Available => "AVAILABLE",
            VolumeState::Error => "ERROR",
            VolumeState::Deleting => "DELETING",
        }
    }
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Volume {
    /// Creates a new volume waiting to be provisioned
    pub fn pending(capacity_kb: i64, name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            state: VolumeState::Creating,
            capacity: Some(capacity_kb),
            name,
            properties: VolumeProperties::default(),
            created: Some(now),
            updated: Some(now),
            extra: Map::new(),
        }
    }

    /// Requested size rounded up to whole gigabytes, if a capacity is set
    pub fn size_gb(&self) -> Option<u64> {
        self.capacity.map(kilobytes_to_gigabytes)
    }

    /// Whether the backend may be asked to provision this volume
    ///
    /// Pending volumes qualify, and so do ERROR volumes that never got a
    /// backend identifier, so that a resubmitted create job can recover.
    pub fn awaits_creation(&self) -> bool {
        self.state.is_pending()
            || (self.state == VolumeState::Error && self.backend_uuid().is_none())
    }

    /// Whether this volume may move to `next`
    ///
    /// Like [`VolumeState::can_transition_to`], except that an ERROR volume
    /// without a backend identifier may still become AVAILABLE.
    pub fn can_transition_to(&self, next: VolumeState) -> bool {
        match next {
            VolumeState::Available => self.awaits_creation(),
            _ => self.state.can_transition_to(next),
        }
    }

    /// Backend identifier, once the volume has been created
    pub fn backend_uuid(&self) -> Option<&str> {
        self.properties.sl_uuid.as_deref()
    }

    /// Records a successful creation on the backend
    pub fn mark_available(&mut self, uuid: impl Into<String>, now: DateTime<Utc>) {
        self.state = VolumeState::Available;
        self.properties.sl_uuid = Some(uuid.into());
        self.properties.sl_msg = None;
        self.updated = Some(now);
    }

    /// Records a failure; any existing backend identifier is kept
    pub fn mark_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.state = VolumeState::Error;
        self.properties.sl_msg = Some(message.into());
        self.updated = Some(now);
    }
}

/// Converts a capacity in kilobytes into whole gigabytes, rounding up
///
/// Zero and negative capacities clamp to zero.
pub fn kilobytes_to_gigabytes(kilobytes: i64) -> u64 {
    let bytes = u128::try_from(kilobytes.max(0)).unwrap_or(0) * BYTES_PER_KILOBYTE;
    let gigabytes = bytes.div_ceil(BYTES_PER_GIGABYTE);
    u64::try_from(gigabytes).unwrap_or(u64::MAX)
}
