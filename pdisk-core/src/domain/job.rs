//! Job domain types
//!
//! A job is one unit of requested work against a volume. Jobs are created
//! externally in the `QUEUED` state and only ever move forward:
//! `QUEUED -> RUNNING -> SUCCESS | FAILED`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::keys;

/// Job document as stored in the document store
///
/// The document id is not part of the body; it travels alongside the
/// record (see `pdisk_store::Versioned`). Fields the controller does not
/// own are kept in `extra` so that write-backs never drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub state: JobState,
    #[serde(default)]
    pub progress: u8,
    pub action: JobAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub properties: JobProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_of_status_change: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Job execution state
///
/// Unknown state strings are rejected on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failed,
}

/// Requested action
///
/// The controller only handles `create` and `delete`; anything else is kept
/// verbatim so the document round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobAction {
    Create,
    Delete,
    Other(String),
}

/// Reference to the resource a job operates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub href: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Free-form job properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProperties {
    /// Identifier of the controller instance that claimed the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sl_executor: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A requested state change for a job
///
/// The change only applies when the job is currently in `previous_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTransition {
    pub state: JobState,
    pub previous_state: JobState,
    pub progress: u8,
    pub message: Option<String>,
    pub executor: Option<String>,
}

/// Reasons a transition cannot be applied to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The job is not in the state the transition expects
    WrongState { expected: JobState, actual: JobState },

    /// The transition itself is not allowed by the job state machine
    Invalid { from: JobState, to: JobState },
}

impl JobState {
    /// Whether a job may move from `self` to `next`
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Success)
                | (JobState::Running, JobState::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(JobState::Queued),
            "RUNNING" => Ok(JobState::Running),
            "SUCCESS" => Ok(JobState::Success),
            "FAILED" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

impl JobAction {
    pub fn as_str(&self) -> &str {
        match self {
            JobAction::Create => "create",
            JobAction::Delete => "delete",
            JobAction::Other(action) => action,
        }
    }
}

impl From<String> for JobAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "create" => JobAction::Create,
            "delete" => JobAction::Delete,
            _ => JobAction::Other(value),
        }
    }
}

impl From<JobAction> for String {
    fn from(action: JobAction) -> Self {
        match action {
            JobAction::Create => "create".to_string(),
            JobAction::Delete => "delete".to_string(),
            JobAction::Other(action) => action,
        }
    }
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::WrongState { expected, actual } => {
                write!(f, "job is in state {} (expected {})", actual, expected)
            }
            TransitionError::Invalid { from, to } => {
                write!(f, "transition {} -> {} is not allowed", from, to)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

impl JobTransition {
    /// QUEUED -> RUNNING, stamping the claiming executor
    pub fn claim(executor: impl Into<String>) -> Self {
        Self {
            state: JobState::Running,
            previous_state: JobState::Queued,
            progress: 0,
            message: None,
            executor: Some(executor.into()),
        }
    }

    /// RUNNING -> SUCCESS with full progress
    pub fn succeed() -> Self {
        Self {
            state: JobState::Success,
            previous_state: JobState::Running,
            progress: 100,
            message: None,
            executor: None,
        }
    }

    /// RUNNING -> FAILED with a diagnostic
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            previous_state: JobState::Running,
            progress: 0,
            message: Some(message.into()),
            executor: None,
        }
    }

    /// Checks the transition against the state machine, independent of any job
    pub fn validate(&self) -> Result<(), TransitionError> {
        if self.previous_state.can_transition_to(self.state) {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                from: self.previous_state,
                to: self.state,
            })
        }
    }
}

impl Job {
    /// Creates a new queued job targeting the given resource
    pub fn queued(action: JobAction, target: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            state: JobState::Queued,
            progress: 0,
            action,
            target_resource: Some(ResourceRef {
                href: target.into(),
                extra: Map::new(),
            }),
            status_message: None,
            properties: JobProperties::default(),
            created: Some(now),
            updated: Some(now),
            time_of_status_change: Some(now),
            extra: Map::new(),
        }
    }

    /// Id of the targeted volume, if the job targets one
    pub fn target_volume_id(&self) -> Option<&str> {
        self.target_resource
            .as_ref()
            .map(|target| target.href.as_str())
            .filter(|href| keys::is_volume_id(href))
    }

    /// Whether this controller should try to pick the job up
    pub fn is_candidate(&self) -> bool {
        self.state == JobState::Queued
            && matches!(self.action, JobAction::Create | JobAction::Delete)
            && self.target_volume_id().is_some()
    }

    /// Applies a transition in place
    ///
    /// Fails without modifying the job when the current state does not match
    /// the transition's previous state or the transition is not allowed.
    pub fn apply(
        &mut self,
        transition: &JobTransition,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.state != transition.previous_state {
            return Err(TransitionError::WrongState {
                expected: transition.previous_state,
                actual: self.state,
            });
        }
        transition.validate()?;

        self.state = transition.state;
        self.progress = transition.progress.min(100);
        self.updated = Some(now);
        self.time_of_status_change = Some(now);

        if let Some(message) = &transition.message {
            self.status_message = Some(message.clone());
        }
        if let Some(executor) = &transition.executor {
            self.properties.sl_executor = Some(executor.clone());
        }

        Ok(())
    }
}
