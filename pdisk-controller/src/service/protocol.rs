//! Claim/update protocol
//!
//! All writes to jobs and volumes go through [`modify_record`]: read the
//! document, apply a checked mutation, write it back with the CAS from that
//! read. A CAS conflict restarts the whole read-check-write sequence after a
//! fixed delay, up to [`RetryPolicy::max_attempts`] times. A failed check
//! (wrong state, forbidden transition) is never retried.
//!
//! Claiming is the only write that races other controller instances; the
//! CAS on the job document is what makes at most one of them win.

use chrono::Utc;
use pdisk_core::domain::job::{Job, JobState, JobTransition, TransitionError};
use pdisk_core::domain::volume::{Volume, VolumeState};
use pdisk_store::{DocumentStore, StoreError, Versioned, typed};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bounded retry applied to CAS conflicts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of read-check-write attempts
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// No pause between attempts
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Errors from the update protocol
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The job was not in the expected state when read
    #[error("Job {id} is in state {actual}, expected {expected}")]
    WrongState {
        id: String,
        expected: JobState,
        actual: JobState,
    },

    /// The requested state change is not allowed
    #[error("Transition of {id} from {from} to {to} is not allowed")]
    InvalidTransition { id: String, from: String, to: String },

    /// Every attempt lost a CAS race
    #[error("Concurrent modification of {id} persisted after {attempts} attempt(s)")]
    ConcurrentModification { id: String, attempts: u32 },

    /// Any other store failure, including undecodable documents
    #[error(transparent)]
    Store(StoreError),
}

impl UpdateError {
    fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => UpdateError::NotFound(id),
            other => UpdateError::Store(other),
        }
    }

    fn from_transition(id: &str, err: TransitionError) -> Self {
        match err {
            TransitionError::WrongState { expected, actual } => UpdateError::WrongState {
                id: id.to_string(),
                expected,
                actual,
            },
            TransitionError::Invalid { from, to } => UpdateError::InvalidTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            },
        }
    }
}

/// Result of a successful claim
#[derive(Debug, Clone)]
pub struct Claimed(pub Versioned<Job>);

/// Why a claim did not happen
#[derive(Debug)]
pub enum NotClaimed {
    /// Another actor moved the job out of QUEUED first
    LostRace { actual: JobState },

    /// Conflicts persisted through every retry
    Contention { attempts: u32 },

    /// The job document is gone
    Missing,

    /// The store failed or the document could not be read
    Unavailable(UpdateError),
}

impl std::fmt::Display for NotClaimed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotClaimed::LostRace { actual } => write!(f, "already {}", actual),
            NotClaimed::Contention { attempts } => {
                write!(f, "still contended after {} attempt(s)", attempts)
            }
            NotClaimed::Missing => write!(f, "job document no longer exists"),
            NotClaimed::Unavailable(e) => write!(f, "{}", e),
        }
    }
}

/// Target of a volume update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeChange {
    /// Backend confirmed creation and assigned this uuid
    Available { uuid: String },
    /// Provisioning failed
    Error { message: String },
}

impl VolumeChange {
    fn target(&self) -> VolumeState {
        match self {
            VolumeChange::Available { .. } => VolumeState::Available,
            VolumeChange::Error { .. } => VolumeState::Error,
        }
    }
}

/// Read-check-write with bounded retry on CAS conflicts
///
/// When `seed` is given, the first attempt writes against its CAS instead
/// of reading again; later attempts always re-read. `mutate` runs on every
/// attempt against the freshly read record and may veto the write.
pub async fn modify_record<T, F>(
    store: &dyn DocumentStore,
    id: &str,
    seed: Option<Versioned<T>>,
    retry: &RetryPolicy,
    mut mutate: F,
) -> Result<Versioned<T>, UpdateError>
where
    T: Serialize + DeserializeOwned + Send + Sync,
    F: FnMut(&mut T) -> Result<(), UpdateError> + Send,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut seed = seed;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let mut record = match seed.take() {
            Some(record) => record,
            None => typed::get::<T>(store, id)
                .await
                .map_err(UpdateError::from_store)?,
        };

        mutate(&mut record.value)?;

        match typed::replace(store, id, &record.value, &record.cas).await {
            Ok(cas) => {
                return Ok(Versioned {
                    id: record.id,
                    cas,
                    value: record.value,
                });
            }
            Err(e) if e.is_conflict() => {
                if attempt >= max_attempts {
                    warn!(
                        "Giving up on {} after {} conflicting attempt(s)",
                        id, attempt
                    );
                    return Err(UpdateError::ConcurrentModification {
                        id: id.to_string(),
                        attempts: attempt,
                    });
                }

                debug!(
                    "Conflict writing {} (attempt {}/{}), retrying in {:?}",
                    id, attempt, max_attempts, retry.delay
                );
                tokio::time::sleep(retry.delay).await;
            }
            Err(e) => return Err(UpdateError::from_store(e)),
        }
    }
}

/// Moves a job from `transition.previous_state` to `transition.state`
///
/// Fails with [`UpdateError::WrongState`] without retrying if the job is not
/// in the expected state, and with [`UpdateError::ConcurrentModification`]
/// once conflicts exhaust the retry policy.
pub async fn update_job(
    store: &dyn DocumentStore,
    id: &str,
    transition: &JobTransition,
    retry: &RetryPolicy,
) -> Result<Versioned<Job>, UpdateError> {
    transition
        .validate()
        .map_err(|e| UpdateError::from_transition(id, e))?;

    let job = modify_record::<Job, _>(store, id, None, retry, |job| {
        job.apply(transition, Utc::now())
            .map_err(|e| UpdateError::from_transition(id, e))
    })
    .await?;

    info!(
        "Job {} moved {} -> {}",
        id, transition.previous_state, transition.state
    );

    Ok(job)
}

/// Claims a queued job for `executor`
///
/// Losing the race is an expected outcome, so nothing is raised; the reason
/// is returned for callers that care.
pub async fn claim_job(
    store: &dyn DocumentStore,
    id: &str,
    executor: &str,
    retry: &RetryPolicy,
) -> Result<Claimed, NotClaimed> {
    match update_job(store, id, &JobTransition::claim(executor), retry).await {
        Ok(job) => Ok(Claimed(job)),
        Err(UpdateError::WrongState { actual, .. }) => Err(NotClaimed::LostRace { actual }),
        Err(UpdateError::ConcurrentModification { attempts, .. }) => {
            Err(NotClaimed::Contention { attempts })
        }
        Err(UpdateError::NotFound(_)) => Err(NotClaimed::Missing),
        Err(e) => Err(NotClaimed::Unavailable(e)),
    }
}

/// Moves a volume to AVAILABLE or ERROR
///
/// `seed` is the volume as last read by the caller; its CAS guards the
/// first write.
pub async fn update_volume(
    store: &dyn DocumentStore,
    seed: Versioned<Volume>,
    change: &VolumeChange,
    retry: &RetryPolicy,
) -> Result<Versioned<Volume>, UpdateError> {
    let id = seed.id.clone();
    let target = change.target();

    let volume = modify_record::<Volume, _>(store, &id, Some(seed), retry, |volume| {
        if !volume.can_transition_to(target) {
            return Err(UpdateError::InvalidTransition {
                id: id.clone(),
                from: volume.state.to_string(),
                to: target.to_string(),
            });
        }

        let now = Utc::now();
        match change {
            VolumeChange::Available { uuid } => volume.mark_available(uuid.clone(), now),
            VolumeChange::Error { message } => volume.mark_error(message.clone(), now),
        }
        Ok(())
    })
    .await?;

    info!("Volume {} is now {}", id, target);

    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FaultyStore, seed_job, seed_volume};
    use pdisk_core::domain::job::JobAction;
    use pdisk_store::MemoryStore;
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy::immediate(3)
    }

    async fn job_state(store: &dyn DocumentStore, id: &str) -> JobState {
        typed::get::<Job>(store, id).await.unwrap().value.state
    }

    #[tokio::test]
    async fn test_claim_moves_queued_job_to_running() {
        let store = MemoryStore::new();
        let volume = seed_volume(&store, Some(1000)).await;
        let job = seed_job(&store, JobAction::Create, &volume).await;

        let Claimed(claimed) = claim_job(&store, &job, "node-a", &policy()).await.unwrap();

        assert_eq!(claimed.value.state, JobState::Running);
        assert_eq!(claimed.value.properties.sl_executor.as_deref(), Some("node-a"));
        assert_eq!(job_state(&store, &job).await, JobState::Running);
    }

    #[tokio::test]
    async fn test_second_claim_loses_race() {
        let store = MemoryStore::new();
        let volume = seed_volume(&store, Some(1000)).await;
        let job = seed_job(&store, JobAction::Create, &volume).await;

        claim_job(&store, &job, "node-a", &policy()).await.unwrap();
        let err = claim_job(&store, &job, "node-b", &policy()).await.unwrap_err();

        assert!(matches!(
            err,
            NotClaimed::LostRace {
                actual: JobState::Running
            }
        ));
        let stored = typed::get::<Job>(&store, &job).await.unwrap();
        assert_eq!(stored.value.properties.sl_executor.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_claim_of_missing_job() {
        let store = MemoryStore::new();
        let err = claim_job(&store, "Job/none", "node-a", &policy())
            .await
            .unwrap_err();
        assert!(matches!(err, NotClaimed::Missing));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_exactly_one_winner() {
        for contenders in [2usize, 5, 16] {
            let store = Arc::new(MemoryStore::new());
            let volume = seed_volume(&*store, Some(1000)).await;
            let job = seed_job(&*store, JobAction::Create, &volume).await;

            let mut handles = Vec::new();
            for n in 0..contenders {
                let store = Arc::clone(&store);
                let job = job.clone();
                handles.push(tokio::spawn(async move {
                    let executor = format!("node-{}", n);
                    claim_job(&*store, &job, &executor, &RetryPolicy::immediate(3))
                        .await
                        .map(|_| executor)
                }));
            }

            let mut winners = Vec::new();
            let mut losers = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(executor) => winners.push(executor),
                    Err(_) => losers += 1,
                }
            }

            assert_eq!(winners.len(), 1, "{} contenders", contenders);
            assert_eq!(losers, contenders - 1);

            let stored = typed::get::<Job>(&*store, &job).await.unwrap();
            assert_eq!(stored.value.state, JobState::Running);
            assert_eq!(stored.value.properties.sl_executor, Some(winners[0].clone()));
        }
    }

    #[tokio::test]
    async fn test_update_succeeds_when_conflicts_stay_within_bound() {
        for conflicts in [0, 1, 2] {
            let store = FaultyStore::new();
            let volume = seed_volume(&store, Some(1000)).await;
            let job = seed_job(&store, JobAction::Create, &volume).await;
            store.inject_conflicts(conflicts);

            let result = update_job(&store, &job, &JobTransition::claim("a"), &policy()).await;

            assert!(result.is_ok(), "{} conflicts", conflicts);
            assert_eq!(store.replace_calls(), conflicts + 1);
        }
    }

    #[tokio::test]
    async fn test_update_gives_up_after_max_attempts() {
        for conflicts in [3, 4, 10] {
            let store = FaultyStore::new();
            let volume = seed_volume(&store, Some(1000)).await;
            let job = seed_job(&store, JobAction::Create, &volume).await;
            store.inject_conflicts(conflicts);

            let err = update_job(&store, &job, &JobTransition::claim("a"), &policy())
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                UpdateError::ConcurrentModification { attempts: 3, .. }
            ));
            assert_eq!(store.replace_calls(), 3);
            assert_eq!(job_state(&store, &job).await, JobState::Queued);
        }
    }

    #[tokio::test]
    async fn test_retry_bound_is_configurable() {
        let store = FaultyStore::new();
        let volume = seed_volume(&store, Some(1000)).await;
        let job = seed_job(&store, JobAction::Create, &volume).await;
        store.inject_conflicts(4);

        let result = update_job(
            &store,
            &job,
            &JobTransition::claim("a"),
            &RetryPolicy::immediate(5),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(store.replace_calls(), 5);
    }

    #[tokio::test]
    async fn test_wrong_state_is_not_retried() {
        let store = FaultyStore::new();
        let volume = seed_volume(&store, Some(1000)).await;
        let job = seed_job(&store, JobAction::Create, &volume).await;

        let err = update_job(&store, &job, &JobTransition::succeed(), &policy())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UpdateError::WrongState {
                expected: JobState::Running,
                actual: JobState::Queued,
                ..
            }
        ));
        assert_eq!(store.replace_calls(), 0);
    }

    #[tokio::test]
    async fn test_backwards_transition_rejected_before_reading() {
        let store = FaultyStore::new();
        let transition = JobTransition {
            state: JobState::Queued,
            previous_state: JobState::Running,
            progress: 0,
            message: None,
            executor: None,
        };

        let err = update_job(&store, "Job/none", &transition, &policy())
            .await
            .unwrap_err();

        assert!(matches!(err, UpdateError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_job_states_form_forward_prefix() {
        let store = MemoryStore::new();
        let volume = seed_volume(&store, Some(1000)).await;
        let job = seed_job(&store, JobAction::Delete, &volume).await;
        let mut seen = vec![job_state(&store, &job).await];

        update_job(&store, &job, &JobTransition::claim("a"), &policy())
            .await
            .unwrap();
        seen.push(job_state(&store, &job).await);

        update_job(&store, &job, &JobTransition::fail("nope"), &policy())
            .await
            .unwrap();
        seen.push(job_state(&store, &job).await);

        // Nothing moves a terminal job
        for transition in [
            JobTransition::claim("b"),
            JobTransition::succeed(),
            JobTransition::fail("again"),
        ] {
            assert!(update_job(&store, &job, &transition, &policy()).await.is_err());
            seen.push(job_state(&store, &job).await);
        }

        assert_eq!(
            seen,
            vec![
                JobState::Queued,
                JobState::Running,
                JobState::Failed,
                JobState::Failed,
                JobState::Failed,
                JobState::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_update_volume_uses_seed_cas_then_rereads() {
        let store = FaultyStore::new();
        let id = seed_volume(&store, Some(1000)).await;
        let seed = typed::get::<Volume>(&store, &id).await.unwrap();
        store.inject_conflicts(1);

        let volume = update_volume(
            &store,
            seed,
            &VolumeChange::Available {
                uuid: "abc-123".to_string(),
            },
            &policy(),
        )
        .await
        .unwrap();

        assert_eq!(volume.value.state, VolumeState::Available);
        assert_eq!(volume.value.backend_uuid(), Some("abc-123"));
        assert_eq!(store.replace_calls(), 2);
    }

    #[tokio::test]
    async fn test_update_volume_rejects_invalid_transition() {
        let store = MemoryStore::new();
        let id = seed_volume(&store, Some(1000)).await;
        let seed = typed::get::<Volume>(&store, &id).await.unwrap();
        let available = update_volume(
            &store,
            seed,
            &VolumeChange::Available {
                uuid: "u-1".to_string(),
            },
            &policy(),
        )
        .await
        .unwrap();

        let err = update_volume(
            &store,
            available,
            &VolumeChange::Available {
                uuid: "u-2".to_string(),
            },
            &policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UpdateError::InvalidTransition { .. }));
        let stored = typed::get::<Volume>(&store, &id).await.unwrap();
        assert_eq!(stored.value.backend_uuid(), Some("u-1"));
    }
}
