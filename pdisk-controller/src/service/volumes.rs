//! Volume job handlers
//!
//! Executes claimed `create` and `delete` jobs against the volume backend
//! and records the outcome on both the volume and the job document.
//!
//! Expected failures (missing volume, missing capacity, backend errors,
//! a lost race on the volume record) end the job as FAILED and are returned
//! as [`JobOutcome::Failed`]. An `Err` means the handler could not even
//! record the outcome, and the caller has to deal with the job.

use anyhow::{Context, Result};
use pdisk_core::domain::job::{Job, JobAction, JobTransition};
use pdisk_core::domain::volume::Volume;
use pdisk_store::{DocumentStore, StoreError, Versioned, typed};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::{CreateVolumeRequest, VolumeBackend};
use crate::service::protocol::{self, RetryPolicy, VolumeChange};

/// Final state of a handled job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
}

/// Runs volume jobs for one poll iteration
#[derive(Clone)]
pub struct VolumeHandler {
    store: Arc<dyn DocumentStore>,
    backend: Arc<dyn VolumeBackend>,
    retry: RetryPolicy,
}

impl VolumeHandler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        backend: Arc<dyn VolumeBackend>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            retry,
        }
    }

    /// Dispatches a claimed job by its action
    pub async fn handle(&self, job: &Versioned<Job>) -> Result<JobOutcome> {
        match &job.value.action {
            JobAction::Create => self.create_volume(job).await,
            JobAction::Delete => self.delete_volume(job).await,
            JobAction::Other(action) => {
                self.fail_job(job, format!("unsupported action '{}'", action))
                    .await
            }
        }
    }

    /// Provisions the target volume and marks it AVAILABLE
    pub async fn create_volume(&self, job: &Versioned<Job>) -> Result<JobOutcome> {
        let volume = match self.read_volume(job).await? {
            Ok(volume) => volume,
            Err(message) => return self.fail_job(job, message).await,
        };

        if !volume.value.awaits_creation() {
            let message = format!(
                "volume {} is {}; only pending or never-created volumes can be created",
                volume.id, volume.value.state
            );
            return self.fail_job(job, message).await;
        }

        let Some(size_gb) = volume.value.size_gb() else {
            let message = format!("volume {} has no capacity", volume.id);
            self.fail_volume(volume, &message).await;
            return self.fail_job(job, message).await;
        };

        let request = CreateVolumeRequest {
            size_gb,
            tag: volume.value.name.clone(),
        };

        info!(
            "Creating {} GB volume for {} (job {})",
            size_gb, volume.id, job.id
        );

        let uuid = match self.backend.create_volume(&request).await {
            Ok(uuid) => uuid,
            Err(e) => {
                let message = format!("backend failed to create volume {}: {:#}", volume.id, e);
                error!("{}", message);
                self.fail_volume(volume, &message).await;
                return self.fail_job(job, message).await;
            }
        };

        let volume_id = volume.id.clone();
        let change = VolumeChange::Available { uuid: uuid.clone() };
        if let Err(e) =
            protocol::update_volume(self.store.as_ref(), volume, &change, &self.retry).await
        {
            let message = format!(
                "volume {} was created on the backend as {} but its record could not be updated: {}",
                volume_id, uuid, e
            );
            error!("{}", message);
            return self.fail_job(job, message).await;
        }

        self.succeed_job(job).await
    }

    /// Destroys the target volume on the backend and removes its record
    pub async fn delete_volume(&self, job: &Versioned<Job>) -> Result<JobOutcome> {
        let volume = match self.read_volume(job).await? {
            Ok(volume) => volume,
            Err(message) => return self.fail_job(job, message).await,
        };

        let Some(uuid) = volume.value.backend_uuid().map(str::to_string) else {
            let message = format!(
                "volume {} has no backend identifier; it was never created",
                volume.id
            );
            return self.fail_job(job, message).await;
        };

        info!("Deleting volume {} ({}) for job {}", volume.id, uuid, job.id);

        if let Err(e) = self.backend.delete_volume(&uuid).await {
            let message = format!("backend failed to delete volume {}: {:#}", uuid, e);
            error!("{}", message);
            return self.fail_job(job, message).await;
        }

        match self.store.delete(&volume.id, &volume.cas).await {
            Ok(()) => {
                info!("Removed volume record {}", volume.id);
                self.succeed_job(job).await
            }
            Err(e) if e.is_conflict() || e.is_not_found() => {
                let message = format!(
                    "backend volume {} was deleted but record {} changed concurrently and was kept: {}",
                    uuid, volume.id, e
                );
                warn!("{}", message);
                self.fail_job(job, message).await
            }
            Err(e) => Err(e).with_context(|| format!("Failed to remove volume record {}", volume.id)),
        }
    }

    /// Reads the job's target volume
    ///
    /// The inner `Err` carries a diagnostic for failures that end the job;
    /// the outer one is a store failure to propagate.
    async fn read_volume(
        &self,
        job: &Versioned<Job>,
    ) -> Result<std::result::Result<Versioned<Volume>, String>> {
        let Some(volume_id) = job.value.target_volume_id() else {
            return Ok(Err(format!("job {} does not target a volume", job.id)));
        };

        match typed::get::<Volume>(self.store.as_ref(), volume_id).await {
            Ok(volume) => Ok(Ok(volume)),
            Err(e) if e.is_not_found() => Ok(Err(format!("volume {} not found", volume_id))),
            Err(e @ StoreError::Decode { .. }) => Ok(Err(e.to_string())),
            Err(e) => Err(e).with_context(|| format!("Failed to read volume {}", volume_id)),
        }
    }

    /// Marks a volume ERROR; failures are logged since the job carries the diagnostic too
    async fn fail_volume(&self, volume: Versioned<Volume>, message: &str) {
        let id = volume.id.clone();
        let change = VolumeChange::Error {
            message: message.to_string(),
        };
        if let Err(e) = protocol::update_volume(self.store.as_ref(), volume, &change, &self.retry).await {
            warn!("Failed to mark volume {} as ERROR: {}", id, e);
        }
    }

    async fn fail_job(&self, job: &Versioned<Job>, message: String) -> Result<JobOutcome> {
        warn!("Job {} failed: {}", job.id, message);
        protocol::update_job(
            self.store.as_ref(),
            &job.id,
            &JobTransition::fail(message.clone()),
            &self.retry,
        )
        .await
        .with_context(|| format!("Failed to mark job {} as FAILED", job.id))?;

        Ok(JobOutcome::Failed(message))
    }

    async fn succeed_job(&self, job: &Versioned<Job>) -> Result<JobOutcome> {
        protocol::update_job(
            self.store.as_ref(),
            &job.id,
            &JobTransition::succeed(),
            &self.retry,
        )
        .await
        .with_context(|| format!("Failed to mark job {} as SUCCESS", job.id))?;

        info!("Job {} succeeded", job.id);
        Ok(JobOutcome::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FaultyStore, ScriptedBackend, seed_job, seed_volume};
    use pdisk_core::domain::job::JobState;
    use pdisk_core::domain::volume::VolumeState;
    use pdisk_store::MemoryStore;

    struct Fixture {
        store: Arc<dyn DocumentStore>,
        backend: Arc<ScriptedBackend>,
        handler: VolumeHandler,
    }

    fn fixture_with(store: Arc<dyn DocumentStore>, backend: ScriptedBackend) -> Fixture {
        let backend = Arc::new(backend);
        let handler = VolumeHandler::new(store.clone(), backend.clone(), RetryPolicy::immediate(3));
        Fixture {
            store,
            backend,
            handler,
        }
    }

    fn fixture(backend: ScriptedBackend) -> Fixture {
        fixture_with(Arc::new(MemoryStore::new()), backend)
    }

    /// Seeds a volume and a job for it, and claims the job
    async fn claimed_job(
        store: &dyn DocumentStore,
        action: JobAction,
        capacity: Option<i64>,
    ) -> (Versioned<Job>, String) {
        let volume = seed_volume(store, capacity).await;
        let job = seed_job(store, action, &volume).await;
        let protocol::Claimed(job) = protocol::claim_job(store, &job, "test", &RetryPolicy::immediate(3))
            .await
            .unwrap();
        (job, volume)
    }

    async fn job(store: &dyn DocumentStore, id: &str) -> Job {
        typed::get::<Job>(store, id).await.unwrap().value
    }

    async fn volume(store: &dyn DocumentStore, id: &str) -> Volume {
        typed::get::<Volume>(store, id).await.unwrap().value
    }

    #[tokio::test]
    async fn test_create_marks_volume_available() {
        let f = fixture(ScriptedBackend::returning("abc-123"));
        let (claimed, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(5_000_000)).await;

        let outcome = f.handler.create_volume(&claimed).await.unwrap();

        assert_eq!(outcome, JobOutcome::Succeeded);
        let volume = volume(f.store.as_ref(), &volume_id).await;
        assert_eq!(volume.state, VolumeState::Available);
        assert_eq!(volume.backend_uuid(), Some("abc-123"));

        let job = job(f.store.as_ref(), &claimed.id).await;
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.progress, 100);

        let requests = f.backend.created();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].size_gb, 5);
        assert!(requests[0].tag.is_none());
    }

    #[tokio::test]
    async fn test_create_passes_name_as_tag() {
        let f = fixture(ScriptedBackend::returning("u"));
        let (claimed, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1_000_001)).await;

        let mut named = typed::get::<Volume>(f.store.as_ref(), &volume_id).await.unwrap();
        named.value.name = Some("scratch".to_string());
        typed::replace(f.store.as_ref(), &volume_id, &named.value, &named.cas)
            .await
            .unwrap();

        f.handler.create_volume(&claimed).await.unwrap();

        let requests = f.backend.created();
        assert_eq!(requests[0].tag.as_deref(), Some("scratch"));
        assert_eq!(requests[0].size_gb, 2);
    }

    #[tokio::test]
    async fn test_create_without_capacity_fails_job_and_volume() {
        let f = fixture(ScriptedBackend::returning("abc-123"));
        let (claimed, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, None).await;

        let outcome = f.handler.create_volume(&claimed).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("capacity")));
        let volume = volume(f.store.as_ref(), &volume_id).await;
        assert_eq!(volume.state, VolumeState::Error);
        assert!(volume.backend_uuid().is_none());
        assert!(volume.properties.sl_msg.unwrap().contains("capacity"));

        let job = job(f.store.as_ref(), &claimed.id).await;
        assert_eq!(job.state, JobState::Failed);
        assert!(job.status_message.unwrap().contains("capacity"));
        assert!(f.backend.created().is_empty());
    }

    #[tokio::test]
    async fn test_create_backend_failure_fails_job_and_volume() {
        let f = fixture(ScriptedBackend::failing_create("quota exceeded"));
        let (claimed, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;

        let outcome = f.handler.create_volume(&claimed).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("quota exceeded")));
        let volume = volume(f.store.as_ref(), &volume_id).await;
        assert_eq!(volume.state, VolumeState::Error);
        assert!(volume.properties.sl_msg.unwrap().contains("quota exceeded"));
        assert_eq!(job(f.store.as_ref(), &claimed.id).await.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_create_missing_volume_fails_job() {
        let f = fixture(ScriptedBackend::returning("u"));
        let (claimed, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;
        let doc = f.store.get(&volume_id).await.unwrap();
        f.store.delete(&volume_id, &doc.cas).await.unwrap();

        let outcome = f.handler.create_volume(&claimed).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("not found")));
        assert_eq!(job(f.store.as_ref(), &claimed.id).await.state, JobState::Failed);
        assert!(f.backend.created().is_empty());
    }

    #[tokio::test]
    async fn test_create_on_available_volume_is_refused() {
        let f = fixture(ScriptedBackend::returning("first"));
        let (first, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;
        f.handler.create_volume(&first).await.unwrap();

        let again = seed_job(f.store.as_ref(), JobAction::Create, &volume_id).await;
        let protocol::Claimed(again) =
            protocol::claim_job(f.store.as_ref(), &again, "test", &RetryPolicy::immediate(3))
                .await
                .unwrap();
        let outcome = f.handler.create_volume(&again).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(volume(f.store.as_ref(), &volume_id).await.backend_uuid(), Some("first"));
        assert_eq!(f.backend.created().len(), 1);
    }

    #[tokio::test]
    async fn test_resubmitted_create_recovers_from_backend_failure() {
        let failing = fixture(ScriptedBackend::failing_create("quota exceeded"));
        let (first, volume_id) =
            claimed_job(failing.store.as_ref(), JobAction::Create, Some(1000)).await;
        failing.handler.create_volume(&first).await.unwrap();
        assert_eq!(volume(failing.store.as_ref(), &volume_id).await.state, VolumeState::Error);

        let f = fixture_with(failing.store.clone(), ScriptedBackend::returning("abc-123"));
        let again = seed_job(f.store.as_ref(), JobAction::Create, &volume_id).await;
        let protocol::Claimed(again) =
            protocol::claim_job(f.store.as_ref(), &again, "test", &RetryPolicy::immediate(3))
                .await
                .unwrap();

        let outcome = f.handler.create_volume(&again).await.unwrap();

        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(f.backend.created().len(), 1);
        let volume = volume(f.store.as_ref(), &volume_id).await;
        assert_eq!(volume.state, VolumeState::Available);
        assert_eq!(volume.backend_uuid(), Some("abc-123"));
        assert!(volume.properties.sl_msg.is_none());
        assert_eq!(job(f.store.as_ref(), &again.id).await.state, JobState::Success);
    }

    #[tokio::test]
    async fn test_delete_removes_volume_record() {
        let f = fixture(ScriptedBackend::returning("abc-123"));
        let (create, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;
        f.handler.create_volume(&create).await.unwrap();

        let delete = seed_job(f.store.as_ref(), JobAction::Delete, &volume_id).await;
        let protocol::Claimed(delete) =
            protocol::claim_job(f.store.as_ref(), &delete, "test", &RetryPolicy::immediate(3))
                .await
                .unwrap();
        let outcome = f.handler.delete_volume(&delete).await.unwrap();

        assert_eq!(outcome, JobOutcome::Succeeded);
        assert!(f.store.get(&volume_id).await.unwrap_err().is_not_found());
        assert_eq!(f.backend.deleted(), vec!["abc-123".to_string()]);
        assert_eq!(job(f.store.as_ref(), &delete.id).await.state, JobState::Success);
    }

    #[tokio::test]
    async fn test_delete_without_uuid_leaves_volume_untouched() {
        let f = fixture(ScriptedBackend::returning("unused"));
        let (claimed, volume_id) = claimed_job(f.store.as_ref(), JobAction::Delete, Some(1000)).await;
        let before = f.store.get(&volume_id).await.unwrap();

        let outcome = f.handler.handle(&claimed).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("never created")));
        let after = f.store.get(&volume_id).await.unwrap();
        assert_eq!(after, before);
        assert!(f.backend.deleted().is_empty());
        assert_eq!(job(f.store.as_ref(), &claimed.id).await.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_delete_backend_failure_keeps_volume() {
        let f = fixture(ScriptedBackend::returning("abc-123"));
        let (create, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;
        f.handler.create_volume(&create).await.unwrap();
        f.backend.fail_delete("device busy");

        let delete = seed_job(f.store.as_ref(), JobAction::Delete, &volume_id).await;
        let protocol::Claimed(delete) =
            protocol::claim_job(f.store.as_ref(), &delete, "test", &RetryPolicy::immediate(3))
                .await
                .unwrap();
        let outcome = f.handler.delete_volume(&delete).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("device busy")));
        let volume = volume(f.store.as_ref(), &volume_id).await;
        assert_eq!(volume.state, VolumeState::Available);
        assert_eq!(volume.backend_uuid(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_delete_conflict_fails_job_without_retry() {
        let store = Arc::new(FaultyStore::new());
        let f = fixture_with(store.clone(), ScriptedBackend::returning("abc-123"));
        let (create, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;
        f.handler.create_volume(&create).await.unwrap();

        let delete = seed_job(f.store.as_ref(), JobAction::Delete, &volume_id).await;
        let protocol::Claimed(delete) =
            protocol::claim_job(f.store.as_ref(), &delete, "test", &RetryPolicy::immediate(3))
                .await
                .unwrap();
        store.inject_delete_conflict();

        let outcome = f.handler.delete_volume(&delete).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("kept")));
        assert!(f.store.get(&volume_id).await.is_ok());
        assert_eq!(f.backend.deleted().len(), 1);
        assert_eq!(job(f.store.as_ref(), &delete.id).await.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_unsupported_action_fails_job() {
        let f = fixture(ScriptedBackend::returning("u"));
        let (mut claimed, _) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;
        claimed.value.action = JobAction::Other("resize".to_string());

        let outcome = f.handler.handle(&claimed).await.unwrap();

        assert!(matches!(outcome, JobOutcome::Failed(ref m) if m.contains("resize")));
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let store = Arc::new(FaultyStore::new());
        let f = fixture_with(store.clone(), ScriptedBackend::returning("u"));
        let (claimed, volume_id) = claimed_job(f.store.as_ref(), JobAction::Create, Some(1000)).await;
        store.break_document(&volume_id);

        assert!(f.handler.create_volume(&claimed).await.is_err());
        assert_eq!(job(f.store.as_ref(), &claimed.id).await.state, JobState::Running);
    }
}
