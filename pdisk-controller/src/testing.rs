//! Test doubles and fixtures shared by the controller's unit tests

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use pdisk_core::domain::job::{Job, JobAction};
use pdisk_core::domain::volume::Volume;
use pdisk_core::keys;
use pdisk_store::{Cas, Document, DocumentStore, KeyRange, MemoryStore, StoreError, typed};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{BackendProvider, CreateVolumeRequest, VolumeBackend};
use crate::service::settings::BackendSettings;

// =============================================================================
// Store
// =============================================================================

/// Memory store with injectable failures
///
/// - `inject_conflicts(n)`: the next `n` replaces fail with a conflict
///   without writing
/// - `inject_delete_conflict()`: the next delete fails with a conflict
/// - `break_document(id)`: every operation on `id` fails with a 503; a
///   broken prefix such as `Job/` also fails queries starting there
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    conflicts: AtomicU32,
    replace_calls: AtomicU32,
    delete_conflict: AtomicBool,
    broken: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_conflicts(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
        self.replace_calls.store(0, Ordering::SeqCst);
    }

    pub fn inject_delete_conflict(&self) {
        self.delete_conflict.store(true, Ordering::SeqCst);
    }

    pub fn break_document(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }

    /// Replace calls since the last `inject_conflicts`
    pub fn replace_calls(&self) -> u32 {
        self.replace_calls.load(Ordering::SeqCst)
    }

    fn check(&self, id: &str) -> pdisk_store::Result<()> {
        if self.broken.lock().unwrap().contains(id) {
            return Err(StoreError::api_error(503, format!("{} is unavailable", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, id: &str) -> pdisk_store::Result<Document> {
        self.check(id)?;
        self.inner.get(id).await
    }

    async fn insert(&self, id: &str, value: Value) -> pdisk_store::Result<Cas> {
        self.check(id)?;
        self.inner.insert(id, value).await
    }

    async fn set(&self, id: &str, value: Value, ttl: Option<Duration>) -> pdisk_store::Result<Cas> {
        self.check(id)?;
        self.inner.set(id, value, ttl).await
    }

    async fn replace(&self, id: &str, value: Value, cas: &Cas) -> pdisk_store::Result<Cas> {
        self.check(id)?;
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Conflict(id.to_string()));
        }
        self.inner.replace(id, value, cas).await
    }

    async fn delete(&self, id: &str, cas: &Cas) -> pdisk_store::Result<()> {
        self.check(id)?;
        if self.delete_conflict.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict(id.to_string()));
        }
        self.inner.delete(id, cas).await
    }

    async fn query(&self, range: &KeyRange) -> pdisk_store::Result<Vec<Document>> {
        self.check(&range.start)?;
        self.inner.query(range).await
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Volume backend that answers from a script and records its calls
pub struct ScriptedBackend {
    uuid: String,
    create_error: Option<String>,
    panic_on_create: bool,
    delete_error: Mutex<Option<String>>,
    created: Mutex<Vec<CreateVolumeRequest>>,
    deleted: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    /// Every creation succeeds with `uuid`
    pub fn returning(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            create_error: None,
            panic_on_create: false,
            delete_error: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Every creation fails with `message`
    pub fn failing_create(message: &str) -> Self {
        Self {
            create_error: Some(message.to_string()),
            ..Self::returning("unused")
        }
    }

    /// Every creation panics
    pub fn panicking_create() -> Self {
        Self {
            panic_on_create: true,
            ..Self::returning("unused")
        }
    }

    /// Deletions fail with `message` from now on
    pub fn fail_delete(&self, message: &str) {
        *self.delete_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn created(&self) -> Vec<CreateVolumeRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl VolumeBackend for ScriptedBackend {
    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<String> {
        if self.panic_on_create {
            panic!("backend exploded");
        }
        if let Some(message) = &self.create_error {
            anyhow::bail!("{}", message);
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(self.uuid.clone())
    }

    async fn delete_volume(&self, uuid: &str) -> Result<()> {
        if let Some(message) = self.delete_error.lock().unwrap().clone() {
            anyhow::bail!("{}", message);
        }
        self.deleted.lock().unwrap().push(uuid.to_string());
        Ok(())
    }
}

/// Hands out the same scripted backend whatever the settings
pub struct StaticBackends(pub Arc<ScriptedBackend>);

impl BackendProvider for StaticBackends {
    fn backend(&self, _settings: &BackendSettings) -> Result<Arc<dyn VolumeBackend>> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Creates a pending volume and returns its id
pub async fn seed_volume(store: &dyn DocumentStore, capacity: Option<i64>) -> String {
    let id = keys::new_volume_id();
    let mut volume = Volume::pending(0, None, Utc::now());
    volume.capacity = capacity;
    typed::insert(store, &id, &volume).await.unwrap();
    id
}

/// Creates a queued job targeting `volume_id` and returns its id
pub async fn seed_job(store: &dyn DocumentStore, action: JobAction, volume_id: &str) -> String {
    let id = keys::new_job_id();
    let job = Job::queued(action, volume_id, Utc::now());
    typed::insert(store, &id, &job).await.unwrap();
    id
}

/// Writes a complete service configuration document
pub async fn seed_settings(store: &dyn DocumentStore) {
    store
        .set(
            keys::DEFAULT_CONFIG_DOC,
            json!({
                "pdisk_endpoint": "https://disks.example.org",
                "pdisk_username": "pdc",
                "pdisk_password": "secret",
            }),
            None,
        )
        .await
        .unwrap();
}
