//! In-memory document store
//!
//! Keeps documents in an ordered map behind a mutex. Every write bumps a
//! store-wide counter that serves as the CAS token, so compare-and-write is
//! atomic with respect to all other callers sharing the store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Result, StoreError};
use crate::{Cas, Document, DocumentStore, KeyRange};

/// Document store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    docs: BTreeMap<String, Entry>,
    next_cas: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    cas: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }

    fn to_document(&self, id: &str) -> Document {
        Document {
            id: id.to_string(),
            value: self.value.clone(),
            cas: Cas::new(self.cas.to_string()),
        }
    }
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_cas += 1;
        self.next_cas
    }

    /// Returns the live entry for `id`, dropping it if it has expired
    fn live(&mut self, id: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.docs.get(id).is_some_and(|entry| !entry.is_live(now)) {
            self.docs.remove(id);
        }
        self.docs.get_mut(id)
    }

    fn check_cas(&mut self, id: &str, cas: &Cas) -> Result<()> {
        let entry = self
            .live(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if entry.cas.to_string() != cas.as_str() {
            return Err(StoreError::Conflict(id.to_string()));
        }
        Ok(())
    }

    fn write(&mut self, id: &str, value: Value, ttl: Option<Duration>) -> Cas {
        let cas = self.bump();
        self.docs.insert(
            id.to_string(),
            Entry {
                value,
                cas,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Cas::new(cas.to_string())
    }
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|state| state.docs.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::InternalError("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Document> {
        let mut state = self.lock()?;
        state
            .live(id)
            .map(|entry| entry.to_document(id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn insert(&self, id: &str, value: Value) -> Result<Cas> {
        let mut state = self.lock()?;
        if state.live(id).is_some() {
            return Err(StoreError::Conflict(id.to_string()));
        }
        Ok(state.write(id, value, None))
    }

    async fn set(&self, id: &str, value: Value, ttl: Option<Duration>) -> Result<Cas> {
        let mut state = self.lock()?;
        Ok(state.write(id, value, ttl))
    }

    async fn replace(&self, id: &str, value: Value, cas: &Cas) -> Result<Cas> {
        let mut state = self.lock()?;
        state.check_cas(id, cas)?;
        Ok(state.write(id, value, None))
    }

    async fn delete(&self, id: &str, cas: &Cas) -> Result<()> {
        let mut state = self.lock()?;
        state.check_cas(id, cas)?;
        state.docs.remove(id);
        Ok(())
    }

    async fn query(&self, range: &KeyRange) -> Result<Vec<Document>> {
        if range.start > range.end {
            return Ok(Vec::new());
        }

        let state = self.lock()?;
        let now = Instant::now();
        let bounds = (
            Bound::Included(range.start.as_str()),
            Bound::Included(range.end.as_str()),
        );

        Ok(state
            .docs
            .range::<str, _>(bounds)
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(id, entry)| entry.to_document(id))
            .collect())
    }
}
