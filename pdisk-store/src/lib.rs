//! Persistent Disk Document Store
//!
//! A small abstraction over a JSON document store with per-document
//! optimistic concurrency control.
//!
//! Every read returns a [`Cas`] token alongside the document. Writes that
//! could race with another writer ([`DocumentStore::replace`] and
//! [`DocumentStore::delete`]) must present the token from the most recent
//! read; the store rejects a stale token with [`StoreError::Conflict`],
//! which is distinct from [`StoreError::NotFound`].
//!
//! Two implementations are provided:
//! - [`MemoryStore`]: in-process, used by tests and dry runs
//! - [`CouchStore`]: a CouchDB-compatible HTTP store
//!
//! # Example
//!
//! ```
//! use pdisk_store::{DocumentStore, MemoryStore};
//! use serde_json::json;
//!
//! # async fn example() -> pdisk_store::Result<()> {
//! let store = MemoryStore::new();
//! store.insert("Volume/1", json!({ "state": "CREATING" })).await?;
//!
//! let doc = store.get("Volume/1").await?;
//! store.replace("Volume/1", json!({ "state": "AVAILABLE" }), &doc.cas).await?;
//!
//! // The old token is now stale
//! assert!(store.replace("Volume/1", json!({}), &doc.cas).await.unwrap_err().is_conflict());
//! # Ok(())
//! # }
//! ```

mod couch;
pub mod error;
mod memory;
pub mod typed;

pub use couch::CouchStore;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use typed::Versioned;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Opaque concurrency token returned on read and required on write
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cas(String);

impl Cas {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw document together with its id and CAS token
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub value: Value,
    pub cas: Cas,
}

/// Inclusive id range used by [`DocumentStore::query`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

impl KeyRange {
    /// Range covering every id that starts with `prefix`
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let start = prefix.into();
        let end = format!("{}\u{fff0}", start);
        Self { start, end }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.start.as_str() <= id && id <= self.end.as_str()
    }
}

/// Document store with per-document CAS
///
/// No ordering is guaranteed across documents; each document's CAS is
/// independent.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document
    ///
    /// Fails with [`StoreError::NotFound`] if absent.
    async fn get(&self, id: &str) -> Result<Document>;

    /// Creates a document that must not exist yet
    ///
    /// Fails with [`StoreError::Conflict`] if the id is taken.
    async fn insert(&self, id: &str, value: Value) -> Result<Cas>;

    /// Unconditional write, optionally expiring after `ttl`
    ///
    /// Only for documents with no contention, such as heartbeats.
    async fn set(&self, id: &str, value: Value, ttl: Option<Duration>) -> Result<Cas>;

    /// Overwrites a document if its CAS still matches
    ///
    /// Fails with [`StoreError::Conflict`] on a stale CAS and with
    /// [`StoreError::NotFound`] if the document was deleted meanwhile.
    async fn replace(&self, id: &str, value: Value, cas: &Cas) -> Result<Cas>;

    /// Deletes a document if its CAS still matches
    ///
    /// Same conflict semantics as [`DocumentStore::replace`].
    async fn delete(&self, id: &str, cas: &Cas) -> Result<()>;

    /// Lists all documents whose id falls in `range`, ordered by id
    async fn query(&self, range: &KeyRange) -> Result<Vec<Document>>;
}
