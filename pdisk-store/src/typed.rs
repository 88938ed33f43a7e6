//! Typed access on top of raw JSON documents

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::{Cas, Document, DocumentStore, KeyRange};

/// A decoded record with the id and CAS it was read with
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub id: String,
    pub cas: Cas,
    pub value: T,
}

impl<T: DeserializeOwned> TryFrom<Document> for Versioned<T> {
    type Error = StoreError;

    fn try_from(doc: Document) -> Result<Self> {
        let value = serde_json::from_value(doc.value).map_err(|e| StoreError::decode(&doc.id, e))?;
        Ok(Self {
            id: doc.id,
            cas: doc.cas,
            value,
        })
    }
}

/// Reads and decodes a document
pub async fn get<T: DeserializeOwned>(store: &dyn DocumentStore, id: &str) -> Result<Versioned<T>> {
    store.get(id).await?.try_into()
}

/// Encodes and creates a new document
pub async fn insert<T: Serialize>(store: &dyn DocumentStore, id: &str, value: &T) -> Result<Cas> {
    store.insert(id, encode(id, value)?).await
}

/// Encodes and writes a document unconditionally
pub async fn set<T: Serialize>(
    store: &dyn DocumentStore,
    id: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<Cas> {
    store.set(id, encode(id, value)?, ttl).await
}

/// Encodes and writes a document guarded by `cas`
pub async fn replace<T: Serialize>(
    store: &dyn DocumentStore,
    id: &str,
    value: &T,
    cas: &Cas,
) -> Result<Cas> {
    store.replace(id, encode(id, value)?, cas).await
}

/// Runs a range query, splitting results into decoded records and failures
///
/// A single malformed document does not hide the others.
pub async fn query<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    range: &KeyRange,
) -> Result<(Vec<Versioned<T>>, Vec<StoreError>)> {
    let mut records = Vec::new();
    let mut failures = Vec::new();

    for doc in store.query(range).await? {
        match Versioned::try_from(doc) {
            Ok(record) => records.push(record),
            Err(e) => failures.push(e),
        }
    }

    Ok((records, failures))
}

fn encode<T: Serialize>(id: &str, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::InvalidRequest(format!("Failed to encode {}: {}", id, e)))
}
