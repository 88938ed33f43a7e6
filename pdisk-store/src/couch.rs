//! CouchDB-compatible HTTP document store
//!
//! Maps the [`DocumentStore`] contract onto the CouchDB document API:
//! - the `_rev` field is the CAS token
//! - `409 Conflict` is a CAS mismatch, `404 Not Found` a missing document
//! - range queries use `_all_docs` with `include_docs=true`
//!
//! CouchDB has no native expiry, so a TTL is recorded as an `expires`
//! timestamp inside the document for consumers to honour.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::{Cas, Document, DocumentStore, KeyRange};

/// How many times `set` re-reads the revision when it races another writer
const SET_ATTEMPTS: usize = 5;

/// HTTP client for a CouchDB database
#[derive(Debug, Clone)]
pub struct CouchStore {
    /// Server URL (e.g., "http://localhost:5984")
    base_url: String,
    /// Database holding the documents
    database: String,
    credentials: Option<(String, Option<String>)>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
    #[serde(default)]
    doc: Option<Value>,
}

impl CouchStore {
    /// Create a store client for `database` on the server at `base_url`
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self::with_client(base_url, database, Client::new())
    }

    /// Create a store client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        database: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            database: database.into(),
            credentials: None,
            client,
        }
    }

    /// Authenticate every request with HTTP basic auth
    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some((username.into(), password));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    // =============================================================================
    // Request Building
    // =============================================================================

    /// URL of the database, or of a path below it
    ///
    /// Each segment is percent-encoded, so document ids containing `/`
    /// stay a single path segment.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StoreError::InvalidRequest(format!("Invalid store URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidRequest("Store URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&self.database)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((username, password)) => builder.basic_auth(username, password.as_deref()),
            None => builder,
        }
    }

    async fn put(&self, id: &str, value: Value, rev: Option<&str>) -> Result<Cas> {
        let mut body = into_object(id, value)?;
        if let Some(rev) = rev {
            body.insert("_rev".to_string(), Value::String(rev.to_string()));
        }

        let url = self.url(&[id])?;
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(&body)
            .send()
            .await?;

        let written: WriteResponse = handle_response(id, response).await?;
        Ok(Cas::new(written.rev))
    }

    async fn current_rev(&self, id: &str) -> Result<Option<String>> {
        match self.get(id).await {
            Ok(doc) => Ok(Some(doc.cas.as_str().to_string())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DocumentStore for CouchStore {
    async fn get(&self, id: &str) -> Result<Document> {
        let url = self.url(&[id])?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let body: Value = handle_response(id, response).await?;
        split_document(id, body)
    }

    async fn insert(&self, id: &str, value: Value) -> Result<Cas> {
        self.put(id, value, None).await
    }

    async fn set(&self, id: &str, value: Value, ttl: Option<Duration>) -> Result<Cas> {
        let mut body = into_object(id, value)?;
        if let Some(ttl) = ttl {
            let expires = chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl));
            if let Some(expires) = expires {
                body.insert("expires".to_string(), Value::String(expires.to_rfc3339()));
            }
        }
        let body = Value::Object(body);

        let mut last_error = None;
        for _ in 0..SET_ATTEMPTS {
            let rev = self.current_rev(id).await?;
            match self.put(id, body.clone(), rev.as_deref()).await {
                Ok(cas) => return Ok(cas),
                Err(e) if e.is_conflict() => {
                    debug!("Revision of {} changed during set, retrying", id);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| StoreError::Conflict(id.to_string())))
    }

    async fn replace(&self, id: &str, value: Value, cas: &Cas) -> Result<Cas> {
        self.put(id, value, Some(cas.as_str())).await
    }

    async fn delete(&self, id: &str, cas: &Cas) -> Result<()> {
        let url = self.url(&[id])?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .query(&[("rev", cas.as_str())])
            .send()
            .await?;

        let _: WriteResponse = handle_response(id, response).await?;
        Ok(())
    }

    async fn query(&self, range: &KeyRange) -> Result<Vec<Document>> {
        let start = serde_json::to_string(&range.start)
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;
        let end = serde_json::to_string(&range.end)
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;

        let url = self.url(&["_all_docs"])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[
                ("startkey", start.as_str()),
                ("endkey", end.as_str()),
                ("include_docs", "true"),
            ])
            .send()
            .await?;

        let listing: AllDocsResponse = handle_response(&range.start, response).await?;

        listing
            .rows
            .into_iter()
            .filter_map(|row| row.doc.map(|doc| (row.id, doc)))
            .map(|(id, doc)| split_document(&id, doc))
            .collect()
    }
}

// =============================================================================
// Response Handling
// =============================================================================

/// Check the status code and deserialize the JSON body
async fn handle_response<T: serde::de::DeserializeOwned>(id: &str, response: Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(id.to_string()),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                StoreError::Conflict(id.to_string())
            }
            _ => StoreError::api_error(status.as_u16(), error_text),
        });
    }

    response
        .json()
        .await
        .map_err(|e| StoreError::decode(id, format!("Failed to parse JSON response: {}", e)))
}

/// Separates CouchDB bookkeeping fields from the document body
fn split_document(id: &str, body: Value) -> Result<Document> {
    let mut body = into_object(id, body)?;

    let rev = match body.remove("_rev") {
        Some(Value::String(rev)) => rev,
        _ => return Err(StoreError::decode(id, "document has no _rev")),
    };
    body.retain(|key, _| !key.starts_with('_'));

    Ok(Document {
        id: id.to_string(),
        value: Value::Object(body),
        cas: Cas::new(rev),
    })
}

fn into_object(id: &str, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidRequest(format!(
            "Document {} must be a JSON object, got {}",
            id, other
        ))),
    }
}
