//! ID resolver module
//!
//! Handles resolution of document id prefixes to full ids by querying the
//! store. Users may type `3f2a`, `Volume/3f2a` or the full id.

use anyhow::{Context, Result, anyhow};
use pdisk_core::keys;
use pdisk_store::{DocumentStore, KeyRange};

/// Resolve a volume id or prefix to a full `Volume/...` id
pub async fn resolve_volume_id(store: &dyn DocumentStore, id_or_prefix: &str) -> Result<String> {
    resolve(store, keys::VOLUME_PREFIX, "volume", id_or_prefix).await
}

/// Resolve a job id or prefix to a full `Job/...` id
pub async fn resolve_job_id(store: &dyn DocumentStore, id_or_prefix: &str) -> Result<String> {
    resolve(store, keys::JOB_PREFIX, "job", id_or_prefix).await
}

/// Resolve `id_or_prefix` among the documents under `prefix`
///
/// An exact id wins even when it is also the prefix of other ids.
///
/// # Errors
/// Returns an error if:
/// - No document matches the prefix
/// - Multiple documents match the prefix (ambiguous)
/// - The store query fails
async fn resolve(
    store: &dyn DocumentStore,
    prefix: &str,
    kind: &str,
    id_or_prefix: &str,
) -> Result<String> {
    let qualified = keys::qualify(prefix, id_or_prefix.trim());

    let matches: Vec<String> = store
        .query(&KeyRange::prefix(qualified.as_str()))
        .await
        .with_context(|| format!("Failed to fetch {}s for ID resolution", kind))?
        .into_iter()
        .map(|doc| doc.id)
        .collect();

    if matches.iter().any(|id| *id == qualified) {
        return Ok(qualified);
    }

    match matches.len() {
        0 => Err(anyhow!(
            "No {} found with ID starting with '{}'",
            kind,
            qualified
        )),
        1 => Ok(matches[0].clone()),
        _ => Err(anyhow!(
            "Ambiguous prefix '{}' matches multiple {}s: {}",
            qualified,
            kind,
            matches.join(", ")
        )),
    }
}
