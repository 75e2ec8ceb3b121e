//! Directory service boundary.
//!
//! The workspace never talks to a backend directly; every listing, write and
//! blob access goes through [`DirectoryService`]. Two adapters ship with the
//! crate: [`http::HttpDirectory`] for a REST backend speaking the
//! `{ ok, error, item, items }` envelope, and [`memory::MemoryDirectory`], an
//! in-process store used by tests and demos.

pub mod http;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::entry::{Entry, EntryId, EntryPatch};
use crate::error::{Result, WorkspaceError};

/// Remote operations consumed by the workspace.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Children of `parent_id` (root when `None`), optionally filtered by `search`.
    async fn list(&self, parent_id: Option<&EntryId>, search: Option<&str>) -> Result<Vec<Entry>>;

    /// Create a folder.
    async fn create_folder(&self, name: &str, parent_id: Option<&EntryId>) -> Result<Entry>;

    /// Apply a partial update and return the stored entry.
    async fn patch(&self, id: &EntryId, patch: &EntryPatch) -> Result<Entry>;

    async fn delete(&self, id: &EntryId) -> Result<()>;

    /// Time-limited URL for a stored blob.
    async fn signed_url(&self, storage_path: &str, ttl: Duration) -> Result<String>;

    /// Public URL for a stored blob, used when signing is unavailable.
    async fn public_url(&self, storage_path: &str) -> Result<String>;

    /// Download the bytes behind an access URL.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Store a blob; the returned storage path is what file entries reference.
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String>;
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub item: Option<Entry>,
    #[serde(default)]
    pub items: Option<Vec<Entry>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl Envelope {
    /// Fail with the mapped error code unless `ok` is set.
    pub fn check(self) -> Result<Self> {
        if self.ok {
            return Ok(self);
        }
        let code = self.error.as_deref().unwrap_or("UNKNOWN");
        Err(WorkspaceError::from_code(code, self.message.as_deref()))
    }

    pub fn into_item(self) -> Result<Entry> {
        self.check()?
            .item
            .ok_or_else(|| WorkspaceError::Decode("missing `item`".into()))
    }

    pub fn into_items(self) -> Result<Vec<Entry>> {
        Ok(self.check()?.items.unwrap_or_default())
    }

    pub fn into_url(self) -> Result<String> {
        self.check()?
            .url
            .ok_or_else(|| WorkspaceError::FileUrlUnavailable("missing `url`".into()))
    }
}

/// Resolve a transient access URL: signed first, public as fallback.
pub async fn resolve_access_url(
    service: &dyn DirectoryService,
    entry: &Entry,
    ttl: Duration,
) -> Result<String> {
    let path = entry
        .storage_path
        .as_deref()
        .ok_or_else(|| WorkspaceError::NoStoragePath(entry.id.clone()))?;

    match service.signed_url(path, ttl).await {
        Ok(url) => Ok(url),
        Err(WorkspaceError::BucketNotFound) => Err(WorkspaceError::BucketNotFound),
        Err(e) => {
            debug!(path, error = %e, "signed url unavailable, falling back to public url");
            service
                .public_url(path)
                .await
                .map_err(|_| WorkspaceError::FileUrlUnavailable(path.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryDirectory;
    use super::*;

    #[test]
    fn envelope_error_maps_code() {
        let env: Envelope =
            serde_json::from_str(r#"{ "ok": false, "error": "NAME_CONFLICT" }"#).unwrap();
        let err = env.into_item().unwrap_err();
        assert!(matches!(err, WorkspaceError::NameConflict(_)));
    }

    #[test]
    fn envelope_items_default_to_empty() {
        let env: Envelope = serde_json::from_str(r#"{ "ok": true }"#).unwrap();
        assert!(env.into_items().unwrap().is_empty());
    }

    #[test]
    fn envelope_ok_without_item_is_decode_error() {
        let env: Envelope = serde_json::from_str(r#"{ "ok": true }"#).unwrap();
        assert!(matches!(env.into_item(), Err(WorkspaceError::Decode(_))));
    }

    #[tokio::test]
    async fn access_url_prefers_signed() {
        let dir = MemoryDirectory::new();
        let file = dir.seed_file("x1", None, "a.txt", b"hello");
        let url = resolve_access_url(&dir, &file, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("mem://signed/"));
    }

    #[tokio::test]
    async fn access_url_falls_back_to_public() {
        let dir = MemoryDirectory::new();
        dir.set_signing_enabled(false);
        let file = dir.seed_file("x1", None, "a.txt", b"hello");
        let url = resolve_access_url(&dir, &file, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("mem://public/"));
    }

    #[tokio::test]
    async fn access_url_requires_storage_path() {
        let dir = MemoryDirectory::new();
        let folder = dir.seed_folder("f1", None, "F1");
        let err = resolve_access_url(&dir, &folder, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::NoStoragePath(_)));
    }
}
