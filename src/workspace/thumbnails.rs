use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::entry::{Entry, EntryId};
use crate::error::Result;

/// Per-entry cache of thumbnail URLs for visible image entries.
///
/// An id is resolved once while it stays in the listing. Failures are
/// remembered so they are not retried on every refresh.
#[derive(Debug, Default)]
pub struct ThumbnailResolver {
    urls: HashMap<EntryId, String>,
    in_flight: HashSet<EntryId>,
    failed: HashSet<EntryId>,
}

impl ThumbnailResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images in `visible` that still need a URL. Returned entries are marked in flight.
    pub fn wanted(&mut self, visible: &[&Entry]) -> Vec<Entry> {
        let mut out = Vec::new();
        for entry in visible {
            if !entry.is_image() || entry.storage_path.is_none() {
                continue;
            }
            let id = &entry.id;
            if self.urls.contains_key(id) || self.in_flight.contains(id) || self.failed.contains(id) {
                continue;
            }
            self.in_flight.insert(id.clone());
            out.push((*entry).clone());
        }
        if !out.is_empty() {
            debug!(count = out.len(), "resolving thumbnails");
        }
        out
    }

    /// Record a resolution result. Returns the URL if it was accepted.
    ///
    /// Results for ids that were invalidated meanwhile are dropped.
    pub fn accept(&mut self, id: &EntryId, result: Result<String>) -> Option<&str> {
        if !self.in_flight.remove(id) {
            debug!(id = %id, "dropping thumbnail for invalidated entry");
            return None;
        }
        match result {
            Ok(url) => {
                self.urls.insert(id.clone(), url);
                self.urls.get(id).map(String::as_str)
            }
            Err(e) => {
                debug!(id = %id, error = %e, "thumbnail unavailable");
                self.failed.insert(id.clone());
                None
            }
        }
    }

    /// Forget everything about ids that are no longer listed.
    pub fn retain_present(&mut self, present: impl Fn(&EntryId) -> bool) {
        self.urls.retain(|id, _| present(id));
        self.in_flight.retain(|id| present(id));
        self.failed.retain(|id| present(id));
    }

    pub fn url(&self, id: &EntryId) -> Option<&str> {
        self.urls.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }
}
