use tracing::{debug, warn};

use crate::entry::{Entry, EntryId};
use crate::error::{ErrorReport, Result};

/// Identity of one issued listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub generation: u64,
    pub parent_id: Option<EntryId>,
    pub search: Option<String>,
}

/// What happened to a finished listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Entries replaced.
    Applied,
    /// Error recorded; previous entries kept.
    Failed(ErrorReport),
    /// Superseded by a later request and ignored.
    Stale,
}

/// Single-level window over the remote tree: the children of one folder.
#[derive(Debug, Default)]
pub struct DirectoryListingCache {
    parent_id: Option<EntryId>,
    search: Option<String>,
    entries: Vec<Entry>,
    loading: bool,
    error: Option<ErrorReport>,
    generation: u64,
    /// Bumped each time `entries` is replaced wholesale.
    epoch: u64,
}

impl DirectoryListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a listing for `(parent_id, search)`, superseding any in-flight one.
    pub fn begin_load(&mut self, parent_id: Option<EntryId>, search: Option<&str>) -> LoadTicket {
        self.generation += 1;
        self.parent_id = parent_id;
        self.search = normalize_search(search);
        self.loading = true;
        debug!(
            generation = self.generation,
            parent = ?self.parent_id,
            search = ?self.search,
            "listing requested"
        );
        LoadTicket {
            generation: self.generation,
            parent_id: self.parent_id.clone(),
            search: self.search.clone(),
        }
    }

    /// Ticket describing the view as it stands, without issuing a request.
    pub fn current_ticket(&self) -> LoadTicket {
        LoadTicket {
            generation: self.generation,
            parent_id: self.parent_id.clone(),
            search: self.search.clone(),
        }
    }

    /// Whether `ticket` still describes the active request.
    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
            && ticket.parent_id == self.parent_id
            && ticket.search == self.search
    }

    /// Apply a finished listing unless it was superseded.
    ///
    /// Failures keep the previous entries visible.
    pub fn finish_load(&mut self, ticket: &LoadTicket, result: Result<Vec<Entry>>) -> LoadOutcome {
        if !self.is_current(ticket) {
            debug!(generation = ticket.generation, "discarding superseded listing");
            return LoadOutcome::Stale;
        }
        self.loading = false;
        match result {
            Ok(entries) => {
                self.entries = entries;
                self.error = None;
                self.epoch += 1;
                LoadOutcome::Applied
            }
            Err(e) => {
                warn!(error = %e, parent = ?self.parent_id, "listing failed");
                let report = ErrorReport::from(&e);
                self.error = Some(report.clone());
                LoadOutcome::Failed(report)
            }
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Mutable entries, reserved for the mutation coordinator.
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<Entry> {
        &mut self.entries
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Whether any cached entry lives directly inside `folder`.
    pub fn has_children(&self, folder: &EntryId) -> bool {
        self.entries
            .iter()
            .any(|e| e.parent_id.as_ref() == Some(folder))
    }

    pub fn parent_id(&self) -> Option<&EntryId> {
        self.parent_id.as_ref()
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn is_search(&self) -> bool {
        self.search.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&ErrorReport> {
        self.error.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

fn normalize_search(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
