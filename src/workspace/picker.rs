use tracing::debug;

use super::moves::MoveTarget;
use super::navigation::{Crumb, NavigationController};
use crate::entry::{Entry, EntryId};
use crate::error::{ErrorReport, Result};

/// Folder-only browser used to choose a move destination.
///
/// Keeps its own breadcrumb stack so browsing here never disturbs the
/// workspace's current folder.
#[derive(Debug, Clone, Default)]
pub struct FolderPicker {
    nav: NavigationController,
    folders: Vec<Entry>,
    generation: u64,
    loading: bool,
    error: Option<ErrorReport>,
}

impl FolderPicker {
    /// Start from an existing breadcrumb path.
    ///
    /// Tickets continue after `generation` so results meant for an earlier
    /// picker can never match this one.
    pub fn starting_at(nav: NavigationController, generation: u64) -> Self {
        Self {
            nav,
            generation,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Begin listing the current folder. Returns the ticket and folder to list.
    pub fn begin_load(&mut self) -> (u64, Option<EntryId>) {
        self.generation += 1;
        self.loading = true;
        (self.generation, self.nav.current().cloned())
    }

    /// Apply a listing result. Returns false for superseded results.
    pub fn finish_load(&mut self, generation: u64, result: Result<Vec<Entry>>) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "discarding stale picker listing");
            return false;
        }
        self.loading = false;
        match result {
            Ok(entries) => {
                self.folders = entries.into_iter().filter(Entry::is_folder).collect();
                self.folders.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
                self.error = None;
            }
            Err(e) => self.error = Some(ErrorReport::from(&e)),
        }
        true
    }

    /// Descend into one of the listed folders.
    pub fn enter(&mut self, id: &EntryId) -> bool {
        let Some(folder) = self.folders.iter().find(|f| &f.id == id) else {
            return false;
        };
        self.nav.enter_folder(folder.id.clone(), &folder.name);
        true
    }

    pub fn click_breadcrumb(&mut self, index: usize) -> bool {
        self.nav.click_breadcrumb(index)
    }

    pub fn go_back(&mut self) -> bool {
        self.nav.go_back()
    }

    /// The folder currently shown, as a move destination.
    pub fn target(&self) -> MoveTarget {
        let mut path = self.nav.path_ids();
        match path.pop() {
            Some(id) => MoveTarget::folder(id, path),
            None => MoveTarget::root(),
        }
    }

    pub fn folders(&self) -> &[Entry] {
        &self.folders
    }

    pub fn crumbs(&self) -> &[Crumb] {
        self.nav.crumbs()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&ErrorReport> {
        self.error.as_ref()
    }
}
