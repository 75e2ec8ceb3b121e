use std::collections::HashSet;

use super::projection::Projection;
use crate::entry::EntryId;

/// Anchor-based multi-selection over the visible list.
///
/// Holds ids only; entries are owned by the listing cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionEngine {
    selected: HashSet<EntryId>,
    anchor: Option<EntryId>,
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select exactly `id` and make it the anchor.
    pub fn select_single(&mut self, id: EntryId) {
        self.selected.clear();
        self.selected.insert(id.clone());
        self.anchor = Some(id);
    }

    /// Flip `id` in or out of the selection and make it the anchor.
    pub fn toggle(&mut self, id: EntryId) {
        if !self.selected.remove(&id) {
            self.selected.insert(id.clone());
        }
        self.anchor = Some(id);
    }

    /// Select the closed range between the anchor and `id` in visible order.
    ///
    /// `additive` unions the range into the selection instead of replacing it.
    /// Without a visible anchor this degrades to [`select_single`](Self::select_single).
    pub fn extend_range(&mut self, id: EntryId, additive: bool, projection: &Projection<'_>) {
        let anchor_index = self.anchor.as_ref().and_then(|a| projection.index_of(a));
        let (Some(from), Some(to)) = (anchor_index, projection.index_of(&id)) else {
            self.select_single(id);
            return;
        };
        let (lo, hi) = (from.min(to), from.max(to));
        if !additive {
            self.selected.clear();
        }
        self.selected
            .extend(projection.items()[lo..=hi].iter().map(|e| e.id.clone()));
        self.anchor = Some(id);
    }

    /// Select every visible entry.
    pub fn select_all(&mut self, projection: &Projection<'_>) {
        self.selected = projection.ids().cloned().collect();
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.anchor = None;
    }

    /// Drop ids no longer present, e.g. after the listing was replaced.
    pub fn retain(&mut self, mut present: impl FnMut(&EntryId) -> bool) {
        self.selected.retain(|id| present(id));
        if let Some(anchor) = &self.anchor {
            if !present(anchor) {
                self.anchor = None;
            }
        }
    }

    /// Remove specific ids, e.g. after they were moved away.
    ///
    /// Returns the ids that were selected.
    pub fn remove_all(&mut self, ids: &[EntryId]) -> Vec<EntryId> {
        ids.iter()
            .filter(|id| self.selected.remove(*id))
            .cloned()
            .collect()
    }

    /// Put back ids taken out by [`remove_all`](Self::remove_all).
    pub fn reselect(&mut self, ids: impl IntoIterator<Item = EntryId>) {
        self.selected.extend(ids);
    }

    pub fn is_selected(&self, id: &EntryId) -> bool {
        self.selected.contains(id)
    }

    pub fn selected(&self) -> &HashSet<EntryId> {
        &self.selected
    }

    pub fn anchor(&self) -> Option<&EntryId> {
        self.anchor.as_ref()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Selected ids in visible order; selected ids that are not visible come last.
    pub fn ordered(&self, projection: &Projection<'_>) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.selected.iter().cloned().collect();
        ids.sort_by_key(|id| (projection.index_of(id).unwrap_or(usize::MAX), id.clone()));
        ids
    }
}
