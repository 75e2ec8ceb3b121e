use tracing::debug;

use super::mutation::Change;
use super::selection::SelectionEngine;
use crate::entry::{EntryId, EntryPatch};
use crate::error::{Result, WorkspaceError};

/// Where a move sends its items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveTarget {
    /// Destination folder; `None` is the root.
    pub id: Option<EntryId>,
    /// Known folders above the destination, root side first.
    pub ancestors: Vec<EntryId>,
}

impl MoveTarget {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn folder(id: EntryId, ancestors: Vec<EntryId>) -> Self {
        Self {
            id: Some(id),
            ancestors,
        }
    }
}

/// Ids carried by a drag that starts on `dragged`.
///
/// Dragging a selected item drags the whole selection; dragging an unselected
/// item drags only that item.
pub fn drag_payload(dragged: &EntryId, selection: &SelectionEngine) -> Vec<EntryId> {
    if selection.is_selected(dragged) {
        let mut ids: Vec<EntryId> = selection.selected().iter().cloned().collect();
        ids.sort();
        ids
    } else {
        vec![dragged.clone()]
    }
}

/// Validate a move of `items` (id, current parent) and build its changes.
///
/// Refuses moving a folder into itself or below itself, and moves where every
/// item already lives in the destination. Items already in the destination are
/// left out of a mixed batch. `hide` drops moved entries from the listing.
pub fn plan_move(
    items: &[(EntryId, Option<EntryId>)],
    target: &MoveTarget,
    hide: bool,
) -> Result<Vec<Change>> {
    if let Some(dest) = &target.id {
        if items.iter().any(|(id, _)| id == dest) {
            return Err(WorkspaceError::MoveIntoSelf);
        }
    }
    if items
        .iter()
        .any(|(id, _)| target.ancestors.iter().any(|a| a == id))
    {
        return Err(WorkspaceError::MoveIntoDescendant);
    }

    let changes: Vec<Change> = items
        .iter()
        .filter(|(_, parent)| parent.as_ref() != target.id.as_ref())
        .map(|(id, _)| {
            let patch = EntryPatch::reparent(target.id.clone());
            if hide {
                Change::UpdateAndHide {
                    id: id.clone(),
                    patch,
                }
            } else {
                Change::Update {
                    id: id.clone(),
                    patch,
                }
            }
        })
        .collect();

    if changes.is_empty() {
        return Err(WorkspaceError::NoOpMove);
    }
    debug!(
        items = changes.len(),
        destination = ?target.id,
        "move planned"
    );
    Ok(changes)
}
