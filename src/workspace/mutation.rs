//! Optimistic writes with rollback.
//!
//! Every write follows the same protocol: snapshot the slice of listing state
//! the change touches, apply the change locally, issue the remote writes, and
//! on any failure restore the snapshot before surfacing the error. The
//! coordinator does not serialize writes; callers must not issue two
//! overlapping mutations on one entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::entry::{Entry, EntryId, EntryPatch};
use crate::error::WorkspaceError;
use crate::event::WriteOutcome;
use crate::remote::DirectoryService;

/// Handle of one in-flight mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Rename,
    Star,
    Delete,
    Move,
}

/// A local change plus the remote write that confirms it.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Patch the entry in place.
    Update { id: EntryId, patch: EntryPatch },
    /// Patch the entry and drop it from the listing (it moved elsewhere).
    UpdateAndHide { id: EntryId, patch: EntryPatch },
    /// Delete the entry.
    Delete { id: EntryId },
}

impl Change {
    pub fn id(&self) -> &EntryId {
        match self {
            Change::Update { id, .. } | Change::UpdateAndHide { id, .. } | Change::Delete { id } => id,
        }
    }

    fn hides(&self) -> bool {
        !matches!(self, Change::Update { .. })
    }

    fn write(&self) -> RemoteWrite {
        match self {
            Change::Update { id, patch } | Change::UpdateAndHide { id, patch } => RemoteWrite::Patch {
                id: id.clone(),
                patch: patch.clone(),
            },
            Change::Delete { id } => RemoteWrite::Delete { id: id.clone() },
        }
    }
}

/// One remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    Patch { id: EntryId, patch: EntryPatch },
    Delete { id: EntryId },
}

impl RemoteWrite {
    pub fn id(&self) -> &EntryId {
        match self {
            RemoteWrite::Patch { id, .. } | RemoteWrite::Delete { id } => id,
        }
    }

    pub async fn execute(&self, service: &dyn DirectoryService) -> WriteOutcome {
        let result = match self {
            RemoteWrite::Patch { id, patch } => service.patch(id, patch).await.map(Some),
            RemoteWrite::Delete { id } => service.delete(id).await.map(|_| None),
        };
        WriteOutcome {
            id: self.id().clone(),
            result,
        }
    }
}

/// Issue every write concurrently and collect the outcomes in order.
pub async fn run_writes(service: Arc<dyn DirectoryService>, writes: Vec<RemoteWrite>) -> Vec<WriteOutcome> {
    join_all(writes.iter().map(|w| w.execute(service.as_ref()))).await
}

/// The state needed to undo one mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Previous values of entries edited in place.
    replaced: Vec<Entry>,
    /// Entries removed from the listing with their original positions, ascending.
    removed: Vec<(usize, Entry)>,
}

impl Snapshot {
    /// Put everything back where it was.
    ///
    /// Removed rows go back by listing rank, so rows other mutations removed
    /// in the meantime do not shift them.
    fn restore(self, entries: &mut Vec<Entry>, ranks: &HashMap<EntryId, usize>) {
        for (index, entry) in self.removed {
            if entries.iter().any(|e| e.id == entry.id) {
                continue;
            }
            let at = match ranks.get(&entry.id) {
                Some(rank) => entries
                    .iter()
                    .position(|e| ranks.get(&e.id).map_or(true, |r| r > rank))
                    .unwrap_or(entries.len()),
                None => index.min(entries.len()),
            };
            entries.insert(at, entry);
        }
        for previous in self.replaced.into_iter().rev() {
            if let Some(slot) = entries.iter_mut().find(|e| e.id == previous.id) {
                *slot = previous;
            }
        }
    }
}

#[derive(Debug)]
struct PendingMutation {
    kind: MutationKind,
    writes: Vec<RemoteWrite>,
    snapshot: Snapshot,
    /// Listing epoch the snapshot belongs to.
    epoch: u64,
}

/// Result of settling a mutation.
#[derive(Debug)]
pub struct Settlement {
    pub mutation: MutationId,
    pub kind: MutationKind,
    /// Writes that were issued, in order.
    pub writes: Vec<RemoteWrite>,
    /// Entries the server confirmed.
    pub confirmed: Vec<Entry>,
    pub failures: Vec<(EntryId, WorkspaceError)>,
    /// Whether local state was restored.
    pub rolled_back: bool,
}

impl Settlement {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Some writes failed while others went through.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && self.failures.len() < self.writes.len()
    }

    /// Ids whose remote write succeeded.
    pub fn succeeded(&self) -> Vec<EntryId> {
        self.writes
            .iter()
            .map(RemoteWrite::id)
            .filter(|id| !self.failures.iter().any(|(f, _)| f == *id))
            .cloned()
            .collect()
    }
}

/// Applies optimistic changes and reconciles them with remote results.
#[derive(Debug, Default)]
pub struct MutationCoordinator {
    next_id: u64,
    pending: HashMap<MutationId, PendingMutation>,
    /// Listing order of every row seen during `ranks_epoch`.
    ranks: HashMap<EntryId, usize>,
    ranks_epoch: u64,
}

impl MutationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot and apply `changes` to `entries`, returning the writes to issue.
    ///
    /// Changes targeting entries outside the listing are still written remotely.
    pub fn begin(
        &mut self,
        kind: MutationKind,
        changes: Vec<Change>,
        entries: &mut Vec<Entry>,
        epoch: u64,
    ) -> (MutationId, Vec<RemoteWrite>) {
        self.rank_rows(entries, epoch);
        let mut snapshot = Snapshot::default();

        for change in &changes {
            if let Change::Update { id, patch } = change {
                if let Some(entry) = entries.iter_mut().find(|e| &e.id == id) {
                    snapshot.replaced.push(entry.clone());
                    entry.apply(patch);
                }
            }
        }

        let mut hidden: Vec<usize> = changes
            .iter()
            .filter(|c| c.hides())
            .filter_map(|c| entries.iter().position(|e| &e.id == c.id()))
            .collect();
        hidden.sort_unstable();
        hidden.dedup();
        for &index in hidden.iter().rev() {
            snapshot.removed.push((index, entries.remove(index)));
        }
        snapshot.removed.reverse();

        let writes: Vec<RemoteWrite> = changes.iter().map(Change::write).collect();
        self.next_id += 1;
        let id = MutationId(self.next_id);
        debug!(mutation = %id, ?kind, writes = writes.len(), "optimistic change applied");
        self.pending.insert(
            id,
            PendingMutation {
                kind,
                writes: writes.clone(),
                snapshot,
                epoch,
            },
        );
        (id, writes)
    }

    /// Reconcile a finished mutation.
    ///
    /// Any failed write restores the whole snapshot, unless the listing has been
    /// replaced since (the fresh listing already reflects the server).
    pub fn settle(
        &mut self,
        mutation: MutationId,
        outcomes: Vec<WriteOutcome>,
        entries: &mut Vec<Entry>,
        epoch: u64,
    ) -> Option<Settlement> {
        let pending = self.pending.remove(&mutation)?;
        let mut confirmed = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(Some(entry)) => confirmed.push(entry),
                Ok(None) => {}
                Err(e) => failures.push((outcome.id, e)),
            }
        }

        let mut rolled_back = false;
        if failures.is_empty() {
            info!(%mutation, kind = ?pending.kind, "mutation confirmed");
        } else if pending.epoch == epoch {
            warn!(%mutation, kind = ?pending.kind, failed = failures.len(), "mutation failed, rolling back");
            pending.snapshot.restore(entries, &self.ranks);
            rolled_back = true;
        } else {
            warn!(%mutation, kind = ?pending.kind, "mutation failed after the listing was replaced");
        }

        Some(Settlement {
            mutation,
            kind: pending.kind,
            writes: pending.writes,
            confirmed,
            failures,
            rolled_back,
        })
    }

    /// Give every row not yet ranked in this epoch the next rank.
    ///
    /// Rows only leave the listing or join at its end between replacements,
    /// so ranks stay in listing order.
    fn rank_rows(&mut self, entries: &[Entry], epoch: u64) {
        if self.ranks_epoch != epoch {
            self.ranks.clear();
            self.ranks_epoch = epoch;
        }
        for entry in entries {
            let next = self.ranks.len();
            self.ranks.entry(entry.id.clone()).or_insert(next);
        }
    }

    /// Whether `id` is touched by an in-flight mutation.
    pub fn is_pending(&self, id: &EntryId) -> bool {
        self.pending
            .values()
            .any(|p| p.writes.iter().any(|w| w.id() == id))
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MemoryDirectory, Op};

    fn listing() -> Vec<Entry> {
        vec![
            Entry::folder("f1", None, "F1"),
            Entry::file("x1", None, "a.txt", Some("p/a")),
            Entry::file("x2", None, "b.txt", Some("p/b")),
            Entry::file("x3", None, "c.txt", Some("p/c")),
        ]
    }

    fn failed(id: &str, code: &str) -> WriteOutcome {
        WriteOutcome {
            id: id.into(),
            result: Err(WorkspaceError::from_code(code, None)),
        }
    }

    fn ok(id: &str) -> WriteOutcome {
        WriteOutcome {
            id: id.into(),
            result: Ok(None),
        }
    }

    fn all_kinds() -> Vec<(MutationKind, Vec<Change>)> {
        vec![
            (
                MutationKind::Rename,
                vec![Change::Update {
                    id: "x1".into(),
                    patch: EntryPatch::rename("z.txt"),
                }],
            ),
            (
                MutationKind::Star,
                vec![Change::Update {
                    id: "x2".into(),
                    patch: EntryPatch::star(true),
                }],
            ),
            (
                MutationKind::Delete,
                vec![Change::Delete { id: "x1".into() }, Change::Delete { id: "x3".into() }],
            ),
            (
                MutationKind::Move,
                vec![
                    Change::UpdateAndHide {
                        id: "x3".into(),
                        patch: EntryPatch::reparent(Some("f1".into())),
                    },
                    Change::UpdateAndHide {
                        id: "x1".into(),
                        patch: EntryPatch::reparent(Some("f1".into())),
                    },
                ],
            ),
        ]
    }

    #[test]
    fn failed_mutation_restores_exact_state_for_every_kind() {
        for (kind, changes) in all_kinds() {
            let before = listing();
            let mut entries = before.clone();
            let mut coordinator = MutationCoordinator::new();
            let (id, writes) = coordinator.begin(kind, changes, &mut entries, 1);
            assert_ne!(entries, before, "{:?} applied nothing", kind);

            let outcomes = writes
                .iter()
                .map(|w| failed(w.id().as_str(), "NAME_CONFLICT"))
                .collect();
            let settlement = coordinator.settle(id, outcomes, &mut entries, 1).unwrap();
            assert!(settlement.rolled_back);
            assert_eq!(entries, before, "{:?} not restored", kind);
            assert_eq!(coordinator.in_flight(), 0);
        }
    }

    #[test]
    fn success_keeps_local_change() {
        let mut entries = listing();
        let mut coordinator = MutationCoordinator::new();
        let (id, _) = coordinator.begin(
            MutationKind::Star,
            vec![Change::Update {
                id: "x1".into(),
                patch: EntryPatch::star(true),
            }],
            &mut entries,
            1,
        );
        assert!(entries[1].starred);
        let settlement = coordinator.settle(id, vec![ok("x1")], &mut entries, 1).unwrap();
        assert!(settlement.is_success());
        assert!(!settlement.rolled_back);
        assert!(entries[1].starred);
    }

    #[test]
    fn one_failed_write_rolls_back_the_batch() {
        let before = listing();
        let mut entries = before.clone();
        let mut coordinator = MutationCoordinator::new();
        let changes = vec![
            Change::UpdateAndHide {
                id: "x1".into(),
                patch: EntryPatch::reparent(Some("f1".into())),
            },
            Change::UpdateAndHide {
                id: "x2".into(),
                patch: EntryPatch::reparent(Some("f1".into())),
            },
        ];
        let (id, _) = coordinator.begin(MutationKind::Move, changes, &mut entries, 3);
        assert_eq!(entries.len(), 2);
        let settlement = coordinator
            .settle(id, vec![ok("x1"), failed("x2", "FORBIDDEN")], &mut entries, 3)
            .unwrap();
        assert!(settlement.is_partial());
        assert_eq!(settlement.succeeded(), vec![EntryId::from("x1")]);
        assert_eq!(entries, before);
    }

    #[test]
    fn replaced_listing_is_not_rolled_back() {
        let mut entries = listing();
        let mut coordinator = MutationCoordinator::new();
        let (id, _) = coordinator.begin(
            MutationKind::Delete,
            vec![Change::Delete { id: "x1".into() }],
            &mut entries,
            1,
        );
        let mut fresh = vec![Entry::file("y1", Some("f1".into()), "other.txt", None)];
        let settlement = coordinator
            .settle(id, vec![failed("x1", "FORBIDDEN")], &mut fresh, 2)
            .unwrap();
        assert!(!settlement.rolled_back);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn disjoint_mutations_roll_back_independently() {
        let mut entries = listing();
        let mut coordinator = MutationCoordinator::new();
        let (rename, _) = coordinator.begin(
            MutationKind::Rename,
            vec![Change::Update {
                id: "x1".into(),
                patch: EntryPatch::rename("renamed.txt"),
            }],
            &mut entries,
            1,
        );
        let (star, _) = coordinator.begin(
            MutationKind::Star,
            vec![Change::Update {
                id: "x2".into(),
                patch: EntryPatch::star(true),
            }],
            &mut entries,
            1,
        );
        assert!(coordinator.is_pending(&"x1".into()));
        coordinator.settle(star, vec![failed("x2", "FORBIDDEN")], &mut entries, 1);
        coordinator.settle(rename, vec![ok("x1")], &mut entries, 1);
        assert_eq!(entries[1].name, "renamed.txt");
        assert!(!entries[2].starred);
        assert!(!coordinator.is_pending(&"x1".into()));
    }

    #[test]
    fn overlapping_removals_restore_listing_order() {
        let before = listing();
        let orders = [[0, 1], [1, 0]];
        for order in orders {
            let mut entries = before.clone();
            let mut coordinator = MutationCoordinator::new();
            let first = coordinator.begin(
                MutationKind::Delete,
                vec![Change::Delete { id: "x1".into() }],
                &mut entries,
                1,
            );
            let second = coordinator.begin(
                MutationKind::Move,
                vec![Change::UpdateAndHide {
                    id: "x2".into(),
                    patch: EntryPatch::reparent(Some("f1".into())),
                }],
                &mut entries,
                1,
            );
            assert_eq!(entries.len(), 2);

            let begun = [first, second];
            for i in order {
                let (id, writes) = &begun[i];
                let outcomes = writes
                    .iter()
                    .map(|w| failed(w.id().as_str(), "FORBIDDEN"))
                    .collect();
                coordinator.settle(*id, outcomes, &mut entries, 1).unwrap();
            }
            assert_eq!(entries, before, "settled in order {:?}", order);
        }
    }

    #[test]
    fn removal_rolls_back_around_an_earlier_removal() {
        let before = vec![
            Entry::file("a", None, "a.txt", None),
            Entry::file("b", None, "b.txt", None),
            Entry::file("c", None, "c.txt", None),
        ];
        let mut entries = before.clone();
        let mut coordinator = MutationCoordinator::new();
        let (del_a, _) = coordinator.begin(
            MutationKind::Delete,
            vec![Change::Delete { id: "a".into() }],
            &mut entries,
            1,
        );
        let (del_c, _) = coordinator.begin(
            MutationKind::Delete,
            vec![Change::Delete { id: "c".into() }],
            &mut entries,
            1,
        );
        coordinator.settle(del_a, vec![failed("a", "FORBIDDEN")], &mut entries, 1);
        coordinator.settle(del_c, vec![failed("c", "FORBIDDEN")], &mut entries, 1);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(entries, before);
    }

    #[test]
    fn unknown_mutation_settles_to_none() {
        let mut coordinator = MutationCoordinator::new();
        let mut entries = listing();
        assert!(coordinator
            .settle(MutationId(42), vec![], &mut entries, 0)
            .is_none());
    }

    #[tokio::test]
    async fn run_writes_hits_the_service_once_per_write() {
        let dir = MemoryDirectory::new();
        dir.seed_folder("f1", None, "F1");
        dir.seed_file("x1", None, "a.txt", b"");
        dir.seed_file("x2", None, "b.txt", b"");
        dir.fail_next_for(Op::Patch, "x2", "FORBIDDEN");
        let service: Arc<dyn DirectoryService> = Arc::new(dir);
        let writes = vec![
            RemoteWrite::Patch {
                id: "x1".into(),
                patch: EntryPatch::reparent(Some("f1".into())),
            },
            RemoteWrite::Patch {
                id: "x2".into(),
                patch: EntryPatch::reparent(Some("f1".into())),
            },
        ];
        let outcomes = run_writes(service, writes).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(WorkspaceError::Forbidden)));
    }
}
