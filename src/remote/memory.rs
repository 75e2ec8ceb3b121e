use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::DirectoryService;
use crate::entry::{Entry, EntryId, EntryKind, EntryPatch};
use crate::error::{Result, WorkspaceError};

const SIGNED_PREFIX: &str = "mem://signed/";
const PUBLIC_PREFIX: &str = "mem://public/";

/// Remote operation kinds, for failure injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Create,
    Patch,
    Delete,
    Sign,
    Public,
    Fetch,
    Upload,
}

/// A one-shot failure consumed by the first matching call.
#[derive(Debug, Clone)]
struct Failure {
    op: Op,
    id: Option<EntryId>,
    code: String,
}

#[derive(Debug, Default)]
struct Store {
    entries: Vec<Entry>,
    blobs: HashMap<String, Vec<u8>>,
    failures: VecDeque<Failure>,
    calls: HashMap<Op, usize>,
    signing_disabled: bool,
    next_id: u64,
}

impl Store {
    fn record(&mut self, op: Op, id: Option<&EntryId>) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        let hit = self
            .failures
            .iter()
            .position(|f| f.op == op && (f.id.is_none() || f.id.as_ref() == id));
        match hit.and_then(|i| self.failures.remove(i)) {
            Some(f) => Err(WorkspaceError::from_code(&f.code, None)),
            None => Ok(()),
        }
    }

    fn find(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    fn ensure_folder(&self, id: Option<&EntryId>) -> Result<()> {
        match id {
            None => Ok(()),
            Some(id) => match self.find(id) {
                Some(e) if e.is_folder() => Ok(()),
                _ => Err(WorkspaceError::NotFound(id.to_string())),
            },
        }
    }

    fn name_taken(&self, parent: Option<&EntryId>, name: &str, except: Option<&EntryId>) -> bool {
        self.entries.iter().any(|e| {
            e.parent_id.as_ref() == parent && e.name == name && Some(&e.id) != except
        })
    }

    /// Whether `candidate` is `id` or lies below it.
    fn is_within(&self, candidate: Option<&EntryId>, id: &EntryId) -> bool {
        let mut cursor = candidate.cloned();
        let mut hops = 0;
        while let Some(current) = cursor {
            if &current == id {
                return true;
            }
            hops += 1;
            if hops > self.entries.len() {
                return true;
            }
            cursor = self.find(&current).and_then(|e| e.parent_id.clone());
        }
        false
    }
}

/// In-process directory service with the same authoritative checks as a real backend.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    store: Mutex<Store>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a folder directly, bypassing validation.
    pub fn seed_folder(&self, id: &str, parent: Option<&str>, name: &str) -> Entry {
        let entry = Entry::folder(id, parent.map(EntryId::from), name);
        self.lock().entries.push(entry.clone());
        entry
    }

    /// Insert a file and its blob directly.
    pub fn seed_file(&self, id: &str, parent: Option<&str>, name: &str, bytes: &[u8]) -> Entry {
        let path = format!("blobs/{}/{}", id, name);
        let mut entry = Entry::file(id, parent.map(EntryId::from), name, Some(&path));
        entry.size_bytes = Some(bytes.len() as u64);
        let mut store = self.lock();
        store.blobs.insert(path, bytes.to_vec());
        store.entries.push(entry.clone());
        entry
    }

    /// Insert an already-built entry.
    pub fn seed(&self, entry: Entry) {
        self.lock().entries.push(entry);
    }

    /// Make the next call of `op` fail with `code`.
    pub fn fail_next(&self, op: Op, code: &str) {
        self.lock().failures.push_back(Failure {
            op,
            id: None,
            code: code.to_string(),
        });
    }

    /// Make the next call of `op` targeting `id` fail with `code`.
    pub fn fail_next_for(&self, op: Op, id: &str, code: &str) {
        self.lock().failures.push_back(Failure {
            op,
            id: Some(EntryId::from(id)),
            code: code.to_string(),
        });
    }

    pub fn set_signing_enabled(&self, enabled: bool) {
        self.lock().signing_disabled = !enabled;
    }

    /// Drop a blob while keeping the entry that references it.
    pub fn remove_blob(&self, storage_path: &str) {
        self.lock().blobs.remove(storage_path);
    }

    pub fn get(&self, id: &str) -> Option<Entry> {
        self.lock().find(&EntryId::from(id)).cloned()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.lock().entries.clone()
    }

    /// Number of calls made for `op`.
    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of calls made across all operations.
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn list(&self, parent_id: Option<&EntryId>, search: Option<&str>) -> Result<Vec<Entry>> {
        let mut store = self.lock();
        store.record(Op::List, parent_id)?;
        let query = search.map(str::trim).filter(|q| !q.is_empty()).map(str::to_lowercase);
        let items = store
            .entries
            .iter()
            .filter(|e| match &query {
                Some(q) => e.name.to_lowercase().contains(q),
                None => e.parent_id.as_ref() == parent_id,
            })
            .cloned()
            .collect();
        Ok(items)
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&EntryId>) -> Result<Entry> {
        let mut store = self.lock();
        store.record(Op::Create, parent_id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkspaceError::NameRequired);
        }
        store.ensure_folder(parent_id)?;
        if store.name_taken(parent_id, name, None) {
            return Err(WorkspaceError::NameConflict(name.to_string()));
        }
        store.next_id += 1;
        let entry = Entry::folder(
            format!("n{}", store.next_id),
            parent_id.cloned(),
            name,
        );
        store.entries.push(entry.clone());
        Ok(entry)
    }

    async fn patch(&self, id: &EntryId, patch: &EntryPatch) -> Result<Entry> {
        let mut store = self.lock();
        store.record(Op::Patch, Some(id))?;
        let current = store
            .find(id)
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;

        let target_parent = match &patch.parent_id {
            Some(parent) => parent.clone(),
            None => current.parent_id.clone(),
        };
        if patch.parent_id.is_some() {
            store.ensure_folder(target_parent.as_ref())?;
            if current.kind == EntryKind::Folder && store.is_within(target_parent.as_ref(), id) {
                return Err(WorkspaceError::Remote {
                    code: "INVALID_PARENT".into(),
                    message: "destination is inside the moved folder".into(),
                });
            }
        }
        let target_name = patch.name.clone().unwrap_or_else(|| current.name.clone());
        if target_name.trim().is_empty() {
            return Err(WorkspaceError::NameRequired);
        }
        if store.name_taken(target_parent.as_ref(), &target_name, Some(id)) {
            return Err(WorkspaceError::NameConflict(target_name));
        }

        let entry = store
            .entries
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
        entry.apply(patch);
        entry.updated_at = Utc::now().max(entry.updated_at);
        Ok(entry.clone())
    }

    async fn delete(&self, id: &EntryId) -> Result<()> {
        let mut store = self.lock();
        store.record(Op::Delete, Some(id))?;
        let entry = store
            .find(id)
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
        if entry.is_folder() && store.entries.iter().any(|e| e.parent_id.as_ref() == Some(id)) {
            return Err(WorkspaceError::FolderNotEmpty);
        }
        if let Some(path) = &entry.storage_path {
            store.blobs.remove(path);
        }
        store.entries.retain(|e| &e.id != id);
        Ok(())
    }

    async fn signed_url(&self, storage_path: &str, ttl: Duration) -> Result<String> {
        let mut store = self.lock();
        store.record(Op::Sign, None)?;
        if store.signing_disabled {
            return Err(WorkspaceError::Remote {
                code: "SIGNING_UNAVAILABLE".into(),
                message: "signed urls are disabled".into(),
            });
        }
        if !store.blobs.contains_key(storage_path) {
            return Err(WorkspaceError::FileUrlUnavailable(storage_path.to_string()));
        }
        Ok(format!("{}{}?ttl={}", SIGNED_PREFIX, storage_path, ttl.as_secs()))
    }

    async fn public_url(&self, storage_path: &str) -> Result<String> {
        let mut store = self.lock();
        store.record(Op::Public, None)?;
        Ok(format!("{}{}", PUBLIC_PREFIX, storage_path))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut store = self.lock();
        store.record(Op::Fetch, None)?;
        let path = url
            .strip_prefix(SIGNED_PREFIX)
            .or_else(|| url.strip_prefix(PUBLIC_PREFIX))
            .map(|rest| rest.split('?').next().unwrap_or(rest))
            .ok_or_else(|| WorkspaceError::FileUrlUnavailable(url.to_string()))?;
        store
            .blobs
            .get(path)
            .cloned()
            .ok_or_else(|| WorkspaceError::FileUrlUnavailable(path.to_string()))
    }

    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<String> {
        let mut store = self.lock();
        store.record(Op::Upload, None)?;
        store.blobs.insert(path.to_string(), bytes);
        Ok(path.to_string())
    }
}
