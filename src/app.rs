use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::entry::{Entry, EntryId, EntryPatch};
use crate::error::{ErrorReport, Result, WorkspaceError};
use crate::event::{Event, ProgressUpdate, WriteOutcome};
use crate::remote::{resolve_access_url, DirectoryService};
use crate::workspace::export::{export_folder, ExportArchive};
use crate::workspace::listing::{DirectoryListingCache, LoadOutcome, LoadTicket};
use crate::workspace::moves::{drag_payload, plan_move, MoveTarget};
use crate::workspace::mutation::{
    run_writes, Change, MutationCoordinator, MutationId, MutationKind, Settlement,
};
use crate::workspace::navigation::{Crumb, NavigationController};
use crate::workspace::picker::FolderPicker;
use crate::workspace::projection::{project, Projection, SortDir, SortKey, ViewOptions};
use crate::workspace::selection::SelectionEngine;
use crate::workspace::thumbnails::ThumbnailResolver;

/// Seconds a status message stays visible.
const STATUS_TTL_SECS: u64 = 3;

/// Tunables the workspace is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSettings {
    pub view: ViewOptions,
    /// Validity of URLs handed out for previews and exports.
    pub signed_url_ttl: Duration,
    pub thumbnail_ttl: Duration,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            view: ViewOptions::default(),
            signed_url_ttl: Duration::from_secs(600),
            thumbnail_ttl: Duration::from_secs(300),
        }
    }
}

/// Notifications for the host, drained with [`Workspace::take_signals`].
#[derive(Debug, Clone)]
pub enum Signal {
    /// Entries or their order changed.
    ListingChanged,
    SelectionChanged {
        count: usize,
    },
    /// A write was refused by the service.
    MutationFailed {
        mutation: MutationId,
        kind: MutationKind,
        failures: Vec<(EntryId, ErrorReport)>,
        rolled_back: bool,
    },
    Error(ErrorReport),
    PreviewReady {
        id: EntryId,
        url: String,
    },
    ExportProgress(ProgressUpdate),
    ExportReady(ExportArchive),
    ThumbnailReady {
        id: EntryId,
        url: String,
    },
}

/// Client-side state of the file workspace.
///
/// Owned by a single task. Remote calls run on spawned tasks that report back
/// through the event channel; the owner feeds them to [`handle_event`](Self::handle_event).
pub struct Workspace {
    service: Arc<dyn DirectoryService>,
    events: mpsc::UnboundedSender<Event>,
    settings: WorkspaceSettings,
    cache: DirectoryListingCache,
    nav: NavigationController,
    selection: SelectionEngine,
    view: ViewOptions,
    thumbnails: ThumbnailResolver,
    mutations: MutationCoordinator,
    /// Ids each in-flight mutation took out of the selection.
    deselected: HashMap<MutationId, Vec<EntryId>>,
    picker: Option<FolderPicker>,
    picker_generation: u64,
    export_ticket: u64,
    exporting: bool,
    /// Spawned tasks whose completion event has not been handled yet.
    outstanding: usize,
    signals: Vec<Signal>,
    pub status_message: Option<(String, Instant)>,
}

impl Workspace {
    pub fn new(
        service: Arc<dyn DirectoryService>,
        events: mpsc::UnboundedSender<Event>,
        settings: WorkspaceSettings,
    ) -> Self {
        let view = settings.view.clone();
        Self {
            service,
            events,
            settings,
            cache: DirectoryListingCache::new(),
            nav: NavigationController::new(),
            selection: SelectionEngine::new(),
            view,
            thumbnails: ThumbnailResolver::new(),
            mutations: MutationCoordinator::new(),
            deselected: HashMap::new(),
            picker: None,
            picker_generation: 0,
            export_ticket: 0,
            exporting: false,
            outstanding: 0,
            signals: Vec::new(),
            status_message: None,
        }
    }

    /// Load the root folder.
    pub fn open(&mut self) {
        self.nav.reset();
        self.navigated();
    }

    /// Reload the current folder or search.
    pub fn refresh(&mut self) {
        let search = self.cache.search().map(str::to_string);
        self.load(search.as_deref());
    }

    fn load(&mut self, search: Option<&str>) {
        let ticket = self.cache.begin_load(self.nav.current().cloned(), search);
        let service = Arc::clone(&self.service);
        self.spawn(async move {
            let result = service
                .list(ticket.parent_id.as_ref(), ticket.search.as_deref())
                .await;
            Event::ListingLoaded { ticket, result }
        });
    }

    fn navigated(&mut self) {
        self.selection.clear();
        self.selection_changed();
        self.load(None);
    }

    /// Open a folder from the listing.
    pub fn enter_folder(&mut self, id: &EntryId) -> Result<()> {
        let name = self
            .cache
            .get(id)
            .filter(|e| e.is_folder())
            .map(|e| e.name.clone())
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
        self.nav.enter_folder(id.clone(), &name);
        self.navigated();
        Ok(())
    }

    pub fn click_breadcrumb(&mut self, index: usize) -> bool {
        if !self.nav.click_breadcrumb(index) {
            return false;
        }
        self.navigated();
        true
    }

    pub fn go_back(&mut self) -> bool {
        if !self.nav.go_back() {
            return false;
        }
        self.navigated();
        true
    }

    /// Search the whole store by name. A blank query lists the current folder again.
    pub fn set_search(&mut self, query: &str) {
        self.selection.clear();
        self.selection_changed();
        self.load(Some(query));
    }

    /// Filter the listing locally by display name.
    pub fn set_filter(&mut self, text: &str) {
        self.view.search_text = text.to_string();
        self.request_thumbnails();
        self.emit(Signal::ListingChanged);
    }

    pub fn set_sort(&mut self, key: SortKey, dir: SortDir) {
        self.view.sort_key = key;
        self.view.sort_dir = dir;
        self.emit(Signal::ListingChanged);
    }

    pub fn toggle_star_only(&mut self) {
        self.view.star_only = !self.view.star_only;
        self.request_thumbnails();
        self.emit(Signal::ListingChanged);
    }

    /// Entries as displayed.
    pub fn visible(&self) -> Projection<'_> {
        project(self.cache.entries(), &self.view)
    }

    pub fn select(&mut self, id: EntryId) {
        self.selection.select_single(id);
        self.selection_changed();
    }

    pub fn toggle_select(&mut self, id: EntryId) {
        self.selection.toggle(id);
        self.selection_changed();
    }

    pub fn extend_selection(&mut self, id: EntryId, additive: bool) {
        let visible = project(self.cache.entries(), &self.view);
        self.selection.extend_range(id, additive, &visible);
        self.selection_changed();
    }

    pub fn select_all(&mut self) {
        let visible = project(self.cache.entries(), &self.view);
        self.selection.select_all(&visible);
        self.selection_changed();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.selection_changed();
    }

    fn selection_changed(&mut self) {
        let count = self.selection.len();
        self.emit(Signal::SelectionChanged { count });
    }

    /// Rename an entry, given the name as displayed.
    ///
    /// Works for listed entries and for folders on the breadcrumb path.
    /// Returns `None` when the name is unchanged.
    pub fn rename(&mut self, id: &EntryId, display_name: &str) -> Result<Option<MutationId>> {
        let display = display_name.trim();
        if display.is_empty() {
            return Err(WorkspaceError::NameRequired);
        }

        let (current, new_name) = match self.cache.get(id) {
            Some(entry) => (entry.name.clone(), entry.storage_name_for(display)),
            None => {
                let crumb = self
                    .nav
                    .crumbs()
                    .iter()
                    .find(|c| c.id.as_ref() == Some(id))
                    .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
                (crumb.name.clone(), display.to_string())
            }
        };
        if new_name == current {
            return Ok(None);
        }
        if let Some(entry) = self.cache.get(id) {
            let clash = self
                .cache
                .entries()
                .iter()
                .any(|e| e.id != *id && e.parent_id == entry.parent_id && e.name == new_name);
            if clash {
                return Err(WorkspaceError::NameConflict(new_name));
            }
        }

        let change = Change::Update {
            id: id.clone(),
            patch: EntryPatch::rename(new_name),
        };
        Ok(Some(self.mutate(MutationKind::Rename, vec![change])))
    }

    pub fn toggle_star(&mut self, id: &EntryId) -> Result<MutationId> {
        let starred = self
            .cache
            .get(id)
            .map(|e| e.starred)
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
        let change = Change::Update {
            id: id.clone(),
            patch: EntryPatch::star(!starred),
        };
        Ok(self.mutate(MutationKind::Star, vec![change]))
    }

    /// Delete every selected entry as one mutation.
    pub fn delete_selected(&mut self) -> Result<Option<MutationId>> {
        let ids = self.selection.ordered(&self.visible());
        self.delete_entries(ids)
    }

    /// Delete `ids` as one mutation. Folders with listed children are refused.
    pub fn delete_entries(&mut self, ids: Vec<EntryId>) -> Result<Option<MutationId>> {
        if ids.is_empty() {
            return Ok(None);
        }
        // Any id some cached row names as its parent is a folder, listed or not.
        let non_empty = ids.iter().any(|id| self.cache.has_children(id));
        if non_empty {
            return Err(WorkspaceError::FolderNotEmpty);
        }

        let deselected = self.selection.remove_all(&ids);
        let changes = ids.into_iter().map(|id| Change::Delete { id }).collect();
        let mutation = self.mutate(MutationKind::Delete, changes);
        self.deselected.insert(mutation, deselected);
        self.selection_changed();
        Ok(Some(mutation))
    }

    /// Move the selection to `target`.
    pub fn move_selection(&mut self, target: MoveTarget) -> Result<MutationId> {
        let ids = self.selection.ordered(&self.visible());
        self.move_entries(&ids, target)
    }

    /// Move `ids` to `target` as one mutation.
    ///
    /// Outside search results moved entries leave the listing; in search
    /// results they stay and show their new parent.
    pub fn move_entries(&mut self, ids: &[EntryId], target: MoveTarget) -> Result<MutationId> {
        let items: Vec<(EntryId, Option<EntryId>)> = ids
            .iter()
            .map(|id| {
                let parent = match self.cache.get(id) {
                    Some(e) => e.parent_id.clone(),
                    None => self.cache.parent_id().cloned(),
                };
                (id.clone(), parent)
            })
            .collect();
        let hide = !self.cache.is_search();
        let changes = plan_move(&items, &target, hide)?;
        let moved: Vec<EntryId> = changes.iter().map(|c| c.id().clone()).collect();

        let mutation = self.mutate(MutationKind::Move, changes);
        if hide {
            let deselected = self.selection.remove_all(&moved);
            self.deselected.insert(mutation, deselected);
            self.selection_changed();
        }
        Ok(mutation)
    }

    /// Drop a dragged entry onto a listed folder.
    pub fn drop_on(&mut self, dragged: &EntryId, folder: &EntryId) -> Result<MutationId> {
        let payload = drag_payload(dragged, &self.selection);
        // Search results can come from anywhere, so the path says nothing about them.
        let ancestors = if self.cache.is_search() {
            Vec::new()
        } else {
            self.nav.path_ids()
        };
        self.move_entries(&payload, MoveTarget::folder(folder.clone(), ancestors))
    }

    /// Drop a dragged entry onto a breadcrumb.
    pub fn drop_on_breadcrumb(&mut self, dragged: &EntryId, index: usize) -> Result<MutationId> {
        let crumbs = self.nav.crumbs();
        let crumb = crumbs
            .get(index)
            .ok_or_else(|| WorkspaceError::NotFound(format!("breadcrumb {}", index)))?;
        let target = MoveTarget {
            id: crumb.id.clone(),
            ancestors: crumbs[..index].iter().filter_map(|c| c.id.clone()).collect(),
        };
        let payload = drag_payload(dragged, &self.selection);
        self.move_entries(&payload, target)
    }

    /// Create a folder in the current folder.
    pub fn create_folder(&mut self, name: &str) -> Result<()> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(WorkspaceError::NameRequired);
        }
        let ticket = self.cache.current_ticket();
        let service = Arc::clone(&self.service);
        self.spawn(async move {
            let result = service.create_folder(&name, ticket.parent_id.as_ref()).await;
            Event::FolderCreated { ticket, result }
        });
        Ok(())
    }

    fn mutate(&mut self, kind: MutationKind, changes: Vec<Change>) -> MutationId {
        let epoch = self.cache.epoch();
        let (mutation, writes) =
            self.mutations
                .begin(kind, changes, self.cache.entries_mut(), epoch);
        let service = Arc::clone(&self.service);
        self.spawn(async move {
            let outcomes = run_writes(service, writes).await;
            Event::MutationSettled { mutation, outcomes }
        });
        self.emit(Signal::ListingChanged);
        mutation
    }

    /// Open the destination picker at the current folder.
    pub fn open_picker(&mut self) {
        self.picker = Some(FolderPicker::starting_at(
            self.nav.clone(),
            self.picker_generation,
        ));
        self.load_picker();
    }

    fn load_picker(&mut self) {
        let Some(picker) = self.picker.as_mut() else {
            return;
        };
        let (generation, parent) = picker.begin_load();
        self.picker_generation = generation;
        let service = Arc::clone(&self.service);
        self.spawn(async move {
            let result = service.list(parent.as_ref(), None).await;
            Event::PickerListed { generation, result }
        });
    }

    pub fn picker_enter(&mut self, id: &EntryId) -> bool {
        let entered = self.picker.as_mut().is_some_and(|p| p.enter(id));
        if entered {
            self.load_picker();
        }
        entered
    }

    pub fn picker_breadcrumb(&mut self, index: usize) -> bool {
        let moved = self
            .picker
            .as_mut()
            .is_some_and(|p| p.click_breadcrumb(index));
        if moved {
            self.load_picker();
        }
        moved
    }

    pub fn picker_back(&mut self) -> bool {
        let moved = self.picker.as_mut().is_some_and(|p| p.go_back());
        if moved {
            self.load_picker();
        }
        moved
    }

    /// Move the selection to the folder shown in the picker and close it.
    pub fn confirm_picker(&mut self) -> Result<MutationId> {
        let target = self
            .picker
            .as_ref()
            .map(FolderPicker::target)
            .ok_or_else(|| WorkspaceError::NotFound("destination picker is not open".into()))?;
        let mutation = self.move_selection(target)?;
        self.close_picker();
        Ok(mutation)
    }

    pub fn close_picker(&mut self) {
        self.picker = None;
    }

    /// Resolve an access URL for a file and emit it as a preview.
    pub fn open_preview(&mut self, id: &EntryId) -> Result<()> {
        let entry = self
            .cache
            .get(id)
            .filter(|e| !e.is_folder())
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound(id.to_string()))?;
        let ttl = self.settings.signed_url_ttl;
        let service = Arc::clone(&self.service);
        self.spawn(async move {
            let result = resolve_access_url(service.as_ref(), &entry, ttl).await;
            Event::PreviewResolved { entry, result }
        });
        Ok(())
    }

    fn request_thumbnails(&mut self) {
        let visible = project(self.cache.entries(), &self.view);
        let wanted = self.thumbnails.wanted(visible.items());
        let ttl = self.settings.thumbnail_ttl;
        for entry in wanted {
            let service = Arc::clone(&self.service);
            self.spawn(async move {
                let result = resolve_access_url(service.as_ref(), &entry, ttl).await;
                Event::ThumbnailResolved {
                    id: entry.id,
                    result,
                }
            });
        }
    }

    /// Start exporting a folder as a zip archive. Returns the export ticket.
    ///
    /// Starting a new export abandons the previous one.
    pub fn export(&mut self, folder_id: &EntryId) -> Result<u64> {
        let folder = match self.cache.get(folder_id) {
            Some(entry) if entry.is_folder() => entry.clone(),
            Some(_) => {
                return Err(WorkspaceError::NotFound(format!(
                    "{} is not a folder",
                    folder_id
                )))
            }
            None => {
                let crumb = self
                    .nav
                    .crumbs()
                    .iter()
                    .find(|c| c.id.as_ref() == Some(folder_id))
                    .ok_or_else(|| WorkspaceError::NotFound(folder_id.to_string()))?;
                Entry::folder(folder_id.clone(), None, &crumb.name)
            }
        };

        self.export_ticket += 1;
        self.exporting = true;
        let ticket = self.export_ticket;
        let ttl = self.settings.signed_url_ttl;
        let service = Arc::clone(&self.service);
        let progress_tx = self.events.clone();
        info!(folder = %folder.id, ticket, "export started");
        self.spawn(async move {
            let result = export_folder(service.as_ref(), &folder, ttl, move |update| {
                let _ = progress_tx.send(Event::ExportProgress { ticket, update });
            })
            .await;
            Event::ExportFinished { ticket, result }
        });
        Ok(ticket)
    }

    /// Abandon the running export; its result will be ignored.
    pub fn cancel_export(&mut self) {
        if self.exporting {
            debug!(ticket = self.export_ticket, "export cancelled");
            self.export_ticket += 1;
            self.exporting = false;
        }
    }

    /// Apply a completion event from a background task.
    pub fn handle_event(&mut self, event: Event) {
        if !matches!(event, Event::ExportProgress { .. }) {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
        match event {
            Event::ListingLoaded { ticket, result } => self.handle_listing(&ticket, result),
            Event::MutationSettled { mutation, outcomes } => self.handle_settled(mutation, outcomes),
            Event::FolderCreated { ticket, result } => self.handle_created(&ticket, result),
            Event::ThumbnailResolved { id, result } => {
                if let Some(url) = self.thumbnails.accept(&id, result).map(str::to_string) {
                    self.emit(Signal::ThumbnailReady { id, url });
                }
            }
            Event::PreviewResolved { entry, result } => match result {
                Ok(url) => self.emit(Signal::PreviewReady { id: entry.id, url }),
                Err(e) => self.report(&e),
            },
            Event::PickerListed { generation, result } => {
                if let Some(picker) = self.picker.as_mut() {
                    picker.finish_load(generation, result);
                }
            }
            Event::ExportProgress { ticket, update } => {
                if self.exporting && ticket == self.export_ticket {
                    self.emit(Signal::ExportProgress(update));
                }
            }
            Event::ExportFinished { ticket, result } => {
                if ticket != self.export_ticket {
                    debug!(ticket, "discarding abandoned export");
                    return;
                }
                self.exporting = false;
                match result {
                    Ok(archive) => self.emit(Signal::ExportReady(archive)),
                    Err(e) => self.report(&e),
                }
            }
        }
    }

    fn handle_listing(&mut self, ticket: &LoadTicket, result: Result<Vec<Entry>>) {
        match self.cache.finish_load(ticket, result) {
            LoadOutcome::Applied => {
                {
                    let present: HashSet<&EntryId> =
                        self.cache.entries().iter().map(|e| &e.id).collect();
                    self.selection.retain(|id| present.contains(id));
                    self.thumbnails.retain_present(|id| present.contains(id));
                }
                self.request_thumbnails();
                self.emit(Signal::ListingChanged);
            }
            LoadOutcome::Failed(report) => {
                self.set_status_message(report.message.clone());
                self.emit(Signal::Error(report));
            }
            LoadOutcome::Stale => {}
        }
    }

    fn handle_settled(&mut self, mutation: MutationId, outcomes: Vec<WriteOutcome>) {
        let epoch = self.cache.epoch();
        let Some(settlement) = self
            .mutations
            .settle(mutation, outcomes, self.cache.entries_mut(), epoch)
        else {
            warn!(%mutation, "settlement for unknown mutation");
            return;
        };
        let deselected = self.deselected.remove(&mutation).unwrap_or_default();
        if settlement.is_success() {
            self.confirm(&settlement);
        } else {
            if settlement.rolled_back && !deselected.is_empty() {
                let restored: Vec<EntryId> = deselected
                    .into_iter()
                    .filter(|id| self.cache.get(id).is_some())
                    .collect();
                self.selection.reselect(restored);
                self.selection_changed();
            }
            self.fail(settlement);
        }
        self.emit(Signal::ListingChanged);
    }

    fn confirm(&mut self, settlement: &Settlement) {
        for entry in &settlement.confirmed {
            if settlement.kind == MutationKind::Rename {
                self.nav.rename_crumb(&entry.id, &entry.name);
            }
            if let Some(slot) = self
                .cache
                .entries_mut()
                .iter_mut()
                .find(|e| e.id == entry.id)
            {
                *slot = entry.clone();
            }
        }
        if settlement.kind == MutationKind::Delete {
            let mut path_changed = false;
            for id in settlement.succeeded() {
                path_changed |= self.nav.forget(&id);
            }
            if path_changed {
                self.navigated();
            }
        }
    }

    fn fail(&mut self, settlement: Settlement) {
        let failures: Vec<(EntryId, ErrorReport)> = settlement
            .failures
            .iter()
            .map(|(id, e)| (id.clone(), ErrorReport::from(e)))
            .collect();
        if let Some((_, first)) = failures.first() {
            self.set_status_message(first.message.clone());
        }
        let partial = settlement.is_partial();
        self.emit(Signal::MutationFailed {
            mutation: settlement.mutation,
            kind: settlement.kind,
            failures,
            rolled_back: settlement.rolled_back,
        });
        if partial {
            info!(mutation = %settlement.mutation, "partial batch, re-fetching listing");
            self.refresh();
        }
    }

    fn handle_created(&mut self, ticket: &LoadTicket, result: Result<Entry>) {
        match result {
            Ok(entry) => {
                info!(id = %entry.id, name = %entry.name, "folder created");
                let belongs = self.cache.is_current(ticket)
                    && !self.cache.is_search()
                    && entry.parent_id.as_ref() == self.cache.parent_id()
                    && self.cache.get(&entry.id).is_none();
                if belongs {
                    self.cache.entries_mut().push(entry);
                    self.emit(Signal::ListingChanged);
                }
            }
            Err(e) => self.report(&e),
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        self.outstanding += 1;
        let tx = self.events.clone();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    fn emit(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    /// Surface an error to the host.
    pub fn report(&mut self, err: &WorkspaceError) {
        let report = ErrorReport::from(err);
        self.set_status_message(report.message.clone());
        self.emit(Signal::Error(report));
    }

    /// Take every signal emitted since the last call.
    pub fn take_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }

    /// Whether no background task is still due to report back.
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0
    }

    /// Set a status message with current timestamp.
    pub fn set_status_message(&mut self, msg: String) {
        self.status_message = Some((msg, Instant::now()));
    }

    /// Clear the status message if it has been displayed for more than 3 seconds.
    pub fn clear_expired_status(&mut self) {
        if let Some((_, ref created)) = self.status_message {
            if created.elapsed().as_secs() > STATUS_TTL_SECS {
                self.status_message = None;
            }
        }
    }

    pub fn listing(&self) -> &DirectoryListingCache {
        &self.cache
    }

    pub fn entries(&self) -> &[Entry] {
        self.cache.entries()
    }

    pub fn crumbs(&self) -> &[Crumb] {
        self.nav.crumbs()
    }

    pub fn current_folder(&self) -> Option<&EntryId> {
        self.nav.current()
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn view(&self) -> &ViewOptions {
        &self.view
    }

    pub fn thumbnails(&self) -> &ThumbnailResolver {
        &self.thumbnails
    }

    pub fn picker(&self) -> Option<&FolderPicker> {
        self.picker.as_ref()
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    pub fn pending_mutations(&self) -> usize {
        self.mutations.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventHandler;
    use crate::remote::memory::{MemoryDirectory, Op};

    fn settings() -> WorkspaceSettings {
        WorkspaceSettings {
            view: ViewOptions {
                sort_key: SortKey::Name,
                sort_dir: SortDir::Asc,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn seeded() -> Arc<MemoryDirectory> {
        let dir = MemoryDirectory::new();
        dir.seed_folder("f1", None, "F1");
        dir.seed_file("x1", Some("f1"), "a.txt", b"alpha");
        dir.seed_folder("f2", None, "F2");
        dir.seed_file("x2", None, "a", b"root file");
        dir.seed_file("x3", None, "photo.png", b"png");
        Arc::new(dir)
    }

    fn setup(dir: &Arc<MemoryDirectory>) -> (Workspace, EventHandler) {
        let events = EventHandler::new();
        let service: Arc<dyn DirectoryService> = dir.clone();
        let ws = Workspace::new(service, events.sender(), settings());
        (ws, events)
    }

    async fn settle(ws: &mut Workspace, events: &mut EventHandler) {
        while !ws.is_idle() {
            let event = events.next().await.unwrap();
            ws.handle_event(event);
        }
    }

    async fn opened(dir: &Arc<MemoryDirectory>) -> (Workspace, EventHandler) {
        let (mut ws, mut events) = setup(dir);
        ws.open();
        settle(&mut ws, &mut events).await;
        ws.take_signals();
        (ws, events)
    }

    fn names(ws: &Workspace) -> Vec<String> {
        ws.visible().items().iter().map(|e| e.name.clone()).collect()
    }

    fn id(s: &str) -> EntryId {
        EntryId::from(s)
    }

    fn is_acyclic(dir: &MemoryDirectory) -> bool {
        let entries = dir.entries();
        entries.iter().all(|entry| {
            let mut cursor = entry.parent_id.clone();
            let mut hops = 0;
            while let Some(parent) = cursor {
                if parent == entry.id || hops > entries.len() {
                    return false;
                }
                hops += 1;
                cursor = entries
                    .iter()
                    .find(|e| e.id == parent)
                    .and_then(|e| e.parent_id.clone());
            }
            true
        })
    }

    fn ancestors_of(dir: &MemoryDirectory, folder: &EntryId) -> Vec<EntryId> {
        let mut chain = Vec::new();
        let mut cursor = dir.get(folder.as_str()).and_then(|e| e.parent_id);
        while let Some(parent) = cursor {
            cursor = dir.get(parent.as_str()).and_then(|e| e.parent_id);
            chain.push(parent);
        }
        chain.reverse();
        chain
    }

    // === Listing and navigation tests ===

    #[tokio::test]
    async fn open_lists_root_folders_first() {
        let dir = seeded();
        let (ws, _events) = opened(&dir).await;
        assert_eq!(names(&ws), vec!["F1", "F2", "a", "photo.png"]);
        assert_eq!(ws.crumbs().len(), 1);
        assert!(!ws.listing().is_loading());
    }

    #[tokio::test]
    async fn thumbnails_resolve_for_visible_images() {
        let dir = seeded();
        let (ws, _events) = opened(&dir).await;
        assert_eq!(
            ws.thumbnails().url(&id("x3")),
            Some("mem://signed/blobs/x3/photo.png?ttl=300")
        );
        assert_eq!(ws.thumbnails().len(), 1);
        assert_eq!(dir.calls(Op::Sign), 1);
    }

    #[tokio::test]
    async fn thumbnails_are_not_resolved_twice() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.refresh();
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.calls(Op::Sign), 1);
    }

    #[tokio::test]
    async fn entering_a_folder_resets_selection() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.select(id("x2"));
        ws.enter_folder(&id("f1")).unwrap();
        assert!(ws.selection().is_empty());
        settle(&mut ws, &mut events).await;
        assert_eq!(names(&ws), vec!["a.txt"]);
        assert_eq!(ws.current_folder(), Some(&id("f1")));
        let crumbs: Vec<&str> = ws.crumbs().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(crumbs, vec!["Home", "F1"]);
    }

    #[tokio::test]
    async fn entering_a_file_is_refused() {
        let dir = seeded();
        let (mut ws, _events) = opened(&dir).await;
        assert!(matches!(
            ws.enter_folder(&id("x2")),
            Err(WorkspaceError::NotFound(_))
        ));
    }

    // === Mutation tests ===

    #[tokio::test]
    async fn breadcrumb_label_follows_rename() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.enter_folder(&id("f1")).unwrap();
        settle(&mut ws, &mut events).await;

        assert!(ws.rename(&id("f1"), "F1-renamed").unwrap().is_some());
        settle(&mut ws, &mut events).await;

        assert_eq!(ws.crumbs()[1].name, "F1-renamed");
        assert_eq!(dir.get("f1").unwrap().name, "F1-renamed");
        // Still inside the folder; nothing was reloaded.
        assert_eq!(names(&ws), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn failed_rename_restores_name() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        let before = ws.entries().to_vec();
        dir.fail_next_for(Op::Patch, "x2", "NAME_CONFLICT");

        ws.rename(&id("x2"), "b").unwrap();
        assert_eq!(ws.listing().get(&id("x2")).unwrap().name, "b");
        settle(&mut ws, &mut events).await;

        assert_eq!(ws.listing().get(&id("x2")).unwrap().name, "a");
        assert_eq!(ws.entries(), before.as_slice());
        let failed = ws.take_signals().into_iter().find_map(|s| match s {
            Signal::MutationFailed {
                failures,
                rolled_back,
                ..
            } => Some((failures, rolled_back)),
            _ => None,
        });
        let (failures, rolled_back) = failed.unwrap();
        assert!(rolled_back);
        assert_eq!(failures[0].1.code, "NAME_CONFLICT");
    }

    #[tokio::test]
    async fn rename_keeps_file_extension() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.rename(&id("x3"), "holiday").unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.get("x3").unwrap().name, "holiday.png");
    }

    #[tokio::test]
    async fn rename_validation_happens_locally() {
        let dir = seeded();
        let (mut ws, _events) = opened(&dir).await;
        let calls = dir.total_calls();
        assert!(matches!(
            ws.rename(&id("x2"), "   "),
            Err(WorkspaceError::NameRequired)
        ));
        assert!(matches!(
            ws.rename(&id("f1"), "F2"),
            Err(WorkspaceError::NameConflict(_))
        ));
        assert_eq!(ws.rename(&id("x2"), " a ").unwrap(), None);
        assert_eq!(dir.total_calls(), calls);
    }

    #[tokio::test]
    async fn failed_writes_restore_listing_for_every_kind() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        let before = ws.entries().to_vec();

        dir.fail_next(Op::Patch, "FORBIDDEN");
        ws.toggle_star(&id("x2")).unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(ws.entries(), before.as_slice());

        dir.fail_next(Op::Delete, "FORBIDDEN");
        ws.select(id("x2"));
        ws.delete_selected().unwrap();
        assert!(ws.listing().get(&id("x2")).is_none());
        settle(&mut ws, &mut events).await;
        assert_eq!(ws.entries(), before.as_slice());

        dir.fail_next(Op::Patch, "FORBIDDEN");
        dir.fail_next(Op::Patch, "FORBIDDEN");
        ws.select(id("x2"));
        ws.toggle_select(id("x3"));
        ws.move_selection(MoveTarget::folder(id("f2"), vec![]))
            .unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(ws.entries(), before.as_slice());
        assert_eq!(dir.get("x2").unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn star_toggles_and_filters() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.toggle_star(&id("x2")).unwrap();
        settle(&mut ws, &mut events).await;
        assert!(dir.get("x2").unwrap().starred);

        ws.toggle_star_only();
        assert_eq!(names(&ws), vec!["a"]);
    }

    // === Move tests ===

    #[tokio::test]
    async fn moving_into_a_selected_folder_makes_no_remote_calls() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        let calls = dir.total_calls();
        ws.select(id("x2"));
        ws.toggle_select(id("f1"));

        let result = ws.move_selection(MoveTarget::folder(id("f1"), vec![]));
        assert!(matches!(result, Err(WorkspaceError::MoveIntoSelf)));
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.total_calls(), calls);
        assert_eq!(ws.selection().len(), 2);
    }

    #[tokio::test]
    async fn move_hides_entries_and_updates_the_service() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.select(id("x2"));
        ws.toggle_select(id("x3"));
        ws.move_selection(MoveTarget::folder(id("f2"), vec![]))
            .unwrap();
        assert_eq!(names(&ws), vec!["F1", "F2"]);
        assert!(ws.selection().is_empty());
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.get("x2").unwrap().parent_id, Some(id("f2")));
        assert_eq!(dir.get("x3").unwrap().parent_id, Some(id("f2")));
    }

    #[tokio::test]
    async fn partial_batch_move_refetches_listing() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        dir.fail_next_for(Op::Patch, "x3", "FORBIDDEN");
        ws.select(id("x2"));
        ws.toggle_select(id("x3"));
        ws.move_selection(MoveTarget::folder(id("f2"), vec![]))
            .unwrap();
        settle(&mut ws, &mut events).await;

        // x2 went through on the server; the refetch shows that.
        assert_eq!(names(&ws), vec!["F1", "F2", "photo.png"]);
        assert_eq!(dir.get("x2").unwrap().parent_id, Some(id("f2")));
    }

    #[tokio::test]
    async fn dragging_an_unselected_item_moves_only_it() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.select(id("x2"));
        ws.drop_on(&id("x3"), &id("f2")).unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.get("x3").unwrap().parent_id, Some(id("f2")));
        assert_eq!(dir.get("x2").unwrap().parent_id, None);
        assert!(ws.selection().is_selected(&id("x2")));
    }

    #[tokio::test]
    async fn dropping_on_a_breadcrumb_moves_up() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.enter_folder(&id("f1")).unwrap();
        settle(&mut ws, &mut events).await;
        ws.drop_on_breadcrumb(&id("x1"), 0).unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.get("x1").unwrap().parent_id, None);
        assert!(ws.entries().is_empty());
    }

    #[tokio::test]
    async fn picker_refuses_descendant_destination() {
        let dir = MemoryDirectory::new();
        dir.seed_folder("f1", None, "F1");
        dir.seed_folder("f2", Some("f1"), "F2");
        dir.seed_folder("f3", Some("f2"), "F3");
        let dir = Arc::new(dir);
        let (mut ws, mut events) = opened(&dir).await;

        ws.select(id("f1"));
        ws.open_picker();
        settle(&mut ws, &mut events).await;
        for folder in ["f1", "f2", "f3"] {
            assert!(ws.picker_enter(&id(folder)));
            settle(&mut ws, &mut events).await;
        }
        assert!(matches!(
            ws.confirm_picker(),
            Err(WorkspaceError::MoveIntoDescendant)
        ));
        assert_eq!(dir.calls(Op::Patch), 0);

        assert!(ws.picker_breadcrumb(0));
        settle(&mut ws, &mut events).await;
        assert!(matches!(ws.confirm_picker(), Err(WorkspaceError::NoOpMove)));
        assert!(ws.picker().is_some());
    }

    #[tokio::test]
    async fn picker_moves_selection_and_closes() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.select(id("x2"));
        ws.open_picker();
        settle(&mut ws, &mut events).await;
        let folders: Vec<&str> = ws
            .picker()
            .unwrap()
            .folders()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(folders, vec!["F1", "F2"]);

        ws.picker_enter(&id("f1"));
        settle(&mut ws, &mut events).await;
        ws.confirm_picker().unwrap();
        assert!(ws.picker().is_none());
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.get("x2").unwrap().parent_id, Some(id("f1")));
    }

    #[tokio::test]
    async fn moves_never_create_cycles() {
        let dir = MemoryDirectory::new();
        dir.seed_folder("f1", None, "F1");
        dir.seed_folder("f2", Some("f1"), "F2");
        dir.seed_folder("f3", Some("f2"), "F3");
        dir.seed_folder("g1", None, "F4");
        let dir = Arc::new(dir);
        let (mut ws, mut events) = opened(&dir).await;
        // Search results carry every folder with its real parent.
        ws.set_search("f");
        settle(&mut ws, &mut events).await;
        assert_eq!(ws.entries().len(), 4);

        let folders = ["f1", "f2", "f3", "g1"];
        for item in folders {
            for dest in folders {
                let target = MoveTarget::folder(id(dest), ancestors_of(&dir, &id(dest)));
                let _ = ws.move_entries(&[id(item)], target);
                settle(&mut ws, &mut events).await;
                assert!(is_acyclic(&dir), "cycle after moving {} into {}", item, dest);
            }
            let _ = ws.move_entries(&[id(item)], MoveTarget::root());
            settle(&mut ws, &mut events).await;
            assert!(is_acyclic(&dir));
        }
    }

    #[tokio::test]
    async fn stale_listing_is_discarded() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.enter_folder(&id("f1")).unwrap();
        ws.click_breadcrumb(0);

        let mut loads = vec![events.next().await.unwrap(), events.next().await.unwrap()];
        // Deliver the newer listing first, the superseded one last.
        loads.sort_by_key(|e| match e {
            Event::ListingLoaded { ticket, .. } => std::cmp::Reverse(ticket.generation),
            _ => std::cmp::Reverse(0),
        });
        for event in loads {
            ws.handle_event(event);
        }
        settle(&mut ws, &mut events).await;

        assert_eq!(names(&ws), vec!["F1", "F2", "a", "photo.png"]);
        assert_eq!(ws.current_folder(), None);
    }

    #[tokio::test]
    async fn failed_listing_keeps_previous_entries() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        dir.fail_next(Op::List, "LOAD_FAILED");
        ws.refresh();
        settle(&mut ws, &mut events).await;
        assert_eq!(names(&ws), vec!["F1", "F2", "a", "photo.png"]);
        assert_eq!(
            ws.listing().error().map(|e| e.code.as_str()),
            Some("LOAD_FAILED")
        );
        assert!(ws.status_message.is_some());
    }

    #[tokio::test]
    async fn range_selection_follows_visible_order() {
        let dir = seeded();
        let (mut ws, _events) = opened(&dir).await;
        ws.select(id("f2"));
        ws.extend_selection(id("x3"), false);
        let selected = ws.selection().ordered(&ws.visible());
        assert_eq!(selected, vec![id("f2"), id("x2"), id("x3")]);

        ws.select(id("x2"));
        ws.extend_selection(id("x2"), false);
        assert_eq!(ws.selection().len(), 1);
    }

    #[tokio::test]
    async fn delete_refuses_folders_with_listed_children() {
        let dir = MemoryDirectory::new();
        dir.seed_folder("d1", None, "docs");
        dir.seed_file("x1", Some("d1"), "docs.txt", b"1");
        let dir = Arc::new(dir);
        let (mut ws, mut events) = opened(&dir).await;
        ws.set_search("docs");
        settle(&mut ws, &mut events).await;

        ws.select(id("d1"));
        assert!(matches!(
            ws.delete_selected(),
            Err(WorkspaceError::FolderNotEmpty)
        ));
        assert_eq!(dir.calls(Op::Delete), 0);
    }

    #[tokio::test]
    async fn delete_refuses_the_open_folder_when_it_has_children() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.enter_folder(&id("f1")).unwrap();
        settle(&mut ws, &mut events).await;
        assert!(ws.listing().get(&id("f1")).is_none());

        let result = ws.delete_entries(vec![id("f1")]);
        assert!(matches!(result, Err(WorkspaceError::FolderNotEmpty)));
        settle(&mut ws, &mut events).await;
        assert_eq!(dir.calls(Op::Delete), 0);
        assert!(dir.get("f1").is_some());
    }

    #[tokio::test]
    async fn failed_move_restores_selection() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        dir.fail_next_for(Op::Patch, "x2", "FORBIDDEN");
        dir.fail_next_for(Op::Patch, "x3", "FORBIDDEN");
        ws.select(id("x2"));
        ws.toggle_select(id("x3"));
        ws.move_selection(MoveTarget::folder(id("f2"), vec![]))
            .unwrap();
        assert!(ws.selection().is_empty());
        settle(&mut ws, &mut events).await;

        assert_eq!(names(&ws), vec!["F1", "F2", "a", "photo.png"]);
        assert_eq!(ws.selection().len(), 2);
        assert!(ws.selection().is_selected(&id("x2")));
        assert!(ws.selection().is_selected(&id("x3")));
    }

    #[tokio::test]
    async fn failed_delete_restores_selection() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        dir.fail_next(Op::Delete, "FORBIDDEN");
        ws.select(id("x2"));
        ws.delete_selected().unwrap();
        assert!(ws.selection().is_empty());
        settle(&mut ws, &mut events).await;
        assert_eq!(names(&ws), vec!["F1", "F2", "a", "photo.png"]);
        assert!(ws.selection().is_selected(&id("x2")));
    }

    #[tokio::test]
    async fn delete_removes_selected_entries() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.select(id("x2"));
        ws.toggle_select(id("f2"));
        ws.delete_selected().unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(names(&ws), vec!["F1", "photo.png"]);
        assert!(dir.get("x2").is_none());
        assert!(dir.get("f2").is_none());
        assert_eq!(ws.delete_selected().unwrap(), None);
    }

    #[tokio::test]
    async fn create_folder_appears_in_listing() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.create_folder("  Reports ").unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(names(&ws), vec!["F1", "F2", "Reports", "a", "photo.png"]);

        let calls = dir.total_calls();
        assert!(matches!(
            ws.create_folder(" "),
            Err(WorkspaceError::NameRequired)
        ));
        assert_eq!(dir.total_calls(), calls);
    }

    #[tokio::test]
    async fn created_folder_is_dropped_after_navigation() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.create_folder("Reports").unwrap();
        ws.enter_folder(&id("f1")).unwrap();
        settle(&mut ws, &mut events).await;
        assert_eq!(names(&ws), vec!["a.txt"]);
    }

    // === URL and export tests ===

    #[tokio::test]
    async fn preview_falls_back_to_public_url() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        dir.set_signing_enabled(false);
        ws.open_preview(&id("x2")).unwrap();
        settle(&mut ws, &mut events).await;
        let url = ws.take_signals().into_iter().find_map(|s| match s {
            Signal::PreviewReady { url, .. } => Some(url),
            _ => None,
        });
        assert_eq!(url.as_deref(), Some("mem://public/blobs/x2/a"));
    }

    #[tokio::test]
    async fn export_reports_progress_and_archive() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.export(&id("f1")).unwrap();
        assert!(ws.is_exporting());
        settle(&mut ws, &mut events).await;

        let signals = ws.take_signals();
        assert!(signals
            .iter()
            .any(|s| matches!(s, Signal::ExportProgress(p) if p.current_file == "F1/a.txt")));
        let archive = signals.into_iter().find_map(|s| match s {
            Signal::ExportReady(archive) => Some(archive),
            _ => None,
        });
        let archive = archive.unwrap();
        assert_eq!(archive.file_name, "F1.zip");
        assert_eq!(archive.file_count, 1);
        assert!(!ws.is_exporting());
    }

    #[tokio::test]
    async fn cancelled_export_is_ignored() {
        let dir = seeded();
        let (mut ws, mut events) = opened(&dir).await;
        ws.export(&id("f1")).unwrap();
        ws.cancel_export();
        settle(&mut ws, &mut events).await;
        assert!(!ws
            .take_signals()
            .iter()
            .any(|s| matches!(s, Signal::ExportReady(_) | Signal::ExportProgress(_))));
    }

    #[test]
    fn set_status_message_stores_message() {
        let dir = seeded();
        let events = EventHandler::new();
        let mut ws = Workspace::new(dir, events.sender(), settings());
        ws.set_status_message("test message".to_string());
        let (msg, _) = ws.status_message.as_ref().unwrap();
        assert_eq!(msg, "test message");
    }

    #[test]
    fn clear_expired_status_removes_old() {
        let dir = seeded();
        let events = EventHandler::new();
        let mut ws = Workspace::new(dir, events.sender(), settings());
        ws.set_status_message("fresh".to_string());
        ws.clear_expired_status();
        assert!(ws.status_message.is_some());

        ws.status_message = Some((
            "old".to_string(),
            Instant::now() - Duration::from_secs(5),
        ));
        ws.clear_expired_status();
        assert!(ws.status_message.is_none());
    }
}
