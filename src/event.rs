use tokio::sync::mpsc;

use crate::entry::{Entry, EntryId};
use crate::error::{Result, WorkspaceError};
use crate::workspace::export::ExportArchive;
use crate::workspace::listing::LoadTicket;
use crate::workspace::mutation::MutationId;

/// Progress update from a running export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Archive path of the file being processed.
    pub current_file: String,
    /// Number of files processed so far.
    pub current: usize,
    /// Files discovered so far; grows while the walk is in progress.
    pub total: usize,
}

/// Outcome of one remote write inside a mutation.
#[derive(Debug)]
pub struct WriteOutcome {
    pub id: EntryId,
    pub result: Result<Option<Entry>>,
}

/// Completion events posted back to the workspace by background tasks.
#[derive(Debug)]
pub enum Event {
    /// A directory listing finished.
    ListingLoaded {
        ticket: LoadTicket,
        result: Result<Vec<Entry>>,
    },
    /// Every remote write of a mutation finished.
    MutationSettled {
        mutation: MutationId,
        outcomes: Vec<WriteOutcome>,
    },
    /// A folder creation finished.
    FolderCreated {
        ticket: LoadTicket,
        result: Result<Entry>,
    },
    /// A thumbnail URL resolution finished.
    ThumbnailResolved { id: EntryId, result: Result<String> },
    /// A preview URL resolution finished.
    PreviewResolved { entry: Entry, result: Result<String> },
    /// A destination picker listing finished.
    PickerListed { generation: u64, result: Result<Vec<Entry>> },
    /// Progress from a running export.
    ExportProgress { ticket: u64, update: ProgressUpdate },
    /// An export finished.
    ExportFinished {
        ticket: u64,
        result: Result<ExportArchive>,
    },
}

/// Channel that background tasks use to report back to the workspace owner.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<Event>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { rx, tx }
    }

    /// Get a sender clone for background tasks.
    pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
        self.tx.clone()
    }

    /// Receive the next event (waits until one is available).
    pub async fn next(&mut self) -> Result<Event> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| WorkspaceError::Network("event channel closed".into()))
    }
}
