//! Client engine for a hierarchical remote file workspace.
//!
//! A [`Workspace`] mirrors one folder of a remote directory service at a time
//! and applies every write optimistically, rolling back when the service
//! refuses it. Hosts drive it with [`handler::Command`]s and read back
//! [`Signal`]s.

pub mod app;
pub mod config;
pub mod entry;
pub mod error;
pub mod event;
pub mod handler;
pub mod logging;
pub mod remote;
pub mod workspace;

pub use app::{Signal, Workspace, WorkspaceSettings};
pub use entry::{Entry, EntryId, EntryKind, EntryPatch};
pub use error::{ErrorCategory, ErrorReport, Result, WorkspaceError};
