use thiserror::Error;

use crate::entry::EntryId;

/// Workspace-wide result type alias.
pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// How a failure is surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Non-fatal banner; the last good state stays visible.
    Transient,
    /// Bad user input.
    Validation,
    /// Session problems; the host should re-authenticate.
    Authorization,
    /// Refused locally before any remote call.
    Structural,
    /// Per-entry blob resolution failures.
    Resource,
    Other,
}

/// Workspace error types.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to load folder: {0}")]
    LoadFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("A name is required")]
    NameRequired,

    #[error("An item with that name already exists: {0}")]
    NameConflict(String),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Permission denied")]
    Forbidden,

    #[error("Folder is not empty")]
    FolderNotEmpty,

    #[error("Cannot move a folder into itself")]
    MoveIntoSelf,

    #[error("Cannot move a folder into one of its own subfolders")]
    MoveIntoDescendant,

    #[error("Items are already in that folder")]
    NoOpMove,

    #[error("Entry has no storage path: {0}")]
    NoStoragePath(EntryId),

    #[error("File URL unavailable: {0}")]
    FileUrlUnavailable(String),

    #[error("Storage bucket not found")]
    BucketNotFound,

    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Unknown server code, passed through verbatim.
    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl WorkspaceError {
    /// Map an envelope error code to a typed error.
    pub fn from_code(code: &str, message: Option<&str>) -> Self {
        let message = message.unwrap_or(code).to_string();
        match code {
            "LOAD_FAILED" => Self::LoadFailed(message),
            "NAME_REQUIRED" => Self::NameRequired,
            "NAME_CONFLICT" => Self::NameConflict(message),
            "UNAUTHENTICATED" | "INVALID_TOKEN" | "SESSION_EXPIRED" => Self::Unauthenticated,
            "FORBIDDEN" => Self::Forbidden,
            "FOLDER_NOT_EMPTY" => Self::FolderNotEmpty,
            "NO_STORAGE_PATH" => Self::NoStoragePath(EntryId::new(message)),
            "FILE_URL_UNAVAILABLE" => Self::FileUrlUnavailable(message),
            "BUCKET_NOT_FOUND" => Self::BucketNotFound,
            "NOT_FOUND" => Self::NotFound(message),
            _ => Self::Remote {
                code: code.to_string(),
                message,
            },
        }
    }

    /// Canonical code string, the inverse of [`WorkspaceError::from_code`].
    pub fn code(&self) -> &str {
        match self {
            Self::LoadFailed(_) => "LOAD_FAILED",
            Self::Network(_) => "NETWORK",
            Self::NameRequired => "NAME_REQUIRED",
            Self::NameConflict(_) => "NAME_CONFLICT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::FolderNotEmpty => "FOLDER_NOT_EMPTY",
            Self::MoveIntoSelf => "MOVE_INTO_SELF",
            Self::MoveIntoDescendant => "MOVE_INTO_DESCENDANT",
            Self::NoOpMove => "NO_OP_MOVE",
            Self::NoStoragePath(_) => "NO_STORAGE_PATH",
            Self::FileUrlUnavailable(_) => "FILE_URL_UNAVAILABLE",
            Self::BucketNotFound => "BUCKET_NOT_FOUND",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Remote { code, .. } => code,
            Self::Decode(_) => "DECODE",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "IO",
            Self::Archive(_) => "ARCHIVE",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LoadFailed(_) | Self::Network(_) => ErrorCategory::Transient,
            Self::NameRequired | Self::NameConflict(_) => ErrorCategory::Validation,
            Self::Unauthenticated | Self::Forbidden => ErrorCategory::Authorization,
            Self::FolderNotEmpty | Self::MoveIntoSelf | Self::MoveIntoDescendant | Self::NoOpMove => {
                ErrorCategory::Structural
            }
            Self::NoStoragePath(_) | Self::FileUrlUnavailable(_) | Self::BucketNotFound => {
                ErrorCategory::Resource
            }
            Self::NotFound(_)
            | Self::Remote { .. }
            | Self::Decode(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Archive(_) => ErrorCategory::Other,
        }
    }
}

/// Cloneable summary of an error, as surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&WorkspaceError> for ErrorReport {
    fn from(err: &WorkspaceError) -> Self {
        Self {
            code: err.code().to_string(),
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for WorkspaceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
