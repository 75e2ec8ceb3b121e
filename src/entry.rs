use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extensions treated as images when the MIME type is missing.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "avif"];

/// Opaque identifier of a remote entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Type of remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File,
}

/// One node of the remote object store, as mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    #[serde(default)]
    pub parent_id: Option<EntryId>,
    /// Storage-level name; files keep their extension here.
    pub name: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub starred: bool,
}

impl Entry {
    /// Build a folder record.
    pub fn folder(id: impl Into<EntryId>, parent_id: Option<EntryId>, name: &str) -> Self {
        Self {
            id: id.into(),
            parent_id,
            name: name.to_string(),
            kind: EntryKind::Folder,
            mime_type: None,
            ext: None,
            size_bytes: None,
            storage_path: None,
            updated_at: Utc::now(),
            starred: false,
        }
    }

    /// Build a file record. `ext` is derived from `name`.
    pub fn file(
        id: impl Into<EntryId>,
        parent_id: Option<EntryId>,
        name: &str,
        storage_path: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id,
            name: name.to_string(),
            kind: EntryKind::File,
            mime_type: None,
            ext: split_extension(name).1.map(|e| e.to_lowercase()),
            size_bytes: None,
            storage_path: storage_path.map(str::to_string),
            updated_at: Utc::now(),
            starred: false,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    /// Name as shown in listings: files lose their extension.
    pub fn display_name(&self) -> &str {
        match self.kind {
            EntryKind::Folder => &self.name,
            EntryKind::File => split_extension(&self.name).0,
        }
    }

    /// Storage name for a rename typed in display form.
    ///
    /// Files get their extension re-appended unless the user typed it.
    pub fn storage_name_for(&self, display: &str) -> String {
        match (self.kind, self.extension()) {
            (EntryKind::File, Some(ext)) => {
                let suffix = format!(".{}", ext);
                if display.to_lowercase().ends_with(&suffix.to_lowercase()) {
                    display.to_string()
                } else {
                    format!("{}{}", display, suffix)
                }
            }
            _ => display.to_string(),
        }
    }

    /// Extension from the `ext` hint, falling back to the name.
    pub fn extension(&self) -> Option<String> {
        if self.kind == EntryKind::Folder {
            return None;
        }
        self.ext
            .clone()
            .or_else(|| split_extension(&self.name).1.map(str::to_string))
    }

    /// Whether a thumbnail can be rendered for this entry.
    pub fn is_image(&self) -> bool {
        if self.kind != EntryKind::File {
            return false;
        }
        if let Some(mime) = &self.mime_type {
            return mime.starts_with("image/");
        }
        self.extension()
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Apply a patch in place, returning whether anything changed.
    pub fn apply(&mut self, patch: &EntryPatch) -> bool {
        let mut changed = false;
        if let Some(name) = &patch.name {
            changed |= self.name != *name;
            self.name = name.clone();
        }
        if let Some(parent) = &patch.parent_id {
            changed |= self.parent_id != *parent;
            self.parent_id = parent.clone();
        }
        if let Some(starred) = patch.starred {
            changed |= self.starred != starred;
            self.starred = starred;
        }
        changed
    }
}

/// Split `name` into (stem, extension). Dotfiles and trailing dots have no extension.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(i) if i + 1 == name.len() => (name, None),
        Some(i) => (&name[..i], Some(&name[i + 1..])),
    }
}

/// Partial update sent to the directory service.
///
/// `parent_id: Some(None)` reparents to the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<EntryId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
}

impl EntryPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn reparent(parent_id: Option<EntryId>) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Default::default()
        }
    }

    pub fn star(starred: bool) -> Self {
        Self {
            starred: Some(starred),
            ..Default::default()
        }
    }
}
