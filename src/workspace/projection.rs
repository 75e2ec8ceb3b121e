use std::cmp::Ordering;
use std::collections::HashMap;

use crate::entry::{Entry, EntryId};

/// Sort key for the visible list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Updated,
    Name,
    Size,
    Type,
}

impl SortKey {
    /// Parse a sort key from a config string.
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => SortKey::Name,
            "size" => SortKey::Size,
            "type" => SortKey::Type,
            _ => SortKey::Updated,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Updated => "Updated",
            SortKey::Name => "Name",
            SortKey::Size => "Size",
            SortKey::Type => "Type",
        }
    }

    /// Cycle to the next sort key.
    pub fn next(&self) -> Self {
        match self {
            SortKey::Updated => SortKey::Name,
            SortKey::Name => SortKey::Size,
            SortKey::Size => SortKey::Type,
            SortKey::Type => SortKey::Updated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    pub fn parse(s: &str) -> Self {
        match s {
            "asc" => SortDir::Asc,
            _ => SortDir::Desc,
        }
    }

    pub fn flip(&self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

/// User-controlled view settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOptions {
    pub star_only: bool,
    pub search_text: String,
    pub sort_key: SortKey,
    pub sort_dir: SortDir,
}

/// Ordered, filtered view of the cached entries.
#[derive(Debug)]
pub struct Projection<'a> {
    items: Vec<&'a Entry>,
    id_to_index: HashMap<EntryId, usize>,
}

impl<'a> Projection<'a> {
    pub fn items(&self) -> &[&'a Entry] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index_of(&self, id: &EntryId) -> Option<usize> {
        self.id_to_index.get(id).copied()
    }

    pub fn get(&self, index: usize) -> Option<&'a Entry> {
        self.items.get(index).copied()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.id_to_index.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &'a EntryId> + '_ {
        self.items.iter().map(|e| &e.id)
    }
}

/// Filter and sort `entries` for display.
///
/// Folders and files are sorted separately by the same comparator and
/// concatenated folders-first. The sort is stable, so equal keys keep their
/// listing order.
pub fn project<'a>(entries: &'a [Entry], options: &ViewOptions) -> Projection<'a> {
    let needle = options.search_text.trim().to_lowercase();
    let visible = entries.iter().filter(|e| {
        (!options.star_only || e.starred)
            && (needle.is_empty() || e.display_name().to_lowercase().contains(&needle))
    });

    let (mut folders, mut files): (Vec<&Entry>, Vec<&Entry>) = visible.partition(|e| e.is_folder());
    let cmp = |a: &&Entry, b: &&Entry| {
        let ord = compare(a, b, options.sort_key);
        match options.sort_dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    };
    folders.sort_by(cmp);
    files.sort_by(cmp);
    folders.extend(files);

    let id_to_index = folders
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.clone(), i))
        .collect();
    Projection {
        items: folders,
        id_to_index,
    }
}

fn compare(a: &Entry, b: &Entry, key: SortKey) -> Ordering {
    match key {
        SortKey::Updated => a.updated_at.cmp(&b.updated_at),
        SortKey::Name => a
            .display_name()
            .to_lowercase()
            .cmp(&b.display_name().to_lowercase()),
        SortKey::Size => a.size_bytes.unwrap_or(0).cmp(&b.size_bytes.unwrap_or(0)),
        SortKey::Type => type_label(a).cmp(&type_label(b)),
    }
}

fn type_label(e: &Entry) -> String {
    e.extension()
        .or_else(|| e.mime_type.clone())
        .unwrap_or_default()
        .to_lowercase()
}
