use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::entry::{Entry, EntryId};
use crate::error::{ErrorReport, Result, WorkspaceError};
use crate::event::ProgressUpdate;
use crate::remote::{resolve_access_url, DirectoryService};

/// Characters never allowed in an archive path segment.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Name used when sanitizing leaves nothing.
const FALLBACK_NAME: &str = "untitled";

/// A file left out of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub id: EntryId,
    pub path: String,
    pub reason: ErrorReport,
}

/// A finished export, ready to be offered as a download.
#[derive(Debug, Clone)]
pub struct ExportArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub file_count: usize,
    pub skipped: Vec<SkippedFile>,
}

impl ExportArchive {
    /// Write the archive into `dir`, never overwriting an existing file.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let name = unique_name(&self.file_name, |candidate| dir.join(candidate).exists());
        let path = dir.join(name);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

/// Strip control and path-unsafe characters from one path segment.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !UNSAFE_CHARS.contains(c))
        .collect();
    let cleaned = cleaned.trim().trim_end_matches('.').trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Resolve a name collision by appending `_copy`, `_copy2`, etc. before the extension.
pub fn unique_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], Some(&name[i + 1..])),
        _ => (name, None),
    };
    for i in 1..=1000 {
        let suffix = if i == 1 {
            "_copy".to_string()
        } else {
            format!("_copy{}", i)
        };
        let candidate = match ext {
            Some(e) => format!("{}{}.{}", stem, suffix, e),
            None => format!("{}{}", stem, suffix),
        };
        if !taken(&candidate) {
            return candidate;
        }
    }
    name.to_string()
}

/// Build a zip of `folder`'s whole subtree.
///
/// Walks depth-first, listing each folder through the service. Files are
/// stored under `<folder>/<sub>/.../<file>`. Files whose bytes cannot be
/// resolved are skipped and reported; a folder that cannot be listed fails
/// the export.
pub async fn export_folder(
    service: &dyn DirectoryService,
    folder: &Entry,
    url_ttl: Duration,
    mut progress: impl FnMut(ProgressUpdate) + Send,
) -> Result<ExportArchive> {
    if !folder.is_folder() {
        return Err(WorkspaceError::NotFound(format!("{} is not a folder", folder.id)));
    }

    let root = sanitize_segment(&folder.name);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut stack = vec![(folder.id.clone(), root.clone())];
    let mut skipped = Vec::new();
    let mut discovered = 0;
    let mut written = 0;

    while let Some((folder_id, prefix)) = stack.pop() {
        let children = service.list(Some(&folder_id), None).await?;
        let mut used: HashSet<String> = HashSet::new();
        let mut subfolders = Vec::new();

        for child in &children {
            let name = unique_name(&sanitize_segment(&child.name), |n| used.contains(n));
            used.insert(name.clone());
            let path = format!("{}/{}", prefix, name);

            if child.is_folder() {
                subfolders.push((child.id.clone(), path));
                continue;
            }

            discovered += 1;
            progress(ProgressUpdate {
                current_file: path.clone(),
                current: written,
                total: discovered,
            });

            match fetch_file(service, child, url_ttl).await {
                Ok(bytes) => {
                    writer.start_file(path.as_str(), options)?;
                    writer.write_all(&bytes)?;
                    written += 1;
                    debug!(path = %path, size = bytes.len(), "file added to export");
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "skipping file in export");
                    skipped.push(SkippedFile {
                        id: child.id.clone(),
                        path,
                        reason: ErrorReport::from(&e),
                    });
                }
            }
        }

        // Reverse so the first subfolder is walked next.
        stack.extend(subfolders.into_iter().rev());
    }

    let bytes = writer.finish()?.into_inner();
    info!(
        folder = %folder.id,
        files = written,
        skipped = skipped.len(),
        "export finished"
    );
    Ok(ExportArchive {
        file_name: format!("{}.zip", root),
        bytes,
        file_count: written,
        skipped,
    })
}

async fn fetch_file(service: &dyn DirectoryService, file: &Entry, ttl: Duration) -> Result<Vec<u8>> {
    let url = resolve_access_url(service, file, ttl).await?;
    service.fetch(&url).await
}
