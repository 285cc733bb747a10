//! Tar serialization of build contexts.

use crate::cancel::{CancelCheck, CancellationToken};
use dockyard_core::error::IoResultExt;
use dockyard_core::layout::is_excluded_dir;
use dockyard_core::{Error, ExcludedPaths, Result};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// A context source and the prefix its contents take inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub path: PathBuf,
    pub prefix: PathBuf,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
        }
    }
}

/// Walk a context directory: sorted by name, excluded directories and the
/// run's own outputs pruned, symlinks not followed.
pub(crate) fn walk_context(
    root: &Path,
    excluded: &ExcludedPaths,
) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> {
    let outputs = excluded.scoped(root);
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            e.depth() == 0
                || (!(e.file_type().is_dir() && is_excluded_dir(e.file_name())) && !outputs.contains(e.path()))
        })
}

pub(crate) fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    Error::io(path, io::Error::from(err))
}

/// Stream `sources` into a tar archive written to `writer`.
///
/// Directories are walked recursively and every regular file lands at
/// `prefix/<path relative to the source>`. A file source lands at its prefix,
/// or under its own name when the prefix is empty. Symlinks and other
/// non-regular files are skipped. Permissions, size and mtime come from the
/// filesystem. Returns the number of files written.
pub fn pack<W: Write>(
    sources: &[ArchiveSource],
    writer: W,
    excluded: &ExcludedPaths,
    cancel: &CancellationToken,
) -> Result<(W, usize)> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    let mut count = 0;

    for source in sources {
        cancel.check()?;
        let meta = std::fs::symlink_metadata(&source.path).at_path(&source.path)?;

        if meta.is_file() {
            let name = if source.prefix.as_os_str().is_empty() {
                source
                    .path
                    .file_name()
                    .map(PathBuf::from)
                    .ok_or_else(|| Error::io(&source.path, io::Error::from(io::ErrorKind::InvalidInput)))?
            } else {
                source.prefix.clone()
            };
            builder
                .append_path_with_name(&source.path, &name)
                .at_path(&source.path)?;
            count += 1;
            continue;
        }

        if !meta.is_dir() {
            debug!(path = %source.path.display(), "Skipping non-regular context source");
            continue;
        }

        for entry in walk_context(&source.path, excluded) {
            cancel.check()?;
            let entry = entry.map_err(|e| walk_error(&source.path, e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&source.path)
                .unwrap_or_else(|_| entry.path());
            let name = source.prefix.join(relative);
            trace!(file = %name.display(), "Adding to archive");

            builder
                .append_path_with_name(entry.path(), &name)
                .at_path(entry.path())?;
            count += 1;
        }
    }

    let writer = builder.into_inner().map_err(|e| Error::io("<archive>", e))?;
    Ok((writer, count))
}

/// Pack `sources` into `target`, flushing and syncing before returning.
pub fn pack_to_file(
    sources: &[ArchiveSource],
    target: &File,
    target_path: &Path,
    excluded: &ExcludedPaths,
    cancel: &CancellationToken,
) -> Result<usize> {
    let (writer, count) = pack(sources, BufWriter::new(target), excluded, cancel)?;
    let file = writer
        .into_inner()
        .map_err(|e| Error::io(target_path, e.into_error()))?;
    file.sync_all().at_path(target_path)?;
    Ok(count)
}
