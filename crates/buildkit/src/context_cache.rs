//! Fingerprint-keyed archive cache.
//!
//! Archives live at `<scratch>/<service>/contexts/<fingerprint>.tar`. An
//! existing file is trusted on name alone. Creation happens under an exclusive
//! lock on `<fingerprint>.lock` and goes through a temporary file that is
//! renamed into place, so a crash never leaves a truncated archive behind
//! under the final name.

use crate::archive::{pack_to_file, ArchiveSource};
use crate::cancel::CancellationToken;
use crate::fingerprint::fingerprint;
use dockyard_core::error::IoResultExt;
use dockyard_core::layout::{contexts_dir, GENERATED_MANIFEST_NAME};
use dockyard_core::{BuildArguments, Error, ExcludedPaths, Result};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

/// A packaged build context on local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub fingerprint: String,
    /// True when an existing archive was reused.
    pub reused: bool,
}

pub struct ContextCache {
    dir: PathBuf,
    excluded: ExcludedPaths,
}

impl ContextCache {
    /// Cache for one service under `scratch_dir`.
    pub fn for_service(scratch_dir: &Path, service: &str) -> Self {
        Self::new(contexts_dir(scratch_dir, service))
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            excluded: ExcludedPaths::default(),
        }
    }

    /// Leave these paths out of both the fingerprint and the archive.
    pub fn with_excluded(mut self, excluded: ExcludedPaths) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.tar", fingerprint))
    }

    /// Reuse the archive for this context's fingerprint or pack a new one.
    ///
    /// Blocking; call from `spawn_blocking` in async code.
    pub fn get_or_create(
        &self,
        source_root: &Path,
        args: &BuildArguments,
        cancel: &CancellationToken,
    ) -> Result<ArchiveHandle> {
        let fingerprint = fingerprint(source_root, args, &self.excluded, cancel)?;
        let path = self.archive_path(&fingerprint);

        if path.is_file() {
            debug!(fingerprint = %fingerprint, path = %path.display(), "Reusing packaged context");
            return Ok(ArchiveHandle {
                path,
                fingerprint,
                reused: true,
            });
        }

        fs::create_dir_all(&self.dir).at_path(&self.dir)?;

        let lock_path = self.dir.join(format!("{}.lock", fingerprint));
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .at_path(&lock_path)?;
        lock.lock_exclusive().at_path(&lock_path)?;

        // Another worker may have packed it while we waited.
        if path.is_file() {
            debug!(fingerprint = %fingerprint, "Context packed concurrently, reusing");
            return Ok(ArchiveHandle {
                path,
                fingerprint,
                reused: true,
            });
        }

        let start = Instant::now();
        let (sources, _manifest_dir) = self.sources(source_root, args)?;

        let temp = NamedTempFile::new_in(&self.dir).at_path(&self.dir)?;
        let files = pack_to_file(&sources, temp.as_file(), temp.path(), &self.excluded, cancel)?;
        temp.persist(&path)
            .map_err(|e| Error::io(&path, e.error))?;

        info!(
            fingerprint = %fingerprint,
            files,
            elapsed_ms = start.elapsed().as_millis() as u64,
            path = %path.display(),
            "Packaged build context"
        );

        Ok(ArchiveHandle {
            path,
            fingerprint,
            reused: false,
        })
    }

    /// Context sources in packing order. Inline manifests are materialized
    /// into a temporary directory that must outlive the pack.
    fn sources(
        &self,
        source_root: &Path,
        args: &BuildArguments,
    ) -> Result<(Vec<ArchiveSource>, Option<TempDir>)> {
        let mut sources: Vec<ArchiveSource> = args
            .context
            .iter()
            .map(|(source, prefix)| ArchiveSource::new(source_root.join(source), prefix.clone()))
            .collect();

        let manifest_dir = match args.inline_manifest() {
            Some(content) => {
                let dir = TempDir::new().map_err(|e| Error::io(std::env::temp_dir(), e))?;
                let manifest = dir.path().join(GENERATED_MANIFEST_NAME);
                fs::write(&manifest, content).at_path(&manifest)?;
                sources.push(ArchiveSource::new(manifest, GENERATED_MANIFEST_NAME));
                Some(dir)
            }
            None => None,
        };

        Ok((sources, manifest_dir))
    }
}
