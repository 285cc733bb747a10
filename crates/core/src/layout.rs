//! Well-known file names and the on-disk layout of a run.

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-project configuration file searched for during discovery.
pub const CONFIG_FILE_NAME: &str = "buildsettings.json";

/// Hidden scratch directory holding cached context archives.
pub const SCRATCH_DIR_NAME: &str = ".dockyard";

/// Subdirectory of a service's scratch folder holding archives keyed by fingerprint.
pub const CONTEXTS_DIR_NAME: &str = "contexts";

pub const DIGEST_CACHE_FILE_NAME: &str = ".digestcache";

/// File name given to manifests synthesized by a builder.
pub const GENERATED_MANIFEST_NAME: &str = "Dockerfile.generated";

pub const DEFAULT_MANIFEST_NAME: &str = "Dockerfile";

pub const DEFAULT_DEPLOYMENT_FILE: &str = "deployment.yaml";

/// Directory names pruned from discovery, fingerprinting and packaging.
pub const EXCLUDED_DIRS: &[&str] = &[".git", "node_modules", "bin", "obj", SCRATCH_DIR_NAME];

pub fn is_excluded_dir(name: &OsStr) -> bool {
    name.to_str()
        .map(|n| EXCLUDED_DIRS.contains(&n))
        .unwrap_or(false)
}

/// Locations a run writes to that may sit inside the source tree: the
/// scratch directory, the digest cache and the artifact directory.
///
/// Stored resolved (absolute, symlinks followed) so a relative
/// `./Buildscripts/dist` and a walk over `/repo` agree on what they name.
/// Paths that do not exist yet resolve against their nearest existing
/// ancestor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedPaths {
    paths: Vec<PathBuf>,
}

impl ExcludedPaths {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut paths: Vec<PathBuf> = paths.into_iter().map(|p| resolve(p.as_ref())).collect();
        paths.sort();
        paths.dedup();
        Self { paths }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Matcher for the entries of a walk rooted at `walk_root`.
    pub fn scoped(&self, walk_root: &Path) -> ScopedExclusions {
        let resolved_root = if self.paths.is_empty() {
            walk_root.to_path_buf()
        } else {
            resolve(walk_root)
        };
        ScopedExclusions {
            walk_root: walk_root.to_path_buf(),
            resolved_root,
            paths: self.paths.clone(),
        }
    }
}

/// [`ExcludedPaths`] bound to one walk root.
#[derive(Debug, Clone)]
pub struct ScopedExclusions {
    walk_root: PathBuf,
    resolved_root: PathBuf,
    paths: Vec<PathBuf>,
}

impl ScopedExclusions {
    /// Whether `entry`, a path yielded by the walk, is excluded.
    ///
    /// Walks never follow symlinks, so an entry resolves to the resolved root
    /// joined with its path relative to the walk root.
    pub fn contains(&self, entry: &Path) -> bool {
        if self.paths.is_empty() {
            return false;
        }
        match entry.strip_prefix(&self.walk_root) {
            Ok(relative) => {
                let resolved = self.resolved_root.join(relative);
                self.paths.iter().any(|p| *p == resolved)
            }
            Err(_) => false,
        }
    }
}

fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => resolve(parent).join(name),
        _ => env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// `<scratch>/<service>/contexts`
pub fn contexts_dir(scratch_dir: &Path, service_name: &str) -> PathBuf {
    scratch_dir
        .join(sanitize_service_name(service_name))
        .join(CONTEXTS_DIR_NAME)
}

/// Service names become directory names; keep them to a single safe path segment.
pub fn sanitize_service_name(name: &str) -> String {
    let cleaned = name.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
