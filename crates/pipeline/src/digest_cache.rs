//! Persistent map from built image id to pushed registry digest.

use dockyard_core::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Loaded once at the start of a run, threaded through the pipeline by value
/// and saved once at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestCache {
    entries: BTreeMap<String, String>,
}

impl DigestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the cache at `path`. A missing or corrupt file yields an empty cache.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No digest cache, starting empty");
                return Self::default();
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Could not read digest cache, starting empty");
                return Self::default();
            }
        };

        match serde_json::from_str::<BTreeMap<String, String>>(&content) {
            Ok(entries) => {
                debug!(path = %path.display(), entries = entries.len(), "Loaded digest cache");
                Self { entries }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Could not deserialize digest cache, starting empty");
                Self::default()
            }
        }
    }

    /// Write the cache to `path` through a temporary file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| Error::io(path, e.into()))?;

        let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        temp.write_all(json.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| Error::io(temp.path(), e))?;
        temp.persist(path).map_err(|e| Error::io(path, e.error))?;

        debug!(path = %path.display(), entries = self.entries.len(), "Saved digest cache");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
