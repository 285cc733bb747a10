use super::{DirEntry, FileSystem, FileType};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct MockEntry {
    content: Option<String>,
    file_type: FileType,
}

/// In-memory tree used to exercise builders without touching disk.
pub struct MockFileSystem {
    files: RwLock<HashMap<PathBuf, MockEntry>>,
    root: PathBuf,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/mock"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        let fs = Self {
            files: RwLock::new(HashMap::new()),
            root,
        };
        let root = fs.root.clone();
        fs.add_dir(root);
        fs
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: &str) {
        let path = self.normalize_path(path.as_ref());
        let mut files = self.write();

        if let Some(parent) = path.parent() {
            Self::ensure_parents(&mut files, parent);
        }

        files.insert(
            path,
            MockEntry {
                content: Some(content.to_string()),
                file_type: FileType::File,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = self.normalize_path(path.as_ref());
        let mut files = self.write();
        Self::ensure_parents(&mut files, &path);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.write().unwrap_or_else(|e| e.into_inner())
    }

    fn normalize_path(&self, path: &Path) -> PathBuf {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        // Drop `.` components so `root/./x` and `root/x` are the same key.
        joined
            .components()
            .filter(|c| !matches!(c, std::path::Component::CurDir))
            .collect()
    }

    fn ensure_parents(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            files.entry(current.clone()).or_insert(MockEntry {
                content: None,
                file_type: FileType::Directory,
            });
        }
    }

    fn not_found(path: PathBuf) -> Error {
        Error::io(path, io::Error::from(io::ErrorKind::NotFound))
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        self.read().contains_key(&path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        self.read()
            .get(&path)
            .map(|e| e.file_type == FileType::Directory)
            .unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        self.read()
            .get(&path)
            .map(|e| e.file_type == FileType::File)
            .unwrap_or(false)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let path = self.normalize_path(path);
        let files = self.read();
        match files.get(&path).and_then(|e| e.content.clone()) {
            Some(content) => Ok(content),
            None => Err(Self::not_found(path)),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let path = self.normalize_path(path);
        let files = self.read();

        if !matches!(files.get(&path), Some(e) if e.file_type == FileType::Directory) {
            return Err(Self::not_found(path));
        }

        let mut entries: Vec<DirEntry> = files
            .iter()
            .filter(|(file_path, _)| file_path.parent() == Some(path.as_path()))
            .map(|(file_path, entry)| DirEntry {
                path: file_path.clone(),
                name: file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                file_type: entry.file_type,
            })
            .collect();

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
