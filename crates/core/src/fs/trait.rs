//! FileSystem trait definition

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Type of file system entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Other,
}

/// A directory entry returned by read_dir
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: PathBuf,
    pub name: String,
    pub file_type: FileType,
}

impl DirEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.name
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// File extension, without the dot, as written on disk.
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }
}

/// Read-only view of a project tree. Builders inspect projects only through
/// this trait so they can be exercised against an in-memory tree.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn is_file(&self, path: &Path) -> bool;

    /// Read file contents as string
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// List directory contents, sorted by name
    fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_entry() {
        let entry = DirEntry {
            path: PathBuf::from("/test/Api.csproj"),
            name: "Api.csproj".to_string(),
            file_type: FileType::File,
        };
        assert_eq!(entry.path(), Path::new("/test/Api.csproj"));
        assert_eq!(entry.file_name(), "Api.csproj");
        assert_eq!(entry.file_type(), FileType::File);
        assert_eq!(entry.extension(), Some("csproj"));
    }
}
