//! Shared model for dockyard: project configuration, the error taxonomy, run
//! configuration and the filesystem abstraction used by builders.

pub mod build_args;
pub mod config;
pub mod error;
pub mod fs;
pub mod layout;
pub mod project;

pub use build_args::{BuildArguments, Manifest};
pub use config::{ConfigError, DockyardConfig};
pub use error::{Error, Result};
pub use fs::{DirEntry, FileSystem, FileType, MockFileSystem, RealFileSystem};
pub use layout::ExcludedPaths;
pub use project::{BuilderSpec, ProjectConfiguration};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
