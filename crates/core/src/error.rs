use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy shared by every stage of a run.
///
/// Every variant except `Io` raised while reading the discovery root is scoped
/// to a single project: the orchestrator records it against that project and
/// moves on.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or contradictory per-project settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An expected project file (lockfile, project descriptor, manifest) is missing.
    #[error("Project layout error: {0}")]
    ProjectLayout(String),

    #[error("No builder found for service {service} at path {path} (builder type '{tag}')")]
    NoBuilderFound {
        service: String,
        path: PathBuf,
        tag: String,
    },

    /// The cause is rendered in the message only, not exposed as `source()`.
    #[error("I/O error at {path}: {error}")]
    Io { path: PathBuf, error: io::Error },

    /// The build service reported a failure; the message is surfaced verbatim.
    #[error("{0}")]
    Build(String),

    /// A status record could not be decoded.
    #[error("Unable to decode status record [{line}]: {error}")]
    Protocol {
        line: String,
        error: serde_json::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn io(path: impl AsRef<Path>, error: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            error,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn layout(message: impl Into<String>) -> Self {
        Error::ProjectLayout(message.into())
    }

    /// Short machine-friendly kind name, used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::ProjectLayout(_) => "project-layout",
            Error::NoBuilderFound { .. } => "no-builder",
            Error::Io { .. } => "io",
            Error::Build(_) => "build",
            Error::Protocol { .. } => "protocol",
            Error::Cancelled => "cancelled",
        }
    }

    /// Whether the failure aborts only the project that raised it.
    ///
    /// Cancellation stops the whole run. Failures reading the discovery root or
    /// creating the scratch directory are fatal too, but those never reach a
    /// project and are handled by the caller.
    pub fn is_project_scoped(&self) -> bool {
        !matches!(self, Error::Cancelled)
    }
}

/// Attach a path to a bare `io::Error`.
pub trait IoResultExt<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
