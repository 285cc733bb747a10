//! Context packaging and image builds.
//!
//! `ContextCache` fingerprints a project's build context and reuses or packs
//! a tar archive for it. `BuildExecutor` sends that archive to a
//! `BuildService` and reads back the line-delimited status stream.

pub mod archive;
pub mod cancel;
pub mod context_cache;
pub mod digest;
pub mod docker;
pub mod executor;
pub mod fingerprint;
pub mod progress;
pub mod status;

pub use archive::{pack, ArchiveSource};
pub use cancel::{CancelCheck, CancellationToken};
pub use context_cache::{ArchiveHandle, ContextCache};
pub use digest::Digest;
pub use docker::DockerBuildService;
pub use executor::{consume, BuildExecutor, BuildOutcome, BuildRequest, BuildService};
pub use fingerprint::fingerprint;
pub use progress::{ProgressCounts, ProgressTracker};
pub use status::{decode_line, decode_lines, StatusEvent, StatusRecord};
