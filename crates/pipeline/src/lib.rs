//! Run orchestration: discovery, per-project builds, the digest cache and
//! deployment artifact handling.

pub mod artifacts;
pub mod digest_cache;
pub mod discovery;
pub mod orchestrator;
pub mod release;
pub mod tokens;

pub use digest_cache::DigestCache;
pub use discovery::discover;
pub use orchestrator::{BuiltImage, Pipeline, ProjectOutcome, ProjectReport, RunSummary};
pub use release::{release, service_variables, ReleaseSummary};
