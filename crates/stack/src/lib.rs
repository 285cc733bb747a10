//! Builder strategies and the dispatcher that selects one per project.
//!
//! Each strategy turns a `ProjectConfiguration` into `BuildArguments`: a
//! manifest (inline or an existing file) and the set of context paths to pack.
//! The set is closed; adding a project kind means adding a `Builder` impl and
//! registering it in `BuilderRegistry::with_defaults`.

pub mod builder;
pub mod registry;

pub use builder::{Builder, DotnetBuilder, ManualBuilder, NodeBuilder};
pub use registry::BuilderRegistry;
