mod dotnet;
mod manual;
mod node;
mod node_version;

pub use dotnet::DotnetBuilder;
pub use manual::ManualBuilder;
pub use node::NodeBuilder;

use dockyard_core::{BuildArguments, FileSystem, ProjectConfiguration, Result};

/// Tag that an empty `builder.type` stands for.
pub const MANUAL_TAG: &str = "manual";

/// Map the declared builder type to the tag strategies match against.
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    if tag.is_empty() {
        MANUAL_TAG
    } else {
        tag
    }
}

/// Turns one kind of project into build arguments.
pub trait Builder: Send + Sync {
    /// Tags this builder answers to.
    fn names(&self) -> &'static [&'static str];

    fn accepts(&self, tag: &str) -> bool {
        let tag = normalize_tag(tag);
        self.names().iter().any(|name| *name == tag)
    }

    fn build_arguments(
        &self,
        config: &ProjectConfiguration,
        fs: &dyn FileSystem,
    ) -> Result<BuildArguments>;
}
