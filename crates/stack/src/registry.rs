//! Builder dispatcher

use crate::builder::{Builder, DotnetBuilder, ManualBuilder, NodeBuilder};
use dockyard_core::{BuildArguments, Error, FileSystem, ProjectConfiguration, Result};
use std::sync::Arc;
use tracing::debug;

/// Ordered set of builders.
///
/// Resolution is a linear scan in registration order and the first builder
/// that accepts the tag wins. The default tags do not overlap, but a builder
/// registered later never shadows an earlier one.
#[derive(Clone, Default)]
pub struct BuilderRegistry {
    builders: Vec<Arc<dyn Builder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ManualBuilder));
        registry.register(Arc::new(NodeBuilder));
        registry.register(Arc::new(DotnetBuilder));
        registry
    }

    pub fn register(&mut self, builder: Arc<dyn Builder>) {
        self.builders.push(builder);
    }

    pub fn resolve(&self, config: &ProjectConfiguration) -> Result<&dyn Builder> {
        let tag = config.builder.tag();
        self.builders
            .iter()
            .find(|b| b.accepts(tag))
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::NoBuilderFound {
                service: config.service_name.clone(),
                path: config.project_path.clone(),
                tag: tag.to_string(),
            })
    }

    /// Resolve and run the builder for `config`.
    pub fn build_arguments(
        &self,
        config: &ProjectConfiguration,
        fs: &dyn FileSystem,
    ) -> Result<BuildArguments> {
        let builder = self.resolve(config)?;
        debug!(
            service = %config.service_name,
            builder = builder.names().first().copied().unwrap_or(""),
            "Dispatching to builder"
        );
        builder.build_arguments(config, fs)
    }

    /// Every registered tag, in registration order.
    pub fn builder_names(&self) -> Vec<&'static str> {
        self.builders
            .iter()
            .flat_map(|b| b.names().iter().copied())
            .collect()
    }
}
