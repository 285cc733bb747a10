use super::{Builder, MANUAL_TAG};
use dockyard_core::layout::DEFAULT_MANIFEST_NAME;
use dockyard_core::{BuildArguments, Error, FileSystem, ProjectConfiguration, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct ManualOptions {
    #[serde(default)]
    buildcontext: Option<String>,
    #[serde(default)]
    dockerfile: Option<String>,
}

/// Pass-through builder for projects that ship their own Dockerfile.
///
/// `buildcontext` picks what gets packed: the whole source tree (`root`, the
/// default) or just the project directory (`projectdir`).
pub struct ManualBuilder;

impl Builder for ManualBuilder {
    fn names(&self) -> &'static [&'static str] {
        &[MANUAL_TAG]
    }

    fn build_arguments(
        &self,
        config: &ProjectConfiguration,
        _fs: &dyn FileSystem,
    ) -> Result<BuildArguments> {
        let options: ManualOptions = config.builder.options()?;

        let dockerfile = options
            .dockerfile
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_MANIFEST_NAME.to_string());
        let manifest = config.project_path.join(dockerfile);

        let context = match options.buildcontext.as_deref().unwrap_or("") {
            "" | "root" => PathBuf::from("."),
            "projectdir" => config.project_path.clone(),
            other => {
                return Err(Error::config(format!(
                    "Unknown buildcontext '{}' for service {}. Valid options: root, projectdir",
                    other, config.service_name
                )))
            }
        };

        debug!(
            service = %config.service_name,
            manifest = %manifest.display(),
            context = %context.display(),
            "Resolved manual build arguments"
        );

        Ok(BuildArguments::file(manifest).with_context(context, ""))
    }
}
