//! Deployment artifacts written after a successful build.

use crate::tokens::{contains_tokens, replace_tokens, MissingToken, TokenValues};
use dockyard_core::layout::{sanitize_service_name, CONFIG_FILE_NAME, DEFAULT_DEPLOYMENT_FILE};
use dockyard_core::{Error, ProjectConfiguration, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Remove and recreate the artifact directory.
pub fn reset(artifact_dir: &Path) -> Result<()> {
    match fs::remove_dir_all(artifact_dir) {
        Ok(()) => debug!(path = %artifact_dir.display(), "Cleared artifact directory"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(Error::io(artifact_dir, err)),
    }
    fs::create_dir_all(artifact_dir).map_err(|e| Error::io(artifact_dir, e))
}

/// Copy the project's configuration and its token-replaced deployment file
/// into `<artifact_dir>/<service>/`. Returns the service folder.
///
/// `image` is the reference substituted for `#{image}#`.
pub fn write_artifacts(
    artifact_dir: &Path,
    project: &ProjectConfiguration,
    image: &str,
    env: &BTreeMap<String, String>,
) -> Result<PathBuf> {
    let service_dir = artifact_dir.join(sanitize_service_name(&project.service_name));
    fs::create_dir_all(&service_dir).map_err(|e| Error::io(&service_dir, e))?;

    let config_src = project.config_file_path();
    let config_dst = service_dir.join(CONFIG_FILE_NAME);
    fs::copy(&config_src, &config_dst).map_err(|e| Error::io(&config_src, e))?;

    let deployment_src = project.deployment_file_path();
    let content = match fs::read_to_string(&deployment_src) {
        Ok(c) => c,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(
                service = %project.service_name,
                path = %deployment_src.display(),
                "No deployment file, skipping"
            );
            return Ok(service_dir);
        }
        Err(err) => return Err(Error::io(&deployment_src, err)),
    };

    let values = TokenValues::new(
        [
            ("servicename", project.service_name.as_str()),
            ("image", image),
        ],
        env,
    );
    let replaced = replace_tokens(&content, &values, MissingToken::Keep)?;
    if contains_tokens(&replaced) {
        debug!(service = %project.service_name, "Deployment file keeps unresolved tokens for release");
    }

    let deployment_dst = service_dir.join(DEFAULT_DEPLOYMENT_FILE);
    fs::write(&deployment_dst, replaced).map_err(|e| Error::io(&deployment_dst, e))?;

    info!(
        service = %project.service_name,
        path = %service_dir.display(),
        "Wrote deployment artifacts"
    );
    Ok(service_dir)
}
