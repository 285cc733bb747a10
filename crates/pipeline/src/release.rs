//! Assembles per-cluster deployment files from built artifacts.

use crate::discovery::discover;
use crate::tokens::{replace_tokens, MissingToken, TokenValues};
use anyhow::{Context, Result};
use dockyard_core::layout::DEFAULT_DEPLOYMENT_FILE;
use dockyard_core::{ExcludedPaths, ProjectConfiguration};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Variable that, when set for a service, keeps it out of the release.
const SKIP_DEPLOYMENT_KEY: &str = "NODEPLOY";

const DOCUMENT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// Written file and the services it contains, in discovery order.
    pub outputs: BTreeMap<PathBuf, Vec<String>>,
    pub skipped: Vec<String>,
}

/// Variables addressed to `service`: keys starting with the upper-cased
/// service name, with that prefix and one following `-`, `_` or `.` removed.
/// Empty values are ignored.
pub fn service_variables(service: &str, env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let prefix = service.to_uppercase();

    env.iter()
        .filter(|(_, value)| !value.is_empty())
        .filter_map(|(key, value)| {
            let rest = key.strip_prefix(&prefix)?;
            let rest = rest
                .strip_prefix(['-', '_', '.'])
                .unwrap_or(rest);
            Some((rest.to_string(), value.clone()))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn skips_deployment(vars: &BTreeMap<String, String>) -> bool {
    vars.iter()
        .any(|(k, v)| k.eq_ignore_ascii_case(SKIP_DEPLOYMENT_KEY) && !v.is_empty())
}

/// Render one service's deployment document, or `None` when it is skipped.
fn render(project: &ProjectConfiguration, env: &BTreeMap<String, String>) -> Result<Option<String>> {
    let vars = service_variables(&project.service_name, env);
    if skips_deployment(&vars) {
        info!(service = %project.service_name, "Deployment disabled, skipping");
        return Ok(None);
    }

    let path = project.project_dir().join(DEFAULT_DEPLOYMENT_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(service = %project.service_name, path = %path.display(), "No deployment file, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err).with_context(|| format!("Failed to read {}", path.display())),
    };

    let values = TokenValues::new(vars, env);
    let rendered = replace_tokens(&content, &values, MissingToken::Fail)
        .with_context(|| format!("Failed to render deployment for service {}", project.service_name))?;
    Ok(Some(rendered))
}

/// Combine every service's deployment file under `artifact_dir` into
/// `<artifact_dir>/<cluster>_deployment.yaml`.
pub fn release(artifact_dir: &Path, env: &BTreeMap<String, String>) -> Result<ReleaseSummary> {
    let projects = discover(artifact_dir, &ExcludedPaths::default())
        .with_context(|| format!("Failed to scan artifact directory {}", artifact_dir.display()))?;

    let mut documents: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    let mut summary = ReleaseSummary::default();

    for project in &projects {
        let target = artifact_dir.join(format!("{}_{}", project.cluster, DEFAULT_DEPLOYMENT_FILE));

        match render(project, env)? {
            Some(document) => {
                documents.entry(target.clone()).or_default().push(document);
                summary
                    .outputs
                    .entry(target)
                    .or_default()
                    .push(project.service_name.clone());
            }
            None => summary.skipped.push(project.service_name.clone()),
        }
    }

    for (path, docs) in &documents {
        fs::write(path, docs.join(DOCUMENT_SEPARATOR))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), documents = docs.len(), "Wrote release file");
    }

    Ok(summary)
}
