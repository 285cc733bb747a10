//! Finds every project configuration file under a source tree.

use dockyard_core::layout::{is_excluded_dir, CONFIG_FILE_NAME};
use dockyard_core::{Error, ExcludedPaths, ProjectConfiguration, Result};
use ignore::WalkBuilder;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Walk `root` and parse each configuration file found.
///
/// Excluded directories, and the run's own outputs in `excluded`, are pruned
/// whole. A file that fails to read or parse is logged and skipped so one
/// broken project never hides its siblings. Only an unreadable `root` fails
/// the call.
pub fn discover(root: &Path, excluded: &ExcludedPaths) -> Result<Vec<ProjectConfiguration>> {
    let start = Instant::now();
    fs::read_dir(root).map_err(|e| Error::io(root, e))?;

    let mut projects = Vec::new();
    let outputs = excluded.scoped(root);

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir && is_excluded_dir(entry.file_name())) && !outputs.contains(entry.path())
        })
        .build();

    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "Failed to read directory entry");
                continue;
            }
        };

        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file || entry.file_name() != CONFIG_FILE_NAME {
            continue;
        }

        let path = entry.path();
        let project_dir = path.parent().unwrap_or(root);
        let project_path = project_dir.strip_prefix(root).unwrap_or(project_dir);

        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to read configuration, skipping");
                continue;
            }
        };

        match ProjectConfiguration::parse(&content, root, project_path) {
            Ok(project) => {
                debug!(
                    service = %project.service_name,
                    path = %project.project_path.display(),
                    builder = %project.builder.tag(),
                    "Discovered project"
                );
                projects.push(project);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Invalid configuration, skipping");
            }
        }
    }

    info!(
        root = %root.display(),
        projects = projects.len(),
        duration_ms = start.elapsed().as_millis(),
        "Discovery complete"
    );

    Ok(projects)
}
