use dockyard_core::FileSystem;
use std::path::Path;

pub(super) const FALLBACK_NODE_VERSION: &str = "lts";

/// Reduce a version requirement to the major version used in image tags.
pub(super) fn normalize_node_version(version_str: &str) -> Option<String> {
    let ver_num = version_str
        .trim()
        .trim_start_matches('v')
        .trim_start_matches(">=")
        .trim_start_matches('^')
        .trim_start_matches('~')
        .trim()
        .split('.')
        .next()?;

    if ver_num.is_empty() {
        return None;
    }
    if ver_num.chars().all(|c| c.is_ascii_digit()) {
        Some(ver_num.to_string())
    } else if ver_num.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        // Aliases such as `lts` or `current` are valid image tags as-is.
        Some(ver_num.to_lowercase())
    } else {
        None
    }
}

pub(super) fn read_node_version_file(fs: &dyn FileSystem, project_dir: &Path) -> Option<String> {
    for file_name in [".nvmrc", ".node-version"] {
        let path = project_dir.join(file_name);
        if let Ok(content) = fs.read_to_string(&path) {
            if !content.trim().is_empty() {
                return normalize_node_version(&content);
            }
        }
    }
    None
}

pub(super) fn parse_node_version(manifest_content: &str) -> Option<String> {
    let package: serde_json::Value = serde_json::from_str(manifest_content).ok()?;
    let node_version = package["engines"]["node"].as_str()?;
    normalize_node_version(node_version)
}

/// `.nvmrc`/`.node-version`, then `engines.node`, then `lts`.
pub(super) fn detect_node_version(fs: &dyn FileSystem, project_dir: &Path) -> String {
    read_node_version_file(fs, project_dir)
        .or_else(|| {
            fs.read_to_string(&project_dir.join("package.json"))
                .ok()
                .and_then(|content| parse_node_version(&content))
        })
        .unwrap_or_else(|| FALLBACK_NODE_VERSION.to_string())
}
