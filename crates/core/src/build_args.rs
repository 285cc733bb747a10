//! What a builder hands to the packager: a manifest plus the context paths.

use crate::layout::GENERATED_MANIFEST_NAME;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Exactly one manifest source is authoritative per project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// Synthesized content; written next to the context as
    /// `Dockerfile.generated` when the archive is packed.
    Inline(String),
    /// Existing manifest file, relative to the source root.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArguments {
    pub manifest: Manifest,
    /// Source path (relative to the source root) mapped to its prefix inside
    /// the archive. An empty prefix places entries at the archive root.
    pub context: BTreeMap<PathBuf, PathBuf>,
}

impl BuildArguments {
    pub fn inline(content: impl Into<String>) -> Self {
        Self {
            manifest: Manifest::Inline(content.into()),
            context: BTreeMap::new(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            manifest: Manifest::File(path.into()),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, source: impl Into<PathBuf>, prefix: impl Into<PathBuf>) -> Self {
        self.context.insert(source.into(), prefix.into());
        self
    }

    /// Context source paths in sorted order.
    pub fn context_paths(&self) -> Vec<&Path> {
        self.context.keys().map(PathBuf::as_path).collect()
    }

    pub fn inline_manifest(&self) -> Option<&str> {
        match &self.manifest {
            Manifest::Inline(content) => Some(content),
            Manifest::File(_) => None,
        }
    }

    /// Location of the manifest inside the packed archive, as the build
    /// service expects it. `None` when a file manifest lies outside every
    /// context path.
    pub fn manifest_selector(&self) -> Option<String> {
        match &self.manifest {
            Manifest::Inline(_) => Some(GENERATED_MANIFEST_NAME.to_string()),
            Manifest::File(path) => {
                let path = clean(path);
                // Longest matching source wins when contexts nest.
                self.context
                    .iter()
                    .filter_map(|(source, prefix)| {
                        let source = clean(source);
                        path.strip_prefix(&source)
                            .ok()
                            .map(|rest| (source.components().count(), clean(prefix).join(rest)))
                    })
                    .max_by_key(|(depth, _)| *depth)
                    .map(|(_, selector)| to_slash(&selector))
                    .filter(|s| !s.is_empty())
            }
        }
    }
}

/// Lexically normalize a relative path: drop `.`, resolve `..`.
/// Returns `None` when the path escapes its base.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Forward-slash rendering used inside manifests and archives.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
