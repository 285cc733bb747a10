//! Content fingerprints for build contexts.
//!
//! Every file under each context path is read and folded into a SHA-256
//! digest together with its relative path, so renames change the fingerprint
//! as well as edits. Cost grows with the size of the context, not with the
//! size of the change.

use crate::archive::{walk_context, walk_error};
use crate::cancel::{CancelCheck, CancellationToken};
use dockyard_core::build_args::to_slash;
use dockyard_core::error::IoResultExt;
use dockyard_core::{BuildArguments, ExcludedPaths, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Hex characters kept per component.
const COMPONENT_LEN: usize = 16;
/// Longer joined fingerprints are collapsed into one digest to keep file names short.
const MAX_FINGERPRINT_LEN: usize = 128;

/// Fingerprint of `args` resolved against `source_root`.
///
/// One component per context path in sorted order, plus one for inline
/// manifest content, joined with `-`. Paths in `excluded` are left out, the
/// same way packing leaves them out.
pub fn fingerprint(
    source_root: &Path,
    args: &BuildArguments,
    excluded: &ExcludedPaths,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut components = Vec::with_capacity(args.context.len() + 1);

    for (source, prefix) in &args.context {
        let mut hasher = Sha256::new();
        hasher.update(to_slash(prefix).as_bytes());
        hasher.update([0u8]);
        hash_tree(&mut hasher, &source_root.join(source), excluded, cancel)?;
        components.push(short_hex(hasher));
    }

    if let Some(content) = args.inline_manifest() {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        components.push(short_hex(hasher));
    }

    Ok(join_components(&components))
}

fn join_components(components: &[String]) -> String {
    let joined = components.join("-");
    if joined.len() <= MAX_FINGERPRINT_LEN {
        joined
    } else {
        hex::encode(Sha256::digest(joined.as_bytes()))
    }
}

fn short_hex(hasher: Sha256) -> String {
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(COMPONENT_LEN);
    hex
}

fn hash_tree(hasher: &mut Sha256, root: &Path, excluded: &ExcludedPaths, cancel: &CancellationToken) -> Result<()> {
    let meta = std::fs::symlink_metadata(root).at_path(root)?;
    if meta.is_file() {
        return hash_file(hasher, "", root);
    }

    for entry in walk_context(root, excluded) {
        cancel.check()?;
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or_else(|_| entry.path());
        hash_file(hasher, &to_slash(relative), entry.path())?;
    }
    Ok(())
}

fn hash_file(hasher: &mut Sha256, relative: &str, path: &Path) -> Result<()> {
    let mut file = File::open(path).at_path(path)?;
    let len = file.metadata().at_path(path)?.len();

    hasher.update(relative.as_bytes());
    hasher.update([0u8]);
    hasher.update(len.to_le_bytes());
    io::copy(&mut file, hasher).at_path(path)?;
    Ok(())
}
