//! Path sandbox (C1): the only producer of real OS paths inside the core.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Resolves a virtual remote path against `root`, guaranteeing the result
/// lies under `root` after canonicalization.
///
/// `root` itself must already exist; callers create it at startup.
/// Empty input (or `"/"`) resolves to the root. Canonicalization requires
/// the target to exist on disk — callers that are about to create a new
/// entry should resolve the parent directory instead and join the final
/// component themselves (see [`resolve_parent`]).
pub fn resolve(root: &Path, virtual_path: &str) -> Result<PathBuf, CoreError> {
    let root = root
        .canonicalize()
        .map_err(|e| CoreError::Internal(format!("root directory unusable: {e}")))?;

    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        return Ok(root);
    }

    let candidate = root.join(relative);
    let canonical = candidate
        .canonicalize()
        .map_err(|_| CoreError::InvalidPath(virtual_path.to_string()))?;

    ensure_under_root(&root, &canonical, virtual_path)
}

/// Like [`resolve`], but for a path that doesn't exist yet: canonicalizes
/// the parent directory (which must exist) and re-joins the final
/// component, rejecting `.`/`..` in that component outright.
pub fn resolve_new(root: &Path, virtual_path: &str) -> Result<PathBuf, CoreError> {
    let root = root
        .canonicalize()
        .map_err(|e| CoreError::Internal(format!("root directory unusable: {e}")))?;

    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        return Err(CoreError::InvalidPath(virtual_path.to_string()));
    }

    let candidate = PathBuf::from(relative);
    let file_name = candidate
        .file_name()
        .ok_or_else(|| CoreError::InvalidPath(virtual_path.to_string()))?;
    if file_name == "." || file_name == ".." {
        return Err(CoreError::InvalidPath(virtual_path.to_string()));
    }

    let parent_virtual = candidate.parent().unwrap_or(Path::new(""));
    let parent = if parent_virtual.as_os_str().is_empty() {
        root.clone()
    } else {
        root.join(parent_virtual)
            .canonicalize()
            .map_err(|_| CoreError::InvalidPath(virtual_path.to_string()))?
    };

    let resolved = parent.join(file_name);
    ensure_under_root(&root, &resolved, virtual_path)
}

/// Resolves `dir_virtual_path` (which must already exist) and joins
/// `filename` to it, rejecting a `filename` that is itself a path
/// (contains a separator or `.`/`..`) so a caller can't escape the
/// directory it just resolved into.
pub fn resolve_new_in_dir(
    root: &Path,
    dir_virtual_path: &str,
    filename: &str,
) -> Result<PathBuf, CoreError> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains('/')
        || filename.contains('\\')
    {
        return Err(CoreError::InvalidPath(filename.to_string()));
    }
    let dir = resolve(root, dir_virtual_path)?;
    Ok(dir.join(filename))
}

fn ensure_under_root(root: &Path, candidate: &Path, original: &str) -> Result<PathBuf, CoreError> {
    if candidate.starts_with(root) {
        Ok(candidate.to_path_buf())
    } else {
        Err(CoreError::InvalidPath(original.to_string()))
    }
}
