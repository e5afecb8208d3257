//! Path validation for file tools: resolve a path under the workspace and
//! prevent escape.
//!
//! Used by the gate for every filesystem target. Traversal segments are
//! normalized without requiring the path to exist; existing paths are
//! canonicalized (symlinks resolved) and re-checked.

use std::path::{Component, Path, PathBuf};

use super::GateViolation;

/// Normalizes a path by resolving `.` and `..` without requiring the path to
/// exist. Does not resolve symlinks.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut buf = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => buf = PathBuf::from(p.as_os_str()),
            Component::RootDir => buf.push(comp),
            Component::CurDir => {}
            Component::ParentDir => {
                buf.pop();
            }
            Component::Normal(s) => buf.push(s),
        }
    }
    buf
}

/// Resolves a path parameter under the canonical workspace root.
///
/// Joins `path_param` (relative to `workspace`; absolute params are accepted
/// only when already inside the workspace) and ensures the result stays under
/// the workspace. If the resolved path exists, returns its canonical form
/// (resolving symlinks) and verifies the canonical path is still a descendant.
///
/// # Errors
///
/// `GateViolation::PathEscape` when the workspace cannot be canonicalized or
/// the resolved path leaves it.
pub(crate) fn resolve_path_under(
    workspace: &Path,
    path_param: &str,
) -> Result<PathBuf, GateViolation> {
    let base_canonical = workspace.canonicalize().map_err(|e| GateViolation::PathEscape {
        path: workspace.display().to_string(),
        reason: format!("workspace not found or not a directory: {e}"),
    })?;

    let path_param = path_param.trim();
    let path_param = if path_param.is_empty() { "." } else { path_param };

    let joined = if Path::new(path_param).is_absolute() {
        PathBuf::from(path_param)
    } else {
        base_canonical.join(path_param)
    };
    let normalized = normalize_path(&joined);

    if !normalized.starts_with(&base_canonical) {
        return Err(GateViolation::PathEscape {
            path: path_param.to_string(),
            reason: "resolves outside the workspace".to_string(),
        });
    }

    if normalized.exists() {
        let canonical = normalized.canonicalize().map_err(|e| GateViolation::PathEscape {
            path: path_param.to_string(),
            reason: format!("failed to resolve path: {e}"),
        })?;
        // A symlink inside the workspace may point outside it.
        if !canonical.starts_with(&base_canonical) {
            return Err(GateViolation::PathEscape {
                path: path_param.to_string(),
                reason: "symlink target is outside the workspace".to_string(),
            });
        }
        Ok(canonical)
    } else {
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_resolves_dot_dot() {
        let p = Path::new("/a/b/../c");
        assert_eq!(normalize_path(p), PathBuf::from("/a/c"));
    }

    #[test]
    fn normalize_path_resolves_dot() {
        let p = Path::new("/a/./b");
        assert_eq!(normalize_path(p), PathBuf::from("/a/b"));
    }

    #[test]
    fn traversal_out_of_workspace_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_path_under(dir.path(), "../outside.txt").unwrap_err();
        assert!(matches!(err, GateViolation::PathEscape { .. }));
    }

    #[test]
    fn relative_path_resolves_inside() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let p = resolve_path_under(dir.path(), "sub/new_file.txt").unwrap();
        assert!(p.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_workspace_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        let link = ws.path().join("link");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();
        let err = resolve_path_under(ws.path(), "link").unwrap_err();
        assert!(matches!(err, GateViolation::PathEscape { .. }));
    }
}
