use std::path::{Component, Path, PathBuf};

use crate::{
    error::{PatchSightError, Result},
    file_walker::{normalize_relative_path, relative_path_string},
};

/// A path proven to live under the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainedPath {
    pub absolute: PathBuf,
    /// Forward-slash path relative to the resolved project root.
    pub relative: String,
}

/// Resolves a user or model supplied path against `project_root` and rejects
/// anything that lands outside it.
///
/// `.` and `..` are folded lexically first, then the deepest existing ancestor
/// is canonicalised so a symlink cannot smuggle the target out of the tree.
/// The root itself is not a valid target.
pub fn resolve_within(project_root: &Path, file_path: &str) -> Result<ContainedPath> {
    let normalized = normalize_relative_path(file_path);
    let candidate = if Path::new(&normalized).is_absolute() {
        PathBuf::from(&normalized)
    } else {
        project_root.join(&normalized)
    };

    let outside = || PatchSightError::PathOutsideProject {
        path: candidate.clone(),
        project_root: project_root.to_path_buf(),
    };

    if normalized.is_empty() {
        return Err(outside());
    }

    let root = project_root
        .canonicalize()
        .unwrap_or_else(|_| lexical_normalize(project_root));
    let resolved = canonicalize_existing_prefix(&lexical_normalize(&candidate));

    if resolved == root || !resolved.starts_with(&root) {
        return Err(outside());
    }
    let relative = relative_path_string(&resolved, &root).ok_or_else(outside)?;

    Ok(ContainedPath {
        absolute: resolved,
        relative,
    })
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return tail
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn accepts_nested_and_new_paths() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/a.py"), "").unwrap();

        let existing = resolve_within(dir.path(), "lib/a.py").unwrap();
        assert_eq!(existing.relative, "lib/a.py");
        assert!(existing.absolute.is_file());

        let fresh = resolve_within(dir.path(), "./new/dir/../b.py").unwrap();
        assert_eq!(fresh.relative, "new/b.py");
    }

    #[test]
    fn rejects_traversal() {
        let dir = tempdir().unwrap();
        for bad in ["../../etc/passwd", "lib/../../x.py", "/etc/passwd", "", ".", "lib/.."] {
            assert!(
                matches!(
                    resolve_within(dir.path(), bad),
                    Err(PatchSightError::PathOutsideProject { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_absolute_path_inside_root() {
        let dir = tempdir().unwrap();
        let inside = dir.path().join("a.py");
        let resolved = resolve_within(dir.path(), inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved.relative, "a.py");
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(resolve_within(dir.path(), "link/secret.py").is_err());
    }

    #[test]
    fn normalizes_backslashes() {
        let dir = tempdir().unwrap();
        assert_eq!(
            resolve_within(dir.path(), "lib\\mod.py").unwrap().relative,
            "lib/mod.py"
        );
    }
}
