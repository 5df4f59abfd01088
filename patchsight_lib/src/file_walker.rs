use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{config::SourceDiscoveryConfig, error::PatchSightError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Project-root-relative, forward-slash separated.
    pub relative_path: String,
}

pub struct FilterOptions {
    pub extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl From<&SourceDiscoveryConfig> for FilterOptions {
    fn from(config: &SourceDiscoveryConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
        }
    }
}

pub struct FileWalker {
    extensions: Vec<String>,
    exact_excludes: Vec<String>,
    glob_excludes: Vec<glob::Pattern>,
}

impl FileWalker {
    pub fn with_filter(filter_options: FilterOptions) -> Self {
        let mut exact_excludes = Vec::new();
        let mut glob_excludes = Vec::new();

        for pattern in filter_options.exclude_patterns {
            if !pattern.contains('*') {
                exact_excludes.push(pattern);
                continue;
            }
            match glob::Pattern::new(&pattern) {
                Ok(compiled) => glob_excludes.push(compiled),
                Err(err) => warn!(pattern = %pattern, error = %err, "invalid exclude pattern; ignoring"),
            }
        }

        Self {
            extensions: filter_options
                .extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exact_excludes,
            glob_excludes,
        }
    }

    /// True when a single path segment (directory or file name) is excluded.
    pub fn is_name_excluded(&self, name: &str) -> bool {
        self.exact_excludes.iter().any(|excluded| excluded == name)
            || self.glob_excludes.iter().any(|pattern| pattern.matches(name))
    }

    /// True when any segment of a relative path is excluded.
    pub fn is_relative_path_excluded(&self, relative_path: &str) -> bool {
        relative_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .any(|segment| self.is_name_excluded(segment))
    }

    pub fn has_allowed_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|allowed| *allowed == ext)
    }

    /// Walks `root` breadth first and returns every in-extension file that is
    /// not under an excluded name, sorted by relative path.
    ///
    /// Failing to read `root` itself is an error; unreadable subdirectories are
    /// logged and skipped.
    pub fn walk(&self, root: &Path) -> Result<Vec<SourceFile>, PatchSightError> {
        let root_entries = fs::read_dir(root).map_err(|e| {
            PatchSightError::io(format!("reading project root '{}'", root.display()), e)
        })?;

        let mut files: Vec<SourceFile> = Vec::new();
        let mut directory_stack: VecDeque<PathBuf> = VecDeque::new();
        self.collect_entries(root, root, root_entries, &mut directory_stack, &mut files);

        while let Some(current_path) = directory_stack.pop_front() {
            let entries = match fs::read_dir(&current_path) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(directory = %current_path.display(), error = %err, "failed reading directory; skipping");
                    continue;
                }
            };
            self.collect_entries(root, &current_path, entries, &mut directory_stack, &mut files);
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(root = %root.display(), file_count = files.len(), "walk_complete");
        Ok(files)
    }

    fn collect_entries(
        &self,
        root: &Path,
        current_path: &Path,
        entries: fs::ReadDir,
        directory_stack: &mut VecDeque<PathBuf>,
        files: &mut Vec<SourceFile>,
    ) {
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(directory = %current_path.display(), error = %err, "failed reading directory entry; skipping");
                    continue;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %entry.path().display(), "non-utf8 file name; skipping");
                continue;
            };
            if self.is_name_excluded(name) {
                continue;
            }

            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                directory_stack.push_back(path);
            } else if file_type.is_file() && self.has_allowed_extension(&path) {
                let Some(relative_path) = relative_path_string(&path, root) else {
                    continue;
                };
                files.push(SourceFile {
                    path,
                    relative_path,
                });
            }
        }
    }
}

/// Renders `path` relative to `root` with forward slashes.
pub fn relative_path_string(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|component| match component {
            std::path::Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Normalises a user or model supplied relative path: backslashes become
/// forward slashes and surrounding whitespace is dropped.
pub fn normalize_relative_path(path: &str) -> String {
    path.trim().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn walker(excludes: &[&str]) -> FileWalker {
        FileWalker::with_filter(FilterOptions {
            extensions: vec!["py".to_string(), "rs".to_string()],
            exclude_patterns: excludes.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn walks_nested_directories_with_relative_paths() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib/deep")).unwrap();
        fs::write(dir.path().join("main.py"), "print()").unwrap();
        fs::write(dir.path().join("lib/helper.py"), "x = 1").unwrap();
        fs::write(dir.path().join("lib/deep/core.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let files = walker(&[]).walk(dir.path()).unwrap();
        let relative: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(relative, vec!["lib/deep/core.rs", "lib/helper.py", "main.py"]);
    }

    #[test]
    fn excludes_match_last_segment_at_every_level() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/node_modules/pkg")).unwrap();
        fs::create_dir_all(dir.path().join("dump_2024")).unwrap();
        fs::write(dir.path().join("src/node_modules/pkg/index.py"), "").unwrap();
        fs::write(dir.path().join("dump_2024/old.py"), "").unwrap();
        fs::write(dir.path().join("src/keep.py"), "").unwrap();
        fs::write(dir.path().join("src/__init__.py"), "").unwrap();

        let files = walker(&["node_modules", "dump*", "__init__.py"])
            .walk(dir.path())
            .unwrap();
        let relative: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(relative, vec!["src/keep.py"]);
    }

    #[test]
    fn glob_patterns_exclude_file_names() {
        let walker = walker(&["*.pyc", "dump*"]);
        assert!(walker.is_name_excluded("cache.pyc"));
        assert!(walker.is_name_excluded("dump"));
        assert!(!walker.is_name_excluded("main.py"));
        assert!(walker.is_relative_path_excluded("a/dump_old/b.py"));
        assert!(!walker.is_relative_path_excluded("a/b/c.py"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let result = walker(&[]).walk(&dir.path().join("missing"));
        assert!(matches!(result, Err(PatchSightError::Io { .. })));
    }

    #[test]
    fn normalizes_backslashes() {
        assert_eq!(normalize_relative_path(" lib\\helper.py "), "lib/helper.py");
    }
}
