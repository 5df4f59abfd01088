use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::file_walker::{FileWalker, SourceFile, normalize_relative_path};

/// One node of the user-editable selection tree mirroring the source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InclusionNode {
    Folder {
        name: String,
        children: Vec<InclusionNode>,
    },
    File {
        name: String,
        relative_path: String,
        checked: bool,
    },
}

/// The persisted selection tree. Serialises as a plain list of nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InclusionSet {
    nodes: Vec<InclusionNode>,
}

/// Which relative paths count as in scope.
///
/// With no checked file at all every discovered file is in scope: an empty
/// selection does not mean an empty scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionScope {
    All,
    Only(BTreeSet<String>),
}

impl SelectionScope {
    pub fn contains(&self, relative_path: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(paths) => paths.contains(relative_path),
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, Self::Only(_))
    }
}

impl InclusionSet {
    pub fn nodes(&self) -> &[InclusionNode] {
        &self.nodes
    }

    /// Builds a tree from `(relative_path, checked)` pairs. Paths with an
    /// excluded segment never become nodes.
    pub fn build_tree<I>(entries: I, walker: &FileWalker) -> Self
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let mut root: BTreeMap<String, Draft> = BTreeMap::new();
        for (relative_path, checked) in entries {
            let relative_path = normalize_relative_path(&relative_path);
            if relative_path.is_empty() || walker.is_relative_path_excluded(&relative_path) {
                continue;
            }
            insert_draft(&mut root, &relative_path, checked);
        }
        Self {
            nodes: finish_drafts(root),
        }
    }

    /// Rebuilds the tree from a fresh walk, keeping each file's `checked` flag
    /// by path. When nothing was checked before, every file starts checked.
    pub fn refresh(&self, discovered: &[SourceFile], walker: &FileWalker) -> Self {
        let previously_checked = self.checked_paths();
        Self::build_tree(
            discovered.iter().map(|file| {
                let checked = previously_checked.is_empty()
                    || previously_checked.contains(&file.relative_path);
                (file.relative_path.clone(), checked)
            }),
            walker,
        )
    }

    /// Rebuilds the tree from a fresh walk with exactly `selected` checked.
    pub fn with_selection(
        discovered: &[SourceFile],
        selected: &BTreeSet<String>,
        walker: &FileWalker,
    ) -> Self {
        let selected: BTreeSet<String> = selected
            .iter()
            .map(|path| normalize_relative_path(path))
            .collect();
        Self::build_tree(
            discovered.iter().map(|file| {
                (
                    file.relative_path.clone(),
                    selected.contains(&file.relative_path),
                )
            }),
            walker,
        )
    }

    pub fn checked_paths(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_checked(&self.nodes, &mut out);
        out
    }

    pub fn scope(&self) -> SelectionScope {
        let checked = self.checked_paths();
        if checked.is_empty() {
            SelectionScope::All
        } else {
            SelectionScope::Only(checked)
        }
    }

    pub fn is_in_scope(&self, relative_path: &str) -> bool {
        self.scope().contains(&normalize_relative_path(relative_path))
    }

    pub fn file_count(&self) -> usize {
        fn count(nodes: &[InclusionNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    InclusionNode::Folder { children, .. } => count(children),
                    InclusionNode::File { .. } => 1,
                })
                .sum()
        }
        count(&self.nodes)
    }
}

enum Draft {
    Folder(BTreeMap<String, Draft>),
    File { relative_path: String, checked: bool },
}

fn insert_draft(root: &mut BTreeMap<String, Draft>, relative_path: &str, checked: bool) {
    let parts: Vec<&str> = relative_path.split('/').filter(|p| !p.is_empty()).collect();
    let Some((file_name, folders)) = parts.split_last() else {
        return;
    };

    let mut current = root;
    for part in folders {
        let slot = current
            .entry((*part).to_string())
            .or_insert_with(|| Draft::Folder(BTreeMap::new()));
        match slot {
            Draft::Folder(children) => current = children,
            Draft::File { .. } => {
                warn!(relative_path, segment = part, "path conflict in selection tree; skipping");
                return;
            }
        }
    }

    if let Some(Draft::Folder(_)) = current.get(*file_name) {
        warn!(relative_path, "file collides with folder in selection tree; skipping");
        return;
    }
    current.insert(
        (*file_name).to_string(),
        Draft::File {
            relative_path: relative_path.to_string(),
            checked,
        },
    );
}

fn finish_drafts(drafts: BTreeMap<String, Draft>) -> Vec<InclusionNode> {
    let mut folders = Vec::new();
    let mut files = Vec::new();
    for (name, draft) in drafts {
        match draft {
            Draft::Folder(children) => folders.push(InclusionNode::Folder {
                name,
                children: finish_drafts(children),
            }),
            Draft::File {
                relative_path,
                checked,
            } => files.push(InclusionNode::File {
                name,
                relative_path,
                checked,
            }),
        }
    }
    folders.extend(files);
    folders
}

fn collect_checked(nodes: &[InclusionNode], out: &mut BTreeSet<String>) {
    for node in nodes {
        match node {
            InclusionNode::Folder { children, .. } => collect_checked(children, out),
            InclusionNode::File {
                relative_path,
                checked: true,
                ..
            } => {
                out.insert(normalize_relative_path(relative_path));
            }
            InclusionNode::File { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_walker::FilterOptions;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn walker() -> FileWalker {
        FileWalker::with_filter(FilterOptions {
            extensions: vec!["py".to_string()],
            exclude_patterns: vec!["vendor".to_string(), ".git".to_string()],
        })
    }

    fn source(relative_path: &str) -> SourceFile {
        SourceFile {
            path: PathBuf::from("/project").join(relative_path),
            relative_path: relative_path.to_string(),
        }
    }

    #[test]
    fn builds_folders_first_then_files() {
        let set = InclusionSet::build_tree(
            vec![
                ("main.py".to_string(), true),
                ("lib/helper.py".to_string(), false),
                ("lib/a.py".to_string(), true),
                ("vendor/dep.py".to_string(), true),
            ],
            &walker(),
        );

        assert_eq!(
            set.nodes(),
            &[
                InclusionNode::Folder {
                    name: "lib".to_string(),
                    children: vec![
                        InclusionNode::File {
                            name: "a.py".to_string(),
                            relative_path: "lib/a.py".to_string(),
                            checked: true,
                        },
                        InclusionNode::File {
                            name: "helper.py".to_string(),
                            relative_path: "lib/helper.py".to_string(),
                            checked: false,
                        },
                    ],
                },
                InclusionNode::File {
                    name: "main.py".to_string(),
                    relative_path: "main.py".to_string(),
                    checked: true,
                },
            ]
        );
        assert_eq!(set.file_count(), 3);
    }

    #[test]
    fn serialises_with_type_tags() {
        let set = InclusionSet::build_tree(vec![("a/b.py".to_string(), true)], &walker());
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {
                    "type": "folder",
                    "name": "a",
                    "children": [
                        {"type": "file", "name": "b.py", "relative_path": "a/b.py", "checked": true}
                    ]
                }
            ])
        );
        let back: InclusionSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn empty_selection_means_everything_in_scope() {
        let set = InclusionSet::build_tree(vec![("a.py".to_string(), false)], &walker());
        assert_eq!(set.scope(), SelectionScope::All);
        assert!(set.scope().contains("anything.py"));
    }

    #[test]
    fn refresh_keeps_checked_flags_by_path() {
        let walker = walker();
        let original = InclusionSet::build_tree(
            vec![("main.py".to_string(), true), ("lib/helper.py".to_string(), false)],
            &walker,
        );

        let refreshed = original.refresh(
            &[source("main.py"), source("lib/helper.py"), source("lib/new.py")],
            &walker,
        );

        assert_eq!(
            refreshed.checked_paths(),
            BTreeSet::from(["main.py".to_string()])
        );
        assert_eq!(refreshed.file_count(), 3);
    }

    #[test]
    fn refresh_of_empty_selection_checks_everything() {
        let refreshed =
            InclusionSet::default().refresh(&[source("a.py"), source("b/c.py")], &walker());
        assert_eq!(refreshed.checked_paths().len(), 2);
    }

    #[test]
    fn with_selection_replaces_intent() {
        let selected = BTreeSet::from(["lib\\helper.py".to_string()]);
        let set = InclusionSet::with_selection(
            &[source("main.py"), source("lib/helper.py")],
            &selected,
            &walker(),
        );
        assert_eq!(
            set.scope(),
            SelectionScope::Only(BTreeSet::from(["lib/helper.py".to_string()]))
        );
    }

    #[test]
    fn file_folder_conflicts_are_skipped() {
        let set = InclusionSet::build_tree(
            vec![("a".to_string(), true), ("a/b.py".to_string(), true)],
            &walker(),
        );
        assert_eq!(set.checked_paths(), BTreeSet::from(["a".to_string()]));
    }
}
