use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::Result,
    file_walker::FileWalker,
    hasher::{FileFingerprint, fingerprint_file},
    project_manager::{ProjectContext, ProjectStatus},
};

/// Last-seen state of every in-scope file, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceManifest {
    pub files: BTreeMap<String, FileRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub digest: String,
    pub size_bytes: u64,
    pub line_count: usize,
}

impl From<FileFingerprint> for FileRecord {
    fn from(fp: FileFingerprint) -> Self {
        Self {
            digest: fp.digest,
            size_bytes: fp.size_bytes,
            line_count: fp.line_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SummaryStatus {
    NotSummarized,
    ErrorLoadingSummary,
    NeedsUpdate { modified_files: Vec<String> },
    UpToDate,
}

impl SummaryStatus {
    pub fn project_status(&self) -> ProjectStatus {
        match self {
            Self::NotSummarized => ProjectStatus::NotSummarized,
            Self::ErrorLoadingSummary => ProjectStatus::ErrorLoadingSummary,
            Self::NeedsUpdate { .. } => ProjectStatus::NeedsUpdate,
            Self::UpToDate => ProjectStatus::UpToDate,
        }
    }
}

/// Hashes every in-scope file and returns the relative paths that are new or
/// whose digest changed, in walk order.
///
/// The stored manifest is rewritten with fresh entries for everything hashed,
/// and entries for files that vanished or left the selection are pruned. An
/// unreadable project root yields no changes and leaves the manifest as is.
pub fn detect_changes(ctx: &ProjectContext, walker: &FileWalker) -> Result<Vec<String>> {
    let discovered = match walker.walk(ctx.project_root()) {
        Ok(files) => files,
        Err(err) => {
            warn!(project = %ctx.project_name(), error = %err, "project root unreadable; no changes reported");
            return Ok(Vec::new());
        }
    };

    let scope = ctx.load_record()?.file_selection.scope();

    let _lock = ctx.lock()?;
    let mut manifest = ctx.load_manifest()?;
    let mut changed = Vec::new();
    let mut kept: BTreeSet<String> = BTreeSet::new();

    for file in discovered {
        if !scope.contains(&file.relative_path) {
            continue;
        }
        let Some(fingerprint) = fingerprint_file(&file.path) else {
            warn!(target_file = %file.relative_path, "file could not be hashed; skipping");
            continue;
        };

        let is_changed = manifest
            .files
            .get(&file.relative_path)
            .is_none_or(|record| record.digest != fingerprint.digest);
        if is_changed {
            changed.push(file.relative_path.clone());
        }
        kept.insert(file.relative_path.clone());
        manifest
            .files
            .insert(file.relative_path, FileRecord::from(fingerprint));
    }

    let before = manifest.files.len();
    manifest.files.retain(|path, _| kept.contains(path));
    let pruned = before - manifest.files.len();

    ctx.save_manifest(&manifest)?;
    info!(
        project = %ctx.project_name(),
        changed = changed.len(),
        pruned,
        tracked = manifest.files.len(),
        restricted = scope.is_restricted(),
        "detect_changes"
    );
    Ok(changed)
}

/// Classifies the stored summary against the current tree and mirrors the
/// outcome into the project record.
///
/// A file counts as modified when its digest changed since the last scan or
/// when its summary was written from other content than the manifest now
/// records, so an earlier status check cannot hide an edit from the next one.
pub fn summary_status(
    ctx: &ProjectContext,
    walker: &FileWalker,
    max_file_size: u64,
) -> Result<SummaryStatus> {
    let status = match ctx.load_summary() {
        Ok(None) => SummaryStatus::NotSummarized,
        Err(err) => {
            warn!(project = %ctx.project_name(), error = %err, "failed to load summary store");
            SummaryStatus::ErrorLoadingSummary
        }
        Ok(Some(store)) => {
            let mut modified: BTreeSet<String> = detect_changes(ctx, walker)?.into_iter().collect();
            modified.extend(store.stale_paths(&ctx.load_manifest()?, max_file_size));
            let modified_files: Vec<String> = modified.into_iter().collect();
            if modified_files.is_empty() {
                SummaryStatus::UpToDate
            } else {
                SummaryStatus::NeedsUpdate { modified_files }
            }
        }
    };

    let project_status = status.project_status();
    ctx.update_record(|record| {
        record.status = project_status;
        record.last_checked = Some(Utc::now());
    })?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file_walker::FilterOptions, project_manager::ProjectManager, selection::InclusionSet,
    };
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _storage: TempDir,
        source: TempDir,
        ctx: ProjectContext,
        walker: FileWalker,
    }

    fn fixture() -> Fixture {
        let storage = tempdir().unwrap();
        let source = tempdir().unwrap();
        let ctx = ProjectManager::new(storage.path()).new_project("demo", source.path());
        ctx.ensure_structure().unwrap();
        let walker = FileWalker::with_filter(FilterOptions {
            extensions: vec!["py".to_string()],
            exclude_patterns: vec!["vendor".to_string()],
        });
        Fixture {
            _storage: storage,
            source,
            ctx,
            walker,
        }
    }

    #[test]
    fn second_run_without_changes_is_empty() {
        let fx = fixture();
        fs::write(fx.source.path().join("main.py"), "print(1)\n").unwrap();
        fs::create_dir_all(fx.source.path().join("lib")).unwrap();
        fs::write(fx.source.path().join("lib/helper.py"), "x = 1\n").unwrap();

        let first = detect_changes(&fx.ctx, &fx.walker).unwrap();
        assert_eq!(first, vec!["lib/helper.py".to_string(), "main.py".to_string()]);
        assert!(detect_changes(&fx.ctx, &fx.walker).unwrap().is_empty());

        let record = &fx.ctx.load_manifest().unwrap().files["main.py"];
        assert_eq!(record.line_count, 1);
        assert_eq!(record.size_bytes, 9);
    }

    #[test]
    fn deleted_file_is_pruned() {
        let fx = fixture();
        fs::write(fx.source.path().join("a.py"), "a").unwrap();
        fs::write(fx.source.path().join("b.py"), "b").unwrap();
        detect_changes(&fx.ctx, &fx.walker).unwrap();

        fs::remove_file(fx.source.path().join("b.py")).unwrap();
        assert!(detect_changes(&fx.ctx, &fx.walker).unwrap().is_empty());

        let manifest = fx.ctx.load_manifest().unwrap();
        assert_eq!(manifest.files.keys().collect::<Vec<_>>(), vec!["a.py"]);
    }

    #[test]
    fn unselected_files_are_ignored_and_pruned() {
        let fx = fixture();
        fs::write(fx.source.path().join("a.py"), "a").unwrap();
        fs::write(fx.source.path().join("b.py"), "b").unwrap();
        detect_changes(&fx.ctx, &fx.walker).unwrap();

        fx.ctx
            .update_record(|record| {
                record.file_selection = InclusionSet::build_tree(
                    vec![("a.py".to_string(), true), ("b.py".to_string(), false)],
                    &fx.walker,
                );
            })
            .unwrap();
        fs::write(fx.source.path().join("a.py"), "a2").unwrap();
        fs::write(fx.source.path().join("b.py"), "b2").unwrap();

        assert_eq!(detect_changes(&fx.ctx, &fx.walker).unwrap(), vec!["a.py".to_string()]);
        let manifest = fx.ctx.load_manifest().unwrap();
        assert!(!manifest.files.contains_key("b.py"));
    }

    #[test]
    fn unreadable_root_keeps_manifest() {
        let storage = tempdir().unwrap();
        let source = tempdir().unwrap();
        let manager = ProjectManager::new(storage.path());
        let ctx = manager.new_project("demo", source.path());
        ctx.ensure_structure().unwrap();
        fs::write(source.path().join("a.py"), "a").unwrap();
        let walker = FileWalker::with_filter(FilterOptions {
            extensions: vec!["py".to_string()],
            exclude_patterns: vec![],
        });
        detect_changes(&ctx, &walker).unwrap();
        let before = ctx.load_manifest().unwrap();

        let moved = manager.new_project("demo", source.path().join("gone"));
        assert!(detect_changes(&moved, &walker).unwrap().is_empty());
        assert_eq!(ctx.load_manifest().unwrap(), before);
    }

    #[test]
    fn status_reflects_summary_presence() {
        let fx = fixture();
        fs::write(fx.source.path().join("a.py"), "a").unwrap();

        assert_eq!(
            summary_status(&fx.ctx, &fx.walker, u64::MAX).unwrap(),
            SummaryStatus::NotSummarized
        );

        fs::write(fx.ctx.summary_path(), "not json").unwrap();
        assert_eq!(
            summary_status(&fx.ctx, &fx.walker, u64::MAX).unwrap(),
            SummaryStatus::ErrorLoadingSummary
        );
        assert_eq!(
            fx.ctx.load_record().unwrap().status,
            ProjectStatus::ErrorLoadingSummary
        );
    }
}
