use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use crate::{
    error::{PatchSightError, Result},
    manifest::SourceManifest,
    modification::ModificationHistoryEntry,
    query::QueryEntry,
    selection::InclusionSet,
    summary::SummaryStore,
};

const RECORD_FILE: &str = "project_record.json";
const MANIFEST_FILE: &str = "file_hashes.json";
const SUMMARY_FILE: &str = "combined_code_summary.json";
const QUERY_HISTORY_FILE: &str = "query_history.json";
const MODIFICATION_HISTORY_FILE: &str = "modifications_history.json";
const LOCK_FILE: &str = ".patchsight.lock";

#[derive(Debug)]
pub struct ProjectManager {
    storage_root: PathBuf,
}

/// Paths and persisted documents of one tracked project.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    storage_root: PathBuf,
    project_name: String,
    project_root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    NotSummarized,
    ErrorLoadingSummary,
    NeedsUpdate,
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_name: String,
    pub source_code_path: PathBuf,
    pub local_storage_path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_summarized: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub summary_count: u32,
    #[serde(default)]
    pub query_count: u32,
    #[serde(default)]
    pub modification_count: u32,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub total_lines: usize,
    pub status: ProjectStatus,
    #[serde(default)]
    pub file_selection: InclusionSet,
}

/// Held while a writer touches shared project files. Released on drop.
pub struct ProjectLock {
    file: File,
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl ProjectManager {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn new_project(
        &self,
        project_name: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> ProjectContext {
        ProjectContext {
            storage_root: self.storage_root.clone(),
            project_name: project_name.into(),
            project_root: project_root.into(),
        }
    }

    /// Opens a project that was initialised before, taking its source root
    /// from the stored record.
    pub fn open_project(&self, project_name: impl Into<String>) -> Result<ProjectContext> {
        let project_name = project_name.into();
        let record_path = self.storage_root.join(&project_name).join(RECORD_FILE);
        if !record_path.exists() {
            return Err(PatchSightError::InvalidState(format!(
                "project '{project_name}' has no record at '{}'",
                record_path.display()
            )));
        }
        let record: ProjectRecord = read_json(&record_path, "project record")?;
        Ok(self.new_project(project_name, record.source_code_path))
    }
}

impl ProjectContext {
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn project_storage_path(&self) -> PathBuf {
        self.storage_root.join(&self.project_name)
    }

    pub fn record_path(&self) -> PathBuf {
        self.project_storage_path().join(RECORD_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.project_storage_path().join(MANIFEST_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.project_storage_path().join(SUMMARY_FILE)
    }

    pub fn query_history_path(&self) -> PathBuf {
        self.project_storage_path().join(QUERY_HISTORY_FILE)
    }

    pub fn modification_history_path(&self) -> PathBuf {
        self.project_storage_path().join(MODIFICATION_HISTORY_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.project_storage_path().join("backups")
    }

    pub fn temp_mods_dir(&self) -> PathBuf {
        self.project_storage_path().join("temp_mods")
    }

    pub fn proposed_dir(&self) -> PathBuf {
        self.project_storage_path().join("proposed_modifications")
    }

    fn lock_path(&self) -> PathBuf {
        self.project_storage_path().join(LOCK_FILE)
    }

    /// Creates the storage directories and, on first use, the project record.
    pub fn ensure_structure(&self) -> Result<ProjectRecord> {
        for dir in [
            self.project_storage_path(),
            self.backups_dir(),
            self.temp_mods_dir(),
            self.proposed_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                PatchSightError::io(format!("creating directory '{}'", dir.display()), e)
            })?;
        }

        let record_path = self.record_path();
        if record_path.exists() {
            return read_json(&record_path, "project record");
        }

        let record = ProjectRecord {
            project_name: self.project_name.clone(),
            source_code_path: self.project_root.clone(),
            local_storage_path: self.project_storage_path(),
            created_at: Utc::now(),
            last_summarized: None,
            last_checked: None,
            summary_count: 0,
            query_count: 0,
            modification_count: 0,
            file_count: 0,
            total_lines: 0,
            status: ProjectStatus::NotSummarized,
            file_selection: InclusionSet::default(),
        };
        write_json(&record_path, &record, "project record")?;
        info!(project = %self.project_name, storage = %self.project_storage_path().display(), "project_created");
        Ok(record)
    }

    /// Blocks until this process holds the project's advisory write lock.
    pub fn lock(&self) -> Result<ProjectLock> {
        let path = self.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PatchSightError::io(format!("creating directory '{}'", parent.display()), e)
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PatchSightError::io(format!("opening lock '{}'", path.display()), e))?;
        file.lock_exclusive()
            .map_err(|e| PatchSightError::io(format!("acquiring lock '{}'", path.display()), e))?;
        debug!(project = %self.project_name, "project_lock_acquired");
        Ok(ProjectLock { file })
    }

    pub fn load_record(&self) -> Result<ProjectRecord> {
        let path = self.record_path();
        if !path.exists() {
            return Err(PatchSightError::InvalidState(format!(
                "project '{}' is not initialised",
                self.project_name
            )));
        }
        read_json(&path, "project record")
    }

    pub fn save_record(&self, record: &ProjectRecord) -> Result<()> {
        write_json(&self.record_path(), record, "project record")
    }

    /// Load, mutate and store the record under the project lock.
    pub fn update_record<F>(&self, mutate: F) -> Result<ProjectRecord>
    where
        F: FnOnce(&mut ProjectRecord),
    {
        let _lock = self.lock()?;
        self.modify_record(mutate)
    }

    /// Like [`ProjectContext::update_record`] for callers already holding the lock.
    pub(crate) fn modify_record<F>(&self, mutate: F) -> Result<ProjectRecord>
    where
        F: FnOnce(&mut ProjectRecord),
    {
        let mut record = self.load_record()?;
        mutate(&mut record);
        self.save_record(&record)?;
        Ok(record)
    }

    pub fn load_manifest(&self) -> Result<SourceManifest> {
        read_json_or_default(&self.manifest_path(), "source manifest")
    }

    pub fn save_manifest(&self, manifest: &SourceManifest) -> Result<()> {
        write_json(&self.manifest_path(), manifest, "source manifest")
    }

    /// `Ok(None)` when no summary has been written yet.
    pub fn load_summary(&self) -> Result<Option<SummaryStore>> {
        let path = self.summary_path();
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path, "summary store").map(Some)
    }

    pub fn save_summary(&self, store: &SummaryStore) -> Result<()> {
        write_json(&self.summary_path(), store, "summary store")
    }

    pub fn load_query_history(&self) -> Result<Vec<QueryEntry>> {
        read_json_or_default(&self.query_history_path(), "query history")
    }

    pub fn save_query_history(&self, history: &[QueryEntry]) -> Result<()> {
        write_json(&self.query_history_path(), &history, "query history")
    }

    pub fn load_modification_history(&self) -> Result<Vec<ModificationHistoryEntry>> {
        read_json_or_default(&self.modification_history_path(), "modification history")
    }

    pub fn save_modification_history(&self, history: &[ModificationHistoryEntry]) -> Result<()> {
        write_json(
            &self.modification_history_path(),
            &history,
            "modification history",
        )
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| PatchSightError::io(format!("reading {what} '{}'", path.display()), e))?;
    serde_json::from_str(&content)
        .map_err(|e| PatchSightError::json(format!("parsing {what} '{}'", path.display()), e))
}

pub(crate) fn read_json_or_default<T: DeserializeOwned + Default>(
    path: &Path,
    what: &str,
) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    read_json(path, what)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, what: &str) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| PatchSightError::json(format!("serializing {what}"), e))?;
    fs::write(path, content)
        .map_err(|e| PatchSightError::io(format!("writing {what} '{}'", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn ensure_structure_creates_layout_once() {
        let storage = tempdir().unwrap();
        let source = tempdir().unwrap();
        let ctx = ProjectManager::new(storage.path()).new_project("demo", source.path());

        let first = ctx.ensure_structure().unwrap();
        assert!(ctx.backups_dir().is_dir());
        assert!(ctx.temp_mods_dir().is_dir());
        assert!(ctx.proposed_dir().is_dir());
        assert_eq!(first.status, ProjectStatus::NotSummarized);

        let second = ctx.ensure_structure().unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn update_record_persists_changes() {
        let storage = tempdir().unwrap();
        let source = tempdir().unwrap();
        let manager = ProjectManager::new(storage.path());
        let ctx = manager.new_project("demo", source.path());
        ctx.ensure_structure().unwrap();

        ctx.update_record(|record| record.query_count += 2).unwrap();

        let reopened = manager.open_project("demo").unwrap();
        assert_eq!(reopened.project_root(), source.path());
        assert_eq!(reopened.load_record().unwrap().query_count, 2);
    }

    #[test]
    fn missing_documents_load_as_empty() {
        let storage = tempdir().unwrap();
        let ctx = ProjectManager::new(storage.path()).new_project("demo", "/nowhere");
        ctx.ensure_structure().unwrap();

        assert!(ctx.load_manifest().unwrap().files.is_empty());
        assert!(ctx.load_summary().unwrap().is_none());
        assert!(ctx.load_query_history().unwrap().is_empty());
        assert!(ctx.load_modification_history().unwrap().is_empty());
    }

    #[test]
    fn corrupt_document_is_a_json_error() {
        let storage = tempdir().unwrap();
        let ctx = ProjectManager::new(storage.path()).new_project("demo", "/nowhere");
        ctx.ensure_structure().unwrap();
        fs::write(ctx.manifest_path(), "{not json").unwrap();

        assert!(matches!(
            ctx.load_manifest(),
            Err(PatchSightError::Json { .. })
        ));
    }

    #[test]
    fn unknown_project_cannot_be_opened() {
        let storage = tempdir().unwrap();
        let result = ProjectManager::new(storage.path()).open_project("ghost");
        assert!(matches!(result, Err(PatchSightError::InvalidState(_))));
    }
}
