use std::{
    collections::BTreeSet,
    fs::{self, File, OpenOptions},
    io,
    path::Path,
};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    ModificationHandler,
    paths::resolve_within,
    session::ensure_transition,
    types::{FileOutcome, ModificationHistoryEntry, ModificationRequest, SessionState},
};
use crate::{
    error::{PatchSightError, Result},
    file_walker::normalize_relative_path,
};

const BACKUP_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// `src/app.py` applied at 2024-05-01 12:30:05.123 backs up to
/// `src_app.py_2024-05-01_12-30-05-123.bak`.
///
/// Literal `%` and `_` in the path are escaped as `%25` and `%5F` so every
/// `_` in the flattened name stands for a `/`, and two different paths never
/// share a backup.
pub fn backup_file_name(relative_path: &str, applied_at: &DateTime<Utc>) -> String {
    let mut flattened = String::with_capacity(relative_path.len());
    for ch in relative_path.chars() {
        match ch {
            '%' => flattened.push_str("%25"),
            '_' => flattened.push_str("%5F"),
            '/' => flattened.push('_'),
            other => flattened.push(other),
        }
    }
    format!("{flattened}_{}.bak", applied_at.format(BACKUP_STAMP_FORMAT))
}

impl ModificationHandler<'_> {
    /// Writes the accepted changes of a generated session.
    ///
    /// Each file is contained, backed up if it exists, then overwritten; a
    /// file whose backup fails is left alone. If nothing was written the
    /// session stays generated and no history is recorded.
    pub fn apply(
        &self,
        session_id: &str,
        requests: &[ModificationRequest],
    ) -> Result<ModificationHistoryEntry> {
        let _lock = self.ctx.lock()?;
        let artifact = self.load_session(session_id)?;
        ensure_transition(&artifact, SessionState::Applied, "apply")?;

        let applied_at = Utc::now();
        let backups_dir = self.ctx.backups_dir();
        let mut seen = BTreeSet::new();
        let mut outcomes = Vec::with_capacity(requests.len());

        for request in requests {
            let outcome = match resolve_within(self.ctx.project_root(), &request.file_path) {
                Err(err) => {
                    warn!(session_id, target_file = %request.file_path, error = %err, "write outside project denied");
                    FileOutcome::error(&request.file_path, err.to_string())
                }
                Ok(contained) if !seen.insert(contained.relative.clone()) => {
                    FileOutcome::error(contained.relative, "duplicate entry in request")
                }
                Ok(contained) => write_one(
                    &contained.absolute,
                    &contained.relative,
                    &request.new_code,
                    &backups_dir,
                    &applied_at,
                ),
            };
            outcomes.push(outcome);
        }

        if !outcomes.iter().any(FileOutcome::is_success) {
            warn!(session_id, attempted = outcomes.len(), "no file could be written");
            return Err(PatchSightError::NothingApplied { outcomes });
        }

        let entry = ModificationHistoryEntry {
            id: Uuid::new_v4().to_string(),
            query_id: artifact.pointer.query_id.clone(),
            session_id: artifact.pointer.session_id.clone(),
            timestamp: applied_at,
            files_modified: outcomes,
            llm_response: artifact.llm_response.clone().unwrap_or_default(),
            response_time: artifact.response_time.unwrap_or_default(),
            client: artifact.pointer.client.clone(),
        };

        let mut history = self.ctx.load_modification_history()?;
        history.push(entry.clone());
        self.ctx.save_modification_history(&history)?;
        self.ctx
            .modify_record(|record| record.modification_count += 1)?;
        self.discard(&artifact);

        info!(
            session_id,
            modification_id = %entry.id,
            succeeded = entry.success_count(),
            failed = entry.error_count(),
            "modifications_applied"
        );
        Ok(entry)
    }

    /// Restores one file from the backup taken by modification `modification_id`.
    pub fn revert(&self, modification_id: &str, file_path: &str) -> Result<()> {
        let _lock = self.ctx.lock()?;
        let entry = self.find_modification(modification_id)?;

        let contained = resolve_within(self.ctx.project_root(), file_path)?;
        let requested = normalize_relative_path(file_path);
        let recorded = entry.files_modified.iter().any(|outcome| {
            outcome.is_success()
                && (outcome.file_path == contained.relative || outcome.file_path == requested)
        });
        if !recorded {
            return Err(PatchSightError::FileNotInModification {
                modification_id: modification_id.to_string(),
                file_path: file_path.to_string(),
            });
        }

        let backup = self
            .ctx
            .backups_dir()
            .join(backup_file_name(&contained.relative, &entry.timestamp));
        if !backup.is_file() {
            return Err(PatchSightError::BackupMissing { path: backup });
        }

        let bytes = fs::read(&backup).map_err(|e| {
            PatchSightError::io(format!("reading backup '{}'", backup.display()), e)
        })?;
        if let Some(parent) = contained.absolute.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PatchSightError::io(format!("creating directory '{}'", parent.display()), e)
            })?;
        }
        fs::write(&contained.absolute, bytes).map_err(|e| {
            PatchSightError::io(
                format!("restoring '{}'", contained.absolute.display()),
                e,
            )
        })?;

        info!(modification_id, target_file = %contained.relative, "modification_reverted");
        Ok(())
    }

    pub fn list_modifications(&self) -> Result<Vec<ModificationHistoryEntry>> {
        self.ctx.load_modification_history()
    }

    pub fn find_modification(&self, modification_id: &str) -> Result<ModificationHistoryEntry> {
        self.ctx
            .load_modification_history()?
            .into_iter()
            .find(|entry| entry.id == modification_id)
            .ok_or_else(|| PatchSightError::ModificationNotFound(modification_id.to_string()))
    }
}

fn write_one(
    absolute: &Path,
    relative: &str,
    new_code: &str,
    backups_dir: &Path,
    applied_at: &DateTime<Utc>,
) -> FileOutcome {
    let existed = absolute.is_file();
    if existed {
        let backup = backups_dir.join(backup_file_name(relative, applied_at));
        let copied = fs::create_dir_all(backups_dir).and_then(|()| copy_to_new(absolute, &backup));
        if let Err(err) = copied {
            warn!(target_file = %relative, error = %err, "backup failed; file left untouched");
            return FileOutcome::error(relative, format!("backup failed: {err}"));
        }
    } else if let Some(parent) = absolute.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!(target_file = %relative, error = %err, "could not create parent directory");
            return FileOutcome::error(relative, format!("could not create directory: {err}"));
        }
    }

    match fs::write(absolute, new_code) {
        Ok(()) => {
            info!(target_file = %relative, created = !existed, "file written");
            let message = if existed { "file modified" } else { "file created" };
            FileOutcome::success(relative, message)
        }
        Err(err) => {
            warn!(target_file = %relative, error = %err, "write failed");
            FileOutcome::error(relative, format!("write failed: {err}"))
        }
    }
}

/// Copies `from` into a file that must not exist yet.
fn copy_to_new(from: &Path, to: &Path) -> io::Result<u64> {
    let mut source = File::open(from)?;
    let mut target = OpenOptions::new().write(true).create_new(true).open(to)?;
    io::copy(&mut source, &mut target)
}
