use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::PathBuf,
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    ModificationHandler, diff, parser,
    paths::resolve_within,
    types::{
        ModificationPreview, PreparedSession, ProposedModification, SessionArtifact,
        SessionPointer, SessionState,
    },
};
use crate::{
    completion::{Completer, Task, prompts},
    error::{PatchSightError, Result},
    format_duration,
    project_manager::{read_json, read_json_or_default, write_json},
    query::QueryEntry,
};

impl ModificationHandler<'_> {
    /// Reads every file the query recommends and persists a new session.
    ///
    /// Paths escaping the project root and unreadable files are skipped and
    /// reported; if nothing is readable no session is created.
    pub fn prepare(&self, query: &QueryEntry, client: &str) -> Result<PreparedSession> {
        let instructions: Vec<_> = query.actionable().collect();
        if instructions.is_empty() {
            return Err(PatchSightError::NoInstructions(query.id.clone()));
        }

        let mut original_contents: BTreeMap<String, String> = BTreeMap::new();
        let mut per_file_instructions: BTreeMap<String, String> = BTreeMap::new();
        let mut skipped_files = Vec::new();

        for item in instructions {
            let contained = match resolve_within(self.ctx.project_root(), &item.file_path) {
                Ok(contained) => contained,
                Err(err) => {
                    warn!(query_id = %query.id, target_file = %item.file_path, error = %err, "rejected recommendation path");
                    skipped_files.push(item.file_path.clone());
                    continue;
                }
            };
            if original_contents.contains_key(&contained.relative) {
                continue;
            }
            match fs::read_to_string(&contained.absolute) {
                Ok(content) => {
                    per_file_instructions
                        .insert(contained.relative.clone(), item.instructions_to_modify.clone());
                    original_contents.insert(contained.relative, content);
                }
                Err(err) => {
                    warn!(query_id = %query.id, target_file = %contained.relative, error = %err, "could not read recommended file");
                    skipped_files.push(item.file_path.clone());
                }
            }
        }

        if original_contents.is_empty() {
            return Err(PatchSightError::NoReadableFiles {
                query_id: query.id.clone(),
            });
        }

        let files: Vec<prompts::ModificationFile<'_>> = original_contents
            .iter()
            .map(|(path, code)| prompts::ModificationFile {
                relative_path: path,
                instructions: per_file_instructions
                    .get(path)
                    .map(String::as_str)
                    .unwrap_or_default(),
                current_code: code,
            })
            .collect();
        let prompt = prompts::build_modification_prompt(&query.input_query, &files);

        let pointer = SessionPointer {
            session_id: Uuid::new_v4().to_string(),
            query_id: query.id.clone(),
            client: client.to_string(),
            involved_files: original_contents.keys().cloned().collect(),
        };
        let now = Utc::now();
        let artifact = SessionArtifact {
            pointer: pointer.clone(),
            state: SessionState::Prepared,
            created_at: now,
            updated_at: now,
            user_requirement: query.input_query.clone(),
            prompt: prompt.clone(),
            original_contents,
            llm_response: None,
            response_time: None,
        };
        self.save_artifact(&artifact)?;

        info!(
            session_id = %pointer.session_id,
            query_id = %pointer.query_id,
            client,
            file_count = pointer.involved_files.len(),
            skipped = skipped_files.len(),
            "session_prepared"
        );
        Ok(PreparedSession {
            pointer,
            prompt,
            skipped_files,
        })
    }

    /// Sends the prepared prompt to `completer` and builds the per-file preview.
    ///
    /// On a completion, parse or empty-preview failure the session stays
    /// prepared so it can be generated again or cancelled.
    pub async fn generate(
        &self,
        session_id: &str,
        completer: &Completer,
    ) -> Result<ModificationPreview> {
        let mut artifact = self.load_session(session_id)?;
        ensure_transition(&artifact, SessionState::Generated, "generate")?;

        info!(session_id, client = %artifact.pointer.client, "generate_modification");
        let start = Instant::now();
        let response = completer
            .complete(Task::Modification, &artifact.prompt)
            .await?;
        let elapsed = start.elapsed();

        artifact.llm_response = Some(response.clone());
        artifact.response_time = Some(elapsed.as_secs_f64());
        artifact.updated_at = Utc::now();

        let modifications = match parser::parse_response(&response)
            .and_then(|parsed| self.build_preview(&artifact, parsed, &response))
        {
            Ok(modifications) => modifications,
            Err(err) => {
                warn!(session_id, error = %err, "modification response unusable");
                self.save_artifact(&artifact)?;
                return Err(err);
            }
        };

        let preview = ModificationPreview {
            session_id: artifact.pointer.session_id.clone(),
            query_id: artifact.pointer.query_id.clone(),
            created_at: Utc::now(),
            modifications,
            llm_response: response,
            response_time: elapsed.as_secs_f64(),
        };
        write_json(
            &self.proposed_path(&artifact.pointer.query_id),
            &preview,
            "modification preview",
        )?;

        artifact.state = SessionState::Generated;
        self.save_artifact(&artifact)?;

        info!(
            session_id,
            file_count = preview.modifications.len(),
            elapsed = %format_duration(elapsed),
            "session_generated"
        );
        Ok(preview)
    }

    /// Discards a session that was not applied, with its preview.
    pub fn cancel(&self, session_id: &str) -> Result<SessionPointer> {
        let artifact = self.load_session(session_id)?;
        ensure_transition(&artifact, SessionState::Cancelled, "cancel")?;
        self.discard(&artifact);
        info!(session_id, query_id = %artifact.pointer.query_id, "session_cancelled");
        Ok(artifact.pointer)
    }

    pub fn load_session(&self, session_id: &str) -> Result<SessionArtifact> {
        let path = self.artifact_path(session_id)?;
        if !path.exists() {
            return Err(PatchSightError::SessionNotFound(session_id.to_string()));
        }
        read_json(&path, "session artifact")
    }

    pub fn load_proposed(&self, query_id: &str) -> Result<Option<ModificationPreview>> {
        if Uuid::parse_str(query_id).is_err() {
            return Err(PatchSightError::QueryNotFound(query_id.to_string()));
        }
        read_json_or_default::<Option<ModificationPreview>>(
            &self.proposed_path(query_id),
            "modification preview",
        )
    }

    /// Deletes sessions whose last update is older than `ttl` and returns
    /// their ids. Artifacts that no longer parse age by file mtime.
    pub fn sweep_expired(&self, ttl: Duration) -> Result<Vec<String>> {
        let dir = self.ctx.temp_mods_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|e| {
            PatchSightError::io(format!("reading session directory '{}'", dir.display()), e)
        })?;

        let now = Utc::now();
        let mut swept = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };

            let artifact = read_json::<SessionArtifact>(&path, "session artifact").ok();
            let age = match &artifact {
                Some(artifact) => (now - artifact.updated_at).to_std().unwrap_or_default(),
                None => entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .unwrap_or_default(),
            };
            if age <= ttl {
                continue;
            }

            match artifact {
                Some(artifact) => self.discard(&artifact),
                None => {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %err, "failed removing stale session file");
                        continue;
                    }
                }
            }
            info!(session_id = %session_id, age_secs = age.as_secs(), "session_expired");
            swept.push(session_id);
        }
        swept.sort();
        Ok(swept)
    }

    fn build_preview(
        &self,
        artifact: &SessionArtifact,
        parsed: BTreeMap<String, String>,
        response: &str,
    ) -> Result<Vec<ProposedModification>> {
        let mut proposed: BTreeMap<String, String> = BTreeMap::new();
        for (path, code) in parsed {
            match resolve_within(self.ctx.project_root(), &path) {
                Ok(contained) => {
                    proposed.insert(contained.relative, code);
                }
                Err(err) => {
                    warn!(session_id = %artifact.pointer.session_id, target_file = %path, error = %err, "dropping proposed file outside project");
                }
            }
        }

        let all_paths: BTreeSet<&String> = artifact
            .original_contents
            .keys()
            .chain(proposed.keys())
            .collect();

        let mut modifications = Vec::new();
        for path in all_paths {
            let Some(new_code) = proposed.get(path) else {
                warn!(session_id = %artifact.pointer.session_id, target_file = %path, "model omitted file from response");
                continue;
            };
            let old_code = artifact
                .original_contents
                .get(path)
                .cloned()
                .unwrap_or_default();
            let lines = diff::diff_lines(&old_code, new_code);
            modifications.push(ProposedModification {
                file_path: path.clone(),
                highlighted_diff: diff::render_html(&lines),
                diff: lines,
                old_code,
                new_code: new_code.clone(),
            });
        }

        if modifications.is_empty() {
            return Err(PatchSightError::EmptyPreview {
                raw_response: response.to_string(),
            });
        }
        Ok(modifications)
    }

    pub(super) fn save_artifact(&self, artifact: &SessionArtifact) -> Result<()> {
        let path = self.artifact_path(&artifact.pointer.session_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PatchSightError::io(format!("creating directory '{}'", parent.display()), e)
            })?;
        }
        write_json(&path, artifact, "session artifact")
    }

    /// Removes the session artifact and, when it belongs to this session, the preview.
    pub(super) fn discard(&self, artifact: &SessionArtifact) {
        if let Ok(path) = self.artifact_path(&artifact.pointer.session_id) {
            remove_if_present(&path);
        }

        let proposed = self.proposed_path(&artifact.pointer.query_id);
        let owned = read_json::<ModificationPreview>(&proposed, "modification preview")
            .map(|preview| preview.session_id == artifact.pointer.session_id)
            .unwrap_or(false);
        if owned {
            remove_if_present(&proposed);
        }
    }

    fn artifact_path(&self, session_id: &str) -> Result<PathBuf> {
        // Ids become file names, so only accept what `prepare` hands out.
        if Uuid::parse_str(session_id).is_err() {
            return Err(PatchSightError::SessionNotFound(session_id.to_string()));
        }
        Ok(self.ctx.temp_mods_dir().join(format!("{session_id}.json")))
    }

    fn proposed_path(&self, query_id: &str) -> PathBuf {
        self.ctx.proposed_dir().join(format!("{query_id}.json"))
    }
}

/// Allowed moves: prepared to generated, generated to applied, and either
/// live state to cancelled.
pub(super) fn ensure_transition(
    artifact: &SessionArtifact,
    to: SessionState,
    action: &'static str,
) -> Result<()> {
    let allowed = matches!(
        (artifact.state, to),
        (SessionState::Prepared, SessionState::Generated)
            | (SessionState::Generated, SessionState::Applied)
            | (SessionState::Prepared | SessionState::Generated, SessionState::Cancelled)
    );
    if allowed {
        Ok(())
    } else {
        Err(PatchSightError::InvalidTransition {
            session_id: artifact.pointer.session_id.clone(),
            state: artifact.state,
            action,
        })
    }
}

fn remove_if_present(path: &std::path::Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed removing session file");
        }
    }
}
