use std::{collections::BTreeSet, fs, path::Path, time::Instant};

use chrono::Utc;
use tracing::{info, warn};

use super::{SummaryEntry, SummaryStore};
use crate::{
    completion::{Completer, Task, prompts, utils},
    error::Result,
    file_walker::FileWalker,
    format_duration, hasher, manifest,
    project_manager::{ProjectContext, ProjectStatus},
};

pub struct Summarizer<'a> {
    ctx: &'a ProjectContext,
    completer: &'a Completer,
    walker: &'a FileWalker,
    max_file_size: u64,
}

impl<'a> Summarizer<'a> {
    pub fn new(
        ctx: &'a ProjectContext,
        completer: &'a Completer,
        walker: &'a FileWalker,
        max_file_size: u64,
    ) -> Self {
        Self {
            ctx,
            completer,
            walker,
            max_file_size,
        }
    }

    /// Summarises every in-scope file and replaces the store wholesale.
    pub async fn full_rescan(&self) -> Result<SummaryStore> {
        // Refresh digests so the next status check starts from this scan.
        manifest::detect_changes(self.ctx, self.walker)?;

        let scope = self.ctx.load_record()?.file_selection.scope();
        let discovered = self.walker.walk(self.ctx.project_root())?;
        info!(project = %self.ctx.project_name(), file_count = discovered.len(), "full_rescan_start");

        let mut store = SummaryStore::new(self.ctx.project_name());
        if let Ok(Some(previous)) = self.ctx.load_summary() {
            store.project_summary = previous.project_summary;
        }
        for file in discovered {
            if !scope.contains(&file.relative_path) {
                continue;
            }
            if let Some(entry) = self.summarize_file(&file.relative_path).await {
                store.files.insert(file.relative_path, entry);
            }
        }

        self.finish(store).await
    }

    /// Re-summarises `changed`, every entry still carrying an error and every
    /// tracked file whose summary is older than its current digest, then
    /// patches them into the stored summaries and refreshes the overview.
    pub async fn update_changed(&self, changed: &[String]) -> Result<SummaryStore> {
        let mut store = match self.ctx.load_summary() {
            Ok(Some(store)) => store,
            Ok(None) => SummaryStore::new(self.ctx.project_name()),
            Err(err) => {
                warn!(project = %self.ctx.project_name(), error = %err, "summary store unreadable; starting fresh");
                SummaryStore::new(self.ctx.project_name())
            }
        };

        // Entries the manifest no longer tracks were deleted or deselected.
        let tracked = self.ctx.load_manifest()?;
        store.files.retain(|path, _| {
            let keep = tracked.files.contains_key(path);
            if !keep {
                info!(target_file = %path, "dropping summary of untracked file");
            }
            keep
        });

        let mut targets: BTreeSet<String> = changed.iter().cloned().collect();
        targets.extend(store.errored_paths());
        targets.extend(store.stale_paths(&tracked, self.max_file_size));

        if targets.is_empty() {
            info!(project = %self.ctx.project_name(), "summaries already current");
            return self.persist(store);
        }

        info!(project = %self.ctx.project_name(), file_count = targets.len(), "update_changed_start");
        for relative_path in &targets {
            if !self.ctx.project_root().join(relative_path).exists() {
                store.files.remove(relative_path);
                continue;
            }
            if let Some(entry) = self.summarize_file(relative_path).await {
                store.files.insert(relative_path.clone(), entry);
            }
        }

        self.finish(store).await
    }

    /// `None` when the file is missing, not a regular file, or too large.
    pub async fn summarize_file(&self, relative_path: &str) -> Option<SummaryEntry> {
        let path = self.ctx.project_root().join(relative_path);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return None,
            Err(err) => {
                warn!(target_file = %relative_path, error = %err, "cannot stat file; skipping");
                return None;
            }
        };
        if metadata.len() > self.max_file_size {
            warn!(target_file = %relative_path, size = metadata.len(), max = self.max_file_size, "file too large to summarise; skipping");
            return None;
        }

        let failed = |lines: usize, error: String| SummaryEntry {
            path: relative_path.to_string(),
            detailed_summary: String::new(),
            concise_summary: String::new(),
            lines,
            size: metadata.len(),
            digest: None,
            error: Some(error),
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!(target_file = %relative_path, error = %err, "failed reading source file");
                return Some(failed(0, format!("unreadable: {err}")));
            }
        };
        let lines = content.lines().count();
        let digest = hasher::digest_bytes(content.as_bytes());
        let file_type = Path::new(relative_path)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        info!(target_file = %relative_path, client = self.completer.name(), "generate_file_summary");
        let start = Instant::now();
        let prompt = prompts::build_file_summary_prompt(relative_path, file_type, &content);
        let response = match self.completer.complete(Task::FileSummary, &prompt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(target_file = %relative_path, error = %err, "file summary failed");
                return Some(SummaryEntry {
                    digest: Some(digest),
                    ..failed(lines, err.to_string())
                });
            }
        };

        let detailed = utils::extract_tagged(&response, "detailed");
        let concise = utils::extract_tagged(&response, "concise");
        let entry = match (detailed, concise) {
            (Some(detailed_summary), Some(concise_summary)) => SummaryEntry {
                path: relative_path.to_string(),
                detailed_summary,
                concise_summary,
                lines,
                size: metadata.len(),
                digest: Some(digest),
                error: None,
            },
            (detailed, concise) => {
                warn!(target_file = %relative_path, "summary response missing tagged sections");
                SummaryEntry {
                    detailed_summary: detailed.unwrap_or_else(|| response.trim().to_string()),
                    concise_summary: concise.unwrap_or_default(),
                    digest: Some(digest),
                    ..failed(lines, "response lacked <detailed>/<concise> sections".to_string())
                }
            }
        };

        info!(
            target_file = %relative_path,
            elapsed = %format_duration(start.elapsed()),
            lines,
            "file summary generated"
        );
        Some(entry)
    }

    async fn finish(&self, mut store: SummaryStore) -> Result<SummaryStore> {
        self.refresh_project_summary(&mut store).await;
        self.persist(store)
    }

    async fn refresh_project_summary(&self, store: &mut SummaryStore) {
        let aggregated = store.aggregate_concise();
        if aggregated.is_empty() {
            info!(project = %self.ctx.project_name(), "no healthy summaries; keeping previous project summary");
            return;
        }

        info!(project = %self.ctx.project_name(), client = self.completer.name(), "generate_project_summary");
        let start = Instant::now();
        let prompt = prompts::build_project_summary_prompt(self.ctx.project_name(), &aggregated);
        match self.completer.complete(Task::ProjectSummary, &prompt).await {
            Ok(summary) => {
                store.project_summary = utils::strip_wrapping_code_fence(&summary);
                info!(
                    project = %self.ctx.project_name(),
                    elapsed = %format_duration(start.elapsed()),
                    summary_len = store.project_summary.len(),
                    "project summary generated"
                );
            }
            Err(err) => {
                warn!(project = %self.ctx.project_name(), error = %err, "project summary failed; keeping previous text");
                store.project_summary.push_str(&format!("\n\n[Error: {err}]"));
            }
        }
    }

    fn persist(&self, mut store: SummaryStore) -> Result<SummaryStore> {
        store.recount();
        let _lock = self.ctx.lock()?;
        self.ctx.save_summary(&store)?;
        self.ctx.modify_record(|record| {
            record.last_summarized = Some(Utc::now());
            record.summary_count += 1;
            record.file_count = store.file_count;
            record.total_lines = store.total_lines;
            record.status = ProjectStatus::UpToDate;
        })?;
        Ok(store)
    }
}
