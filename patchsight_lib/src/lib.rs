use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    completion::{Completer, CompletionRegistry, OllamaBackend},
    error::Result,
    file_walker::{FileWalker, FilterOptions},
    manifest::SummaryStatus,
    modification::{
        ModificationHandler, ModificationHistoryEntry, ModificationPreview, ModificationRequest,
        PreparedSession, SessionPointer, SessionState,
    },
    project_manager::{ProjectContext, ProjectRecord},
    query::{QueryEntry, QueryHandler},
    selection::InclusionSet,
    summary::{Summarizer, SummaryStore},
};

pub mod completion;
pub mod config;
pub mod error;
pub mod file_walker;
pub mod hasher;
pub mod manifest;
pub mod modification;
pub mod project_manager;
pub mod query;
pub mod selection;
pub mod summary;

pub use config::{PatchSightConfig, SourceDiscoveryConfig};
pub use error::PatchSightError;

/// Selector of the completer built from [`PatchSightConfig::ollama`].
pub const DEFAULT_CLIENT: &str = "ollama";
/// Selector of the completer that talks to the fallback model only.
pub const FALLBACK_CLIENT: &str = "fallback";

pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .pretty()
        .init();
}

/// Builds the Ollama completers described by `config`.
///
/// With a fallback model the default completer falls back to it, and the
/// fallback is also selectable on its own. Both share one request permit.
pub fn ollama_registry(config: &PatchSightConfig) -> CompletionRegistry {
    let primary = Arc::new(OllamaBackend::new(DEFAULT_CLIENT, config.ollama.clone()));
    let Some(fallback_model) = &config.fallback_model else {
        return CompletionRegistry::new(
            DEFAULT_CLIENT,
            Completer::new(primary, config.completion.clone()),
        );
    };

    let fallback = Arc::new(OllamaBackend::sharing_lock_with(
        FALLBACK_CLIENT,
        config.ollama.clone().with_model(fallback_model.clone()),
        &primary,
    ));
    let mut registry = CompletionRegistry::new(
        DEFAULT_CLIENT,
        Completer::new(primary, config.completion.clone()).with_fallback(fallback.clone()),
    );
    registry.register(
        FALLBACK_CLIENT,
        Completer::new(fallback, config.completion.clone()),
    );
    registry
}

/// Every operation on one tracked project, wired to its completers.
pub struct PatchSight {
    config: PatchSightConfig,
    ctx: ProjectContext,
    walker: FileWalker,
    completers: CompletionRegistry,
}

impl PatchSight {
    pub fn new(config: PatchSightConfig, ctx: ProjectContext, completers: CompletionRegistry) -> Self {
        let walker = FileWalker::with_filter(FilterOptions::from(&config.source_discovery));
        Self {
            config,
            ctx,
            walker,
            completers,
        }
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    pub fn config(&self) -> &PatchSightConfig {
        &self.config
    }

    pub fn completers(&self) -> &CompletionRegistry {
        &self.completers
    }

    /// Creates the storage layout and seeds the selection tree on first use.
    pub fn init(&self) -> Result<ProjectRecord> {
        let record = self.ctx.ensure_structure()?;
        if record.file_selection.file_count() > 0 {
            return Ok(record);
        }
        self.file_tree()?;
        self.ctx.load_record()
    }

    pub fn record(&self) -> Result<ProjectRecord> {
        self.ctx.load_record()
    }

    /// Re-walks the source tree and stores the refreshed selection tree.
    pub fn file_tree(&self) -> Result<InclusionSet> {
        let discovered = self.walker.walk(self.ctx.project_root())?;
        let record = self.ctx.update_record(|record| {
            record.file_selection = record.file_selection.refresh(&discovered, &self.walker);
        })?;
        Ok(record.file_selection)
    }

    /// Replaces the selection with exactly `selected`.
    pub fn select_files(&self, selected: &BTreeSet<String>) -> Result<InclusionSet> {
        let discovered = self.walker.walk(self.ctx.project_root())?;
        let selection = InclusionSet::with_selection(&discovered, selected, &self.walker);
        info!(
            project = %self.ctx.project_name(),
            checked = selection.checked_paths().len(),
            "selection_updated"
        );
        let record = self.ctx.update_record(|record| {
            record.file_selection = selection;
        })?;
        Ok(record.file_selection)
    }

    pub fn detect_changes(&self) -> Result<Vec<String>> {
        manifest::detect_changes(&self.ctx, &self.walker)
    }

    pub fn summary_status(&self) -> Result<SummaryStatus> {
        manifest::summary_status(
            &self.ctx,
            &self.walker,
            self.config.source_discovery.max_file_size,
        )
    }

    /// Full rescan when asked for or when nothing was summarised yet,
    /// otherwise only changed and previously failed files.
    pub async fn summarize(&self, client: Option<&str>, full: bool) -> Result<SummaryStore> {
        let (client, completer) = self.completers.resolve(client)?;
        let summarizer = Summarizer::new(
            &self.ctx,
            &completer,
            &self.walker,
            self.config.source_discovery.max_file_size,
        );

        let has_summary = matches!(self.ctx.load_summary(), Ok(Some(_)));
        info!(project = %self.ctx.project_name(), client = %client, full, "summarize");
        if full || !has_summary {
            summarizer.full_rescan().await
        } else {
            let changed = self.detect_changes()?;
            summarizer.update_changed(&changed).await
        }
    }

    pub async fn query(&self, input_query: &str, client: Option<&str>) -> Result<QueryEntry> {
        let (client, completer) = self.completers.resolve(client)?;
        QueryHandler::new(&self.ctx)
            .process_query(input_query, &client, &completer)
            .await
    }

    pub fn queries(&self) -> Result<Vec<QueryEntry>> {
        QueryHandler::new(&self.ctx).list_queries()
    }

    pub fn delete_query(&self, query_id: &str) -> Result<()> {
        QueryHandler::new(&self.ctx).delete_query(query_id)
    }

    /// Starts a modification session for a recorded query. The client
    /// defaults to the one that answered the query when still registered.
    pub fn prepare(&self, query_id: &str, client: Option<&str>) -> Result<PreparedSession> {
        let query = QueryHandler::new(&self.ctx).find_query(query_id)?;
        let selector = match client {
            Some(client) => Some(client),
            None if self.completers.clients().any(|c| c == query.client) => {
                Some(query.client.as_str())
            }
            None => None,
        };
        let (client, _) = self.completers.resolve(selector)?;
        ModificationHandler::new(&self.ctx).prepare(&query, &client)
    }

    pub async fn generate(&self, session_id: &str) -> Result<ModificationPreview> {
        let handler = ModificationHandler::new(&self.ctx);
        let session = handler.load_session(session_id)?;
        let (_, completer) = self.completers.resolve(Some(session.pointer.client.as_str()))?;
        handler.generate(session_id, &completer).await
    }

    /// Applies `requests`, or every file of the stored preview when `None`.
    pub fn apply(
        &self,
        session_id: &str,
        requests: Option<Vec<ModificationRequest>>,
    ) -> Result<ModificationHistoryEntry> {
        let handler = ModificationHandler::new(&self.ctx);
        let requests = match requests {
            Some(requests) => requests,
            None => {
                let session = handler.load_session(session_id)?;
                if session.state != SessionState::Generated {
                    // Let the state check name the real problem.
                    return handler.apply(session_id, &[]);
                }
                let preview = handler
                    .load_proposed(&session.pointer.query_id)?
                    .filter(|preview| preview.session_id == session.pointer.session_id)
                    .ok_or_else(|| {
                        PatchSightError::InvalidState(format!(
                            "session '{session_id}' has no stored preview for query '{}'; pass the changes explicitly",
                            session.pointer.query_id
                        ))
                    })?;
                preview
                    .modifications
                    .iter()
                    .map(ModificationRequest::from)
                    .collect()
            }
        };
        handler.apply(session_id, &requests)
    }

    pub fn cancel(&self, session_id: &str) -> Result<SessionPointer> {
        ModificationHandler::new(&self.ctx).cancel(session_id)
    }

    pub fn revert(&self, modification_id: &str, file_path: &str) -> Result<()> {
        ModificationHandler::new(&self.ctx).revert(modification_id, file_path)
    }

    pub fn modifications(&self) -> Result<Vec<ModificationHistoryEntry>> {
        ModificationHandler::new(&self.ctx).list_modifications()
    }

    pub fn sweep_expired_sessions(&self) -> Result<Vec<String>> {
        ModificationHandler::new(&self.ctx).sweep_expired(self.config.session_ttl)
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let millis = d.subsec_millis();
    let mins = total_secs / 60;
    let secs = total_secs % 60;

    if mins > 0 {
        format!("{mins}m {secs}s {millis}ms")
    } else if secs > 0 {
        format!("{secs}s {millis}ms")
    } else {
        format!("{millis}ms")
    }
}
