mod summarizer;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use summarizer::Summarizer;

use crate::manifest::SourceManifest;

/// Per-file summaries plus the synthesised project overview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStore {
    pub project_name: String,
    #[serde(default)]
    pub files: BTreeMap<String, SummaryEntry>,
    #[serde(default)]
    pub file_count: usize,
    #[serde(default)]
    pub total_lines: usize,
    #[serde(default)]
    pub project_summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub path: String,
    pub detailed_summary: String,
    pub concise_summary: String,
    pub lines: usize,
    pub size: u64,
    /// Digest of the content this entry was written from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Set when summarising failed; the next incremental pass retries the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SummaryEntry {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl SummaryStore {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            ..Self::default()
        }
    }

    pub fn recount(&mut self) {
        self.file_count = self.files.len();
        self.total_lines = self.files.values().map(|entry| entry.lines).sum();
    }

    /// Paths whose last summarisation failed.
    pub fn errored_paths(&self) -> Vec<String> {
        self.files
            .values()
            .filter(|entry| entry.is_error())
            .map(|entry| entry.path.clone())
            .collect()
    }

    /// Tracked paths whose summary was written from other content than the
    /// manifest now records, or that have no summary at all. Files above
    /// `max_file_size` are never summarised and so never count.
    pub fn stale_paths(&self, manifest: &SourceManifest, max_file_size: u64) -> Vec<String> {
        manifest
            .files
            .iter()
            .filter(|(_, record)| record.size_bytes <= max_file_size)
            .filter(|(path, record)| {
                self.files
                    .get(*path)
                    .is_none_or(|entry| entry.digest.as_deref() != Some(record.digest.as_str()))
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Concise summaries of every healthy entry, the input for the project overview.
    pub fn aggregate_concise(&self) -> String {
        self.files
            .values()
            .filter(|entry| !entry.is_error() && !entry.concise_summary.trim().is_empty())
            .map(|entry| format!("File: {}\nSummary: {}", entry.path, entry.concise_summary.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
