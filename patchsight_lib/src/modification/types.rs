use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diff::DiffLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Prepared,
    Generated,
    Applied,
    Cancelled,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Prepared => "prepared",
            Self::Generated => "generated",
            Self::Applied => "applied",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// The small part of a session a caller keeps between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPointer {
    pub session_id: String,
    pub query_id: String,
    pub client: String,
    pub involved_files: Vec<String>,
}

/// Everything a session needs to resume in another process, stored as
/// `temp_mods/{session_id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionArtifact {
    #[serde(flatten)]
    pub pointer: SessionPointer,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_requirement: String,
    pub prompt: String,
    pub original_contents: BTreeMap<String, String>,
    #[serde(default)]
    pub llm_response: Option<String>,
    #[serde(default)]
    pub response_time: Option<f64>,
}

/// Returned by `prepare`; the prompt is for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedSession {
    pub pointer: SessionPointer,
    pub prompt: String,
    /// Recommendations dropped because their path escaped the project root
    /// or could not be read.
    pub skipped_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedModification {
    pub file_path: String,
    /// Empty when the model proposes a new file.
    pub old_code: String,
    pub new_code: String,
    pub diff: Vec<DiffLine>,
    /// `diff` rendered as escaped HTML spans.
    pub highlighted_diff: String,
}

/// Preview document kept at `proposed_modifications/{query_id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationPreview {
    pub session_id: String,
    pub query_id: String,
    pub created_at: DateTime<Utc>,
    pub modifications: Vec<ProposedModification>,
    pub llm_response: String,
    pub response_time: f64,
}

/// One accepted change handed to apply; the code may have been edited after preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub file_path: String,
    pub new_code: String,
}

impl From<&ProposedModification> for ModificationRequest {
    fn from(proposed: &ProposedModification) -> Self {
        Self {
            file_path: proposed.file_path.clone(),
            new_code: proposed.new_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file_path: String,
    pub status: FileStatus,
    pub message: String,
}

impl FileOutcome {
    pub fn success(file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            status: FileStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            status: FileStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Success
    }
}

/// Append-only record of one apply. `timestamp` also names the backups it took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationHistoryEntry {
    pub id: String,
    pub query_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub files_modified: Vec<FileOutcome>,
    pub llm_response: String,
    pub response_time: f64,
    pub client: String,
}

impl ModificationHistoryEntry {
    pub fn success_count(&self) -> usize {
        self.files_modified.iter().filter(|o| o.is_success()).count()
    }

    pub fn error_count(&self) -> usize {
        self.files_modified.len() - self.success_count()
    }
}
