use std::path::PathBuf;

use thiserror::Error;

use crate::modification::{FileOutcome, SessionState};

pub type Result<T> = std::result::Result<T, PatchSightError>;

#[derive(Debug, Error)]
pub enum PatchSightError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error while {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("completion error ({client}): {message}")]
    Completion { client: String, message: String },

    #[error("unknown completion client '{0}'")]
    UnknownClient(String),

    #[error("file path '{path}' is outside project root '{project_root}'")]
    PathOutsideProject {
        path: PathBuf,
        project_root: PathBuf,
    },

    #[error("query '{0}' not found")]
    QueryNotFound(String),

    #[error("query '{0}' has no file instructions to act on")]
    NoInstructions(String),

    #[error("none of the files referenced by query '{query_id}' could be read")]
    NoReadableFiles { query_id: String },

    #[error("modification session '{0}' not found")]
    SessionNotFound(String),

    #[error("cannot {action} session '{session_id}' while it is {state}")]
    InvalidTransition {
        session_id: String,
        state: SessionState,
        action: &'static str,
    },

    #[error("could not parse code blocks from model response: {reason}")]
    ResponseParse {
        reason: String,
        raw_response: String,
    },

    #[error("model response produced no previewable file changes")]
    EmptyPreview { raw_response: String },

    #[error("no modification could be applied ({} attempted)", outcomes.len())]
    NothingApplied { outcomes: Vec<FileOutcome> },

    #[error("modification '{0}' not found")]
    ModificationNotFound(String),

    #[error("file '{file_path}' was not part of modification '{modification_id}'")]
    FileNotInModification {
        modification_id: String,
        file_path: String,
    },

    #[error("backup '{path}' does not exist")]
    BackupMissing { path: PathBuf },

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl PatchSightError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub fn completion(client: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Completion {
            client: client.into(),
            message: message.into(),
        }
    }

    /// The raw model output attached to a parse failure, kept for diagnosis.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Self::ResponseParse { raw_response, .. } | Self::EmptyPreview { raw_response } => {
                Some(raw_response)
            }
            _ => None,
        }
    }
}
