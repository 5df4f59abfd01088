//! Turning query recommendations into reviewed file changes.
//!
//! A session moves `prepared -> generated -> applied`, or to `cancelled` from
//! either live state. Its artifact lives under `temp_mods/` until it reaches a
//! terminal state, so any process can pick it up by id.

mod apply;
pub mod diff;
pub mod parser;
pub mod paths;
mod session;
mod types;

pub use apply::backup_file_name;
pub use types::{
    FileOutcome, FileStatus, ModificationHistoryEntry, ModificationPreview, ModificationRequest,
    PreparedSession, ProposedModification, SessionArtifact, SessionPointer, SessionState,
};

use crate::project_manager::ProjectContext;

pub struct ModificationHandler<'a> {
    ctx: &'a ProjectContext,
}

impl<'a> ModificationHandler<'a> {
    pub fn new(ctx: &'a ProjectContext) -> Self {
        Self { ctx }
    }
}
