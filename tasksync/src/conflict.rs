//! Last-Write-Wins (LWW) resolution for pulled documents.
//!
//! When a remote document arrives, it is compared against the local row with
//! the same id. The row with the strictly greater `updated_at` wins. Rows the
//! user deleted locally are never brought back by a pull; the pending remote
//! delete takes care of them.
//!
//! The reverse direction is covered by [`vanished_remotely`]: a clean local
//! row whose document is missing from the user's pull result was deleted
//! elsewhere and goes away locally too.

use std::collections::HashSet;

use crate::sync_state::SyncStatus;
use crate::task::Model as Task;

/// What the pull pass does with one remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDecision {
    /// No local row: store the remote version.
    Insert,
    /// Remote is strictly newer: replace the local row.
    Overwrite,
    /// Local is as new or newer, keep it (and push it if dirty).
    KeepLocal,
    /// Local row is marked for deletion.
    SkipDeleted,
}

impl PullDecision {
    pub fn applies(self) -> bool {
        matches!(self, PullDecision::Insert | PullDecision::Overwrite)
    }
}

/// Decide how a pulled document is applied over the local state.
pub fn decide(remote: &Task, local: Option<&Task>) -> PullDecision {
    match local {
        None => PullDecision::Insert,
        Some(local) if local.deleted => PullDecision::SkipDeleted,
        Some(local) if remote.updated_at > local.updated_at => PullDecision::Overwrite,
        Some(_) => PullDecision::KeepLocal,
    }
}

/// Whether `local` should be dropped because its document is gone from the
/// remote. Only synced rows owned by `user_id` qualify; dirty rows are
/// recreated by the next push.
pub fn vanished_remotely(local: &Task, user_id: &str, remote_ids: &HashSet<String>) -> bool {
    !local.deleted
        && local.sync_status == SyncStatus::Synced
        && local.created_by.as_deref() == Some(user_id)
        && !remote_ids.contains(&local.id)
}
