//! Per-record synchronization state.
//!
//! Every task row carries a [`SyncStatus`] and an orthogonal soft-delete flag.
//! The transitions are:
//!
//! - create → [`SyncStatus::NotSynced`]
//! - local mutation of a [`SyncStatus::Synced`] row → [`SyncStatus::Updated`]
//! - successful push → [`SyncStatus::Synced`]
//! - failed push → unchanged
//! - soft delete → `deleted = true`, status unchanged
//!
//! A row never moves from `Synced` back to `NotSynced`; only an explicit local
//! mutation makes a synced row dirty again. Rows are independent of each other,
//! so no cross-record locking is ever needed to apply a transition.

use std::time::{SystemTime, UNIX_EPOCH};

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sync state of a single task row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Created locally and never pushed.
    #[sea_orm(string_value = "NOT_SYNCED")]
    NotSynced,
    /// Pushed at least once, changed locally since.
    #[sea_orm(string_value = "UPDATED")]
    Updated,
    /// Local and remote agree.
    #[sea_orm(string_value = "SYNCED")]
    Synced,
}

impl SyncStatus {
    /// Statuses that make a row eligible for the push pass.
    pub const DIRTY: [SyncStatus; 2] = [SyncStatus::NotSynced, SyncStatus::Updated];

    pub fn is_dirty(self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }

    /// Status after a local field mutation.
    ///
    /// A row that was never pushed stays `NotSynced`: the remote has no copy
    /// to update, so the next push must still create it.
    pub fn after_local_mutation(self) -> SyncStatus {
        match self {
            SyncStatus::NotSynced => SyncStatus::NotSynced,
            SyncStatus::Updated | SyncStatus::Synced => SyncStatus::Updated,
        }
    }

    /// Status after the remote acknowledged a create or update.
    pub fn after_push_success(self) -> SyncStatus {
        SyncStatus::Synced
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "NOT_SYNCED",
            SyncStatus::Updated => "UPDATED",
            SyncStatus::Synced => "SYNCED",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Next `updatedAt` for a row last stamped at `previous`.
///
/// Keeps the per-row timestamp strictly increasing even when the clock stalls
/// or steps backwards, so last-write-wins comparisons stay meaningful.
pub fn next_updated_at(previous: i64, now: i64) -> i64 {
    now.max(previous.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_of_synced_row_marks_updated() {
        assert_eq!(SyncStatus::Synced.after_local_mutation(), SyncStatus::Updated);
        assert_eq!(SyncStatus::Updated.after_local_mutation(), SyncStatus::Updated);
    }

    #[test]
    fn test_mutation_never_regresses_to_not_synced() {
        for status in [SyncStatus::Synced, SyncStatus::Updated] {
            assert_ne!(status.after_local_mutation(), SyncStatus::NotSynced);
        }
    }

    #[test]
    fn test_unpushed_row_stays_not_synced() {
        assert_eq!(
            SyncStatus::NotSynced.after_local_mutation(),
            SyncStatus::NotSynced
        );
    }

    #[test]
    fn test_push_success_always_synced() {
        for status in SyncStatus::DIRTY {
            assert_eq!(status.after_push_success(), SyncStatus::Synced);
        }
    }

    #[test]
    fn test_dirty_set() {
        assert!(SyncStatus::NotSynced.is_dirty());
        assert!(SyncStatus::Updated.is_dirty());
        assert!(!SyncStatus::Synced.is_dirty());
    }

    #[test]
    fn test_updated_at_is_monotonic() {
        assert_eq!(next_updated_at(100, 200), 200);
        assert_eq!(next_updated_at(200, 200), 201);
        assert_eq!(next_updated_at(300, 200), 301);
    }
}
