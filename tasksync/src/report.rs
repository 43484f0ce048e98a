//! Outcome of a sync cycle.

use serde::Serialize;

use crate::error::{SyncError, SyncErrorKind};

/// The pass a per-record outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncOp {
    Delete,
    Push,
    Pull,
}

impl std::fmt::Display for SyncOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncOp::Delete => "delete",
            SyncOp::Push => "push",
            SyncOp::Pull => "pull",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub id: String,
    pub op: SyncOp,
    pub kind: SyncErrorKind,
    pub message: String,
}

/// Per-cycle tally. Per-record failures end up here instead of aborting the
/// batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records pushed or deleted remotely.
    pub succeeded: usize,
    pub failed: usize,
    /// Remote documents applied locally.
    pub pulled: usize,
    /// Synced rows dropped because their document is gone remotely.
    pub removed: usize,
    pub messages: Vec<String>,
    pub failures: Vec<RecordFailure>,
}

impl SyncReport {
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, id: &str, op: SyncOp, err: &SyncError) {
        self.failed += 1;
        self.messages.push(format!("{op} {id}: {err}"));
        self.failures.push(RecordFailure {
            id: id.to_owned(),
            op,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.pulled += other.pulled;
        self.removed += other.removed;
        self.messages.extend(other.messages);
        self.failures.extend(other.failures);
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Nothing went through and every failure was a connectivity problem.
    /// Running the same pass later is the only useful reaction.
    pub fn is_transient_only(&self) -> bool {
        self.succeeded == 0
            && self.has_failures()
            && self
                .failures
                .iter()
                .all(|f| f.kind == SyncErrorKind::TransientNetwork)
    }

    pub fn failure_for(&self, id: &str) -> Option<&RecordFailure> {
        self.failures.iter().find(|f| f.id == id)
    }

    /// One-line summary suitable for a log line or a notification.
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} pulled, {} removed",
            self.succeeded, self.failed, self.pulled, self.removed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_lookup() {
        let mut push = SyncReport::default();
        push.record_success();
        push.record_failure(
            "t2",
            SyncOp::Push,
            &SyncError::ImageUploadFailed {
                id: "t2".into(),
                message: "offline".into(),
            },
        );
        let pull = SyncReport {
            pulled: 3,
            removed: 1,
            ..Default::default()
        };

        push.merge(pull);
        assert_eq!(push.summary(), "1 succeeded, 1 failed, 3 pulled, 1 removed");
        let failure = push.failure_for("t2").unwrap();
        assert_eq!(failure.kind, SyncErrorKind::ImageUploadFailed);
        assert_eq!(failure.op, SyncOp::Push);
        assert!(push.messages[0].starts_with("push t2"));
        assert!(!push.is_transient_only());
    }

    #[test]
    fn test_transient_only_requires_no_progress() {
        let offline = SyncError::TransientNetwork {
            operation: "document write",
            message: "offline".into(),
        };
        let mut report = SyncReport::default();
        assert!(!report.is_transient_only());

        report.record_failure("t1", SyncOp::Push, &offline);
        report.record_failure("t2", SyncOp::Delete, &offline);
        assert!(report.is_transient_only());

        report.record_success();
        assert!(!report.is_transient_only());
    }
}
