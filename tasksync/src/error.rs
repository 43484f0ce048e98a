//! Error taxonomy for the sync core.
//!
//! Store implementations report their own narrow errors ([`RemoteError`],
//! [`BlobError`]); the engine folds them into [`SyncError`] together with the
//! record id and the operation that was attempted.

use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blob::BlobError;
use crate::remote::RemoteError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("network unavailable during {operation}: {message}")]
    TransientNetwork {
        operation: &'static str,
        message: String,
    },

    #[error("image upload failed for task {id}: {message}")]
    ImageUploadFailed { id: String, message: String },

    #[error("document write failed for task {id}: {message}")]
    DocumentWriteFailed { id: String, message: String },

    #[error("blob {0} not found")]
    BlobNotFound(String),

    #[error("remote delete failed for task {id}: {message}")]
    RemoteDeleteFailed { id: String, message: String },

    #[error("remote store error during {operation}: {message}")]
    Remote {
        operation: &'static str,
        message: String,
    },

    #[error("remote document {id} is invalid: {message}")]
    InvalidDocument { id: String, message: String },

    #[error("validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("local store error: {0}")]
    LocalStore(#[from] DbErr),
}

/// Fieldless mirror of [`SyncError`], kept in reports and job events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncErrorKind {
    TransientNetwork,
    ImageUploadFailed,
    DocumentWriteFailed,
    BlobNotFound,
    RemoteDeleteFailed,
    Remote,
    InvalidDocument,
    Validation,
    TaskNotFound,
    LocalStore,
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::TransientNetwork { .. } => SyncErrorKind::TransientNetwork,
            SyncError::ImageUploadFailed { .. } => SyncErrorKind::ImageUploadFailed,
            SyncError::DocumentWriteFailed { .. } => SyncErrorKind::DocumentWriteFailed,
            SyncError::BlobNotFound(_) => SyncErrorKind::BlobNotFound,
            SyncError::RemoteDeleteFailed { .. } => SyncErrorKind::RemoteDeleteFailed,
            SyncError::Remote { .. } => SyncErrorKind::Remote,
            SyncError::InvalidDocument { .. } => SyncErrorKind::InvalidDocument,
            SyncError::Validation { .. } => SyncErrorKind::Validation,
            SyncError::TaskNotFound(_) => SyncErrorKind::TaskNotFound,
            SyncError::LocalStore(_) => SyncErrorKind::LocalStore,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork { .. })
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Map a remote failure that is not tied to a specific write or delete.
    pub(crate) fn from_remote(operation: &'static str, err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(message) => SyncError::TransientNetwork { operation, message },
            other => SyncError::Remote {
                operation,
                message: other.to_string(),
            },
        }
    }

    /// Map a failed document write for task `id` that had no upload step.
    pub(crate) fn from_write(id: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(message) => SyncError::TransientNetwork {
                operation: "document write",
                message,
            },
            other => SyncError::write_after_upload(id, other),
        }
    }

    /// Map a failed document write for task `id` whose image was already
    /// uploaded. The blob has been rolled back at this point.
    pub(crate) fn write_after_upload(id: &str, err: RemoteError) -> Self {
        SyncError::DocumentWriteFailed {
            id: id.to_owned(),
            message: err.to_string(),
        }
    }

    pub(crate) fn from_delete(id: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(message) => SyncError::TransientNetwork {
                operation: "remote delete",
                message,
            },
            other => SyncError::RemoteDeleteFailed {
                id: id.to_owned(),
                message: other.to_string(),
            },
        }
    }

    pub(crate) fn upload_failed(id: &str, err: BlobError) -> Self {
        SyncError::ImageUploadFailed {
            id: id.to_owned(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_query_is_transient() {
        let err = SyncError::from_remote("pull query", RemoteError::Unavailable("offline".into()));
        assert!(err.is_transient());
        assert_eq!(err.kind(), SyncErrorKind::TransientNetwork);
    }

    #[test]
    fn test_rejected_write_is_document_write_failure() {
        let err = SyncError::from_write("t1", RemoteError::Rejected("permission denied".into()));
        assert!(!err.is_transient());
        assert_eq!(err.kind(), SyncErrorKind::DocumentWriteFailed);
        assert!(err.to_string().contains("t1"));
    }

    #[test]
    fn test_offline_write_without_upload_is_transient() {
        let err = SyncError::from_write("t1", RemoteError::Unavailable("offline".into()));
        assert_eq!(err.kind(), SyncErrorKind::TransientNetwork);
        assert!(err.is_transient());
    }

    #[test]
    fn test_offline_write_after_upload_is_document_write_failure() {
        let err = SyncError::write_after_upload("t1", RemoteError::Unavailable("offline".into()));
        assert_eq!(err.kind(), SyncErrorKind::DocumentWriteFailed);
    }

    #[test]
    fn test_offline_delete_is_transient() {
        let offline = SyncError::from_delete("t1", RemoteError::Unavailable("offline".into()));
        assert!(offline.is_transient());
        let rejected = SyncError::from_delete("t1", RemoteError::Rejected("denied".into()));
        assert_eq!(rejected.kind(), SyncErrorKind::RemoteDeleteFailed);
    }
}
