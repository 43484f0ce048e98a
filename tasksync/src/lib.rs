//! # tasksync
//!
//! Offline-first synchronization of task records between a local SQLite
//! store and a remote document store, with task images kept in a blob store.
//!
//! Tasks are edited locally through [`TaskRepository`]; every edit marks the
//! row dirty. [`SyncEngine::reconcile`] then pushes soft-deleted and dirty
//! rows out (uploading images first and cleaning up after failed writes) and
//! pulls the current user's documents back in, resolving conflicts with
//! last-write-wins on `updated_at`. [`SyncScheduler`] runs push and pull as
//! retryable background jobs: chained on startup, periodically, or on demand.
//!
//! ## Quick start
//!
//! ```ignore
//! use tasksync::{NewTask, TaskSyncBuilder};
//!
//! let sync = TaskSyncBuilder::new("sqlite:./tasks.db?mode=rwc")
//!     .build()
//!     .await?;
//!
//! sync.repository().create(NewTask::titled("Call grandma")).await?;
//! sync.on_app_start("user-42").await?;
//!
//! // Or run a cycle directly
//! let report = sync.reconcile().await?;
//! println!("{}", report.summary());
//! ```
//!
//! ## Key types
//!
//! - [`TaskSync`]: the assembled core, built by [`TaskSyncBuilder`]
//! - [`Task`]: a task row (the SeaORM `task_table` model)
//! - [`SyncStatus`]: per-row sync state
//! - [`RecordStore`], [`RemoteStore`], [`BlobStore`]: the storage seams
//! - [`SyncReport`]: per-cycle outcome, including per-record failures
//! - [`JobEvent`]: terminal outcome of a scheduled job

pub mod blob;
pub mod config;
pub mod conflict;
pub mod connection;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod remote;
pub mod report;
pub mod repository;
pub mod resize;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod sync_state;
pub mod task;
pub mod upload;

pub use blob::{
    BlobError, BlobStore, DownloadRef, FsImageSource, ImageSource, MemoryBlobStore, MemoryImageSource,
};
pub use config::SyncConfig;
pub use connection::{TaskSync, TaskSyncBuilder};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncErrorKind, SyncResult};
pub use jobs::{PullJob, PushJob, SyncScheduler};
pub use remote::{Document, Fields, MemoryRemoteStore, RemoteError, RemoteStore};
pub use report::{RecordFailure, SyncOp, SyncReport};
pub use repository::{NewTask, TaskRepository};
pub use scheduler::{
    AlwaysOnline, Backoff, BackoffPolicy, Connectivity, ExistingPeriodicWorkPolicy,
    ExistingWorkPolicy, Job, JobEvent, JobResult, JobState, NetworkFlag, Scheduler, WorkRequest,
};
pub use settings::Settings;
pub use store::{RecordStore, SqliteRecordStore};
pub use sync_state::SyncStatus;
pub use task::Model as Task;

// Re-export sea-orm for users of the library
pub use sea_orm;
