//! The reconcile cycle: deletion pass, push pass, pull pass.
//!
//! ```text
//!  query_deleted ──► delete blob ──► delete remote doc ──► delete row ──► clear back-references
//!                                                          │
//!  query_by_status(NOT_SYNCED, UPDATED) ◄──────────────────┘
//!        │
//!        └──► upload image ──► exists? update : set ──► mark SYNCED (if unchanged since snapshot)
//!
//!  query_by_field(createdBy == user) ──► LWW decide ──► upsert SYNCED
//!        │
//!        └──► synced rows missing remotely ──► confirm gone ──► delete row ──► store last sync time
//! ```
//!
//! Records are independent. Within a pass they fan out under
//! [`SyncConfig::max_concurrency`] and are joined before the next pass
//! starts. A failing record is written to the [`SyncReport`] and the batch
//! carries on; only a pass that cannot start at all returns `Err`.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::config::SyncConfig;
use crate::conflict::{PullDecision, decide, vanished_remotely};
use crate::error::{SyncError, SyncResult};
use crate::remote::{Document, RemoteStore};
use crate::report::{SyncOp, SyncReport};
use crate::settings::Settings;
use crate::store::RecordStore;
use crate::sync_state::{SyncStatus, now_millis};
use crate::task::Model as Task;
use crate::upload::UploadPipeline;

/// Remote field the pull query filters on.
pub const CREATED_BY_FIELD: &str = "createdBy";

pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteStore>,
    uploads: UploadPipeline,
    settings: Settings,
    config: Arc<SyncConfig>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteStore>,
        uploads: UploadPipeline,
        settings: Settings,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            store,
            remote,
            uploads,
            settings,
            config,
        }
    }

    /// Push local changes, then pull remote ones.
    pub async fn reconcile(&self) -> SyncResult<SyncReport> {
        let mut report = self.push().await?;
        report.merge(self.pull().await?);
        log::info!("Reconcile finished: {}", report.summary());
        Ok(report)
    }

    /// Deletion pass followed by the push pass.
    pub async fn push(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        self.deletion_pass(&mut report).await?;
        self.push_pass(&mut report).await?;
        log::info!("Push finished: {}", report.summary());
        Ok(report)
    }

    async fn deletion_pass(&self, report: &mut SyncReport) -> SyncResult<()> {
        let deleted = self.store.query_deleted().await?;
        if deleted.is_empty() {
            return Ok(());
        }
        log::debug!("Deleting {} task(s) remotely", deleted.len());

        let outcomes: Vec<(String, SyncResult<()>)> = stream::iter(deleted)
            .map(|task| async move {
                let outcome = self.delete_one(&task).await;
                (task.id, outcome)
            })
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        let mut removed = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    report.record_success();
                    removed.push(id);
                }
                Err(e) => {
                    log::warn!("Failed to delete task {id}: {e}");
                    report.record_failure(&id, SyncOp::Delete, &e);
                }
            }
        }

        for id in removed {
            if let Err(e) = self.clear_references(&id).await {
                log::warn!("Failed to clear references to deleted task {id}: {e}");
                report.record_failure(&id, SyncOp::Delete, &e);
            }
        }
        Ok(())
    }

    async fn delete_one(&self, task: &Task) -> SyncResult<()> {
        match self.uploads.remove_blob(&task.id).await {
            Ok(()) | Err(SyncError::BlobNotFound(_)) => {}
            Err(e) => log::warn!("Failed to delete image of task {}: {e}", task.id),
        }
        self.remote
            .delete(&self.config.collection, &task.id)
            .await
            .map_err(|e| SyncError::from_delete(&task.id, e))?;
        self.store.delete(task).await?;
        log::debug!("Deleted task {}", task.id);
        Ok(())
    }

    /// Drop parent and spouse links pointing at a task that no longer exists.
    async fn clear_references(&self, deleted_id: &str) -> SyncResult<()> {
        for mut task in self.store.query_by_reference(deleted_id).await? {
            if task.parent_ref.as_deref() == Some(deleted_id) {
                task.parent_ref = None;
            }
            if task.spouse_ref.as_deref() == Some(deleted_id) {
                task.spouse_ref = None;
            }
            task.touch();
            self.store.upsert(task).await?;
        }
        Ok(())
    }

    async fn push_pass(&self, report: &mut SyncReport) -> SyncResult<()> {
        let dirty = self.store.query_by_status(&SyncStatus::DIRTY).await?;
        if dirty.is_empty() {
            return Ok(());
        }
        log::debug!("Pushing {} dirty task(s)", dirty.len());

        let outcomes: Vec<(String, SyncResult<()>)> = stream::iter(dirty)
            .map(|task| async move {
                let outcome = self.push_one(&task).await;
                (task.id, outcome)
            })
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.record_success(),
                Err(e) => {
                    log::warn!("Failed to push task {id}: {e}");
                    report.record_failure(&id, SyncOp::Push, &e);
                }
            }
        }
        Ok(())
    }

    async fn push_one(&self, snapshot: &Task) -> SyncResult<()> {
        let collection = self.config.collection.as_str();
        let remote = &self.remote;
        let written = self
            .uploads
            .push_with(snapshot, |resolved| async move {
                let fields = resolved.to_fields();
                if remote.exists(collection, &resolved.id).await? {
                    remote.update(collection, &resolved.id, fields).await
                } else {
                    remote.set(collection, &resolved.id, fields).await
                }
            })
            .await?;
        self.mark_synced(snapshot, written).await
    }

    /// Persist the outcome of a successful push.
    ///
    /// The row is re-read first. If it was edited while the push was in
    /// flight its `updated_at` no longer matches the snapshot, and it stays
    /// dirty so the newer edit goes out next cycle.
    async fn mark_synced(&self, snapshot: &Task, written: Task) -> SyncResult<()> {
        let Some(mut current) = self.store.get(&snapshot.id).await? else {
            log::debug!("Task {} vanished during push", snapshot.id);
            return Ok(());
        };
        if current.image_ref == snapshot.image_ref {
            current.image_ref = written.image_ref;
        }
        if current.updated_at == snapshot.updated_at {
            current.sync_status = current.sync_status.after_push_success();
        } else {
            log::debug!("Task {} changed during push, leaving it dirty", snapshot.id);
        }
        self.store.upsert(current).await?;
        Ok(())
    }

    /// Bring the current user's remote documents into the local store.
    pub async fn pull(&self) -> SyncResult<SyncReport> {
        let started = now_millis();
        let user_id = self.settings.current_user_id().await?;
        let documents = self
            .remote
            .query_by_field(
                &self.config.collection,
                CREATED_BY_FIELD,
                &Value::from(user_id.as_str()),
            )
            .await
            .map_err(|e| SyncError::from_remote("pull query", e))?;
        log::debug!("Pulled {} document(s) for user {user_id}", documents.len());
        let remote_ids: HashSet<String> = documents.iter().map(|doc| doc.id.clone()).collect();

        let outcomes: Vec<(String, SyncResult<PullDecision>)> = stream::iter(documents)
            .map(|doc| async move {
                let id = doc.id.clone();
                (id, self.apply_remote(doc).await)
            })
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(decision) if decision.applies() => report.pulled += 1,
                Ok(decision) => log::debug!("Kept local task {id} ({decision:?})"),
                Err(e) => {
                    log::warn!("Failed to apply remote task {id}: {e}");
                    report.record_failure(&id, SyncOp::Pull, &e);
                }
            }
        }

        self.remove_vanished(&user_id, &remote_ids, &mut report).await?;

        self.settings.set_last_sync_time(started).await?;
        log::info!("Pull finished: {}", report.summary());
        Ok(report)
    }

    async fn apply_remote(&self, doc: Document) -> SyncResult<PullDecision> {
        let remote = Task::from_fields(&doc.id, &doc.fields)?;
        let local = self.store.get(&doc.id).await?;
        let decision = decide(&remote, local.as_ref());
        if decision.applies() {
            self.store.upsert(remote).await?;
        }
        Ok(decision)
    }

    /// Delete synced rows of `user_id` whose document was removed remotely.
    ///
    /// Each candidate is checked with `exists` first, so a row pushed by a
    /// concurrent job after the pull query ran is left alone.
    async fn remove_vanished(
        &self,
        user_id: &str,
        remote_ids: &HashSet<String>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let candidates: Vec<Task> = self
            .store
            .query_by_status(&[SyncStatus::Synced])
            .await?
            .into_iter()
            .filter(|task| vanished_remotely(task, user_id, remote_ids))
            .collect();

        for task in candidates {
            match self.remote.exists(&self.config.collection, &task.id).await {
                Ok(false) => {
                    self.store.delete(&task).await?;
                    report.removed += 1;
                    log::debug!("Removed task {} deleted remotely", task.id);
                }
                Ok(true) => log::debug!("Task {} reappeared remotely, keeping it", task.id),
                Err(e) => {
                    let e = SyncError::from_remote("pull existence check", e);
                    log::warn!("Failed to confirm remote deletion of task {}: {e}", task.id);
                    report.record_failure(&task.id, SyncOp::Pull, &e);
                }
            }
        }
        Ok(())
    }
}
