//! Local mutation API for the task screens.
//!
//! Every mutation goes through [`Task::touch`] so the sync state and
//! `updated_at` stay consistent; nothing here talks to the network.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{SyncError, SyncResult};
use crate::settings::Settings;
use crate::store::RecordStore;
use crate::task::Model as Task;

pub const MIN_TITLE_LEN: usize = 3;

/// Input of the entry form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub town: Option<String>,
    pub short_name: Option<String>,
    pub is_alive: Option<bool>,
    pub child_number: Option<i32>,
    pub comment: Option<String>,
    pub image_ref: Option<String>,
    pub parent_ref: Option<String>,
    pub spouse_ref: Option<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

fn validate_title(title: &str) -> SyncResult<String> {
    let title = title.trim();
    if title.chars().count() < MIN_TITLE_LEN {
        return Err(SyncError::validation(
            "title",
            format!("must be at least {MIN_TITLE_LEN} characters"),
        ));
    }
    Ok(title.to_owned())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<dyn RecordStore>,
    settings: Settings,
}

impl TaskRepository {
    pub fn new(store: Arc<dyn RecordStore>, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Create a task owned by the current user. It starts `NOT_SYNCED`.
    pub async fn create(&self, input: NewTask) -> SyncResult<Task> {
        let mut task = Task::new(validate_title(&input.title)?);
        task.first_name = non_blank(input.first_name);
        task.middle_name = non_blank(input.middle_name);
        task.last_name = non_blank(input.last_name);
        task.town = non_blank(input.town);
        task.is_alive = input.is_alive.unwrap_or(true);
        task.child_number = input.child_number.or(Some(1));
        task.comment = non_blank(input.comment);
        task.image_ref = non_blank(input.image_ref);
        task.parent_ref = non_blank(input.parent_ref);
        task.spouse_ref = non_blank(input.spouse_ref);
        let short_name = non_blank(input.short_name).unwrap_or_else(|| task.derive_short_name());
        task.short_name = Some(short_name);
        task.created_by = Some(self.settings.current_user_id().await?);

        self.store.upsert(task.clone()).await?;
        log::debug!("Created task {}", task.id);
        Ok(task)
    }

    /// Save an edited task. The id must exist and must not be soft-deleted.
    pub async fn update(&self, mut task: Task) -> SyncResult<Task> {
        let existing = self.live(&task.id).await?;
        task.title = validate_title(&task.title)?;
        task.sync_status = existing.sync_status;
        task.updated_at = existing.updated_at;
        task.created_at = existing.created_at;
        task.created_by = existing.created_by;
        task.deleted = false;
        task.touch();
        self.store.upsert(task.clone()).await?;
        Ok(task)
    }

    pub async fn toggle_done(&self, id: &str) -> SyncResult<Task> {
        let mut task = self.live(id).await?;
        task.is_done = !task.is_done;
        task.touch();
        self.store.upsert(task.clone()).await?;
        Ok(task)
    }

    /// Mark a task for deletion. It disappears from [`Self::tasks`] right
    /// away and is removed for good once the remote copy is gone.
    pub async fn soft_delete(&self, id: &str) -> SyncResult<()> {
        let mut task = self.live(id).await?;
        task.soft_delete();
        self.store.upsert(task).await?;
        log::debug!("Soft-deleted task {id}");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> SyncResult<Option<Task>> {
        Ok(self.store.get(id).await?.filter(|t| !t.deleted))
    }

    /// Live list of visible tasks.
    pub fn tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.store.observe_all()
    }

    async fn live(&self, id: &str) -> SyncResult<Task> {
        self.get(id)
            .await?
            .ok_or_else(|| SyncError::TaskNotFound(id.to_owned()))
    }
}
