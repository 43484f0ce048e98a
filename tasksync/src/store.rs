//! Local record store contract and its SeaORM implementation.
//!
//! The record store is the single source of truth on the device. The engine,
//! the repository and the UI all go through [`RecordStore`]; there is no other
//! shared mutable state.

use async_trait::async_trait;
use sea_orm::sea_query::{OnConflict, SqliteQueryBuilder};
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, IntoActiveModel, Iterable, QueryFilter, QueryOrder, Schema,
    sea_query::Condition,
};
use tokio::sync::watch;

use crate::sync_state::SyncStatus;
use crate::task::{Column, Entity, Model as Task};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Non-deleted rows whose status is one of `statuses`, oldest first.
    async fn query_by_status(&self, statuses: &[SyncStatus]) -> Result<Vec<Task>, DbErr>;

    /// Rows marked for deletion, whatever their status.
    async fn query_deleted(&self) -> Result<Vec<Task>, DbErr>;

    /// Non-deleted rows whose parent or spouse reference points at `id`.
    async fn query_by_reference(&self, id: &str) -> Result<Vec<Task>, DbErr>;

    async fn get(&self, id: &str) -> Result<Option<Task>, DbErr>;

    /// Insert or fully replace the row keyed by `task.id`. Returns the id.
    async fn upsert(&self, task: Task) -> Result<String, DbErr>;

    /// Physically remove a row.
    async fn delete(&self, task: &Task) -> Result<(), DbErr>;

    /// Live view of all non-deleted rows, refreshed after every write.
    fn observe_all(&self) -> watch::Receiver<Vec<Task>>;
}

/// Create `task_table` if it does not already exist.
pub async fn create_task_table(db: &impl ConnectionTrait) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());
    let create_stmt = schema
        .create_table_from_entity(Entity)
        .if_not_exists()
        .to_owned();
    db.execute_unprepared(&create_stmt.to_string(SqliteQueryBuilder))
        .await?;
    Ok(())
}

/// [`RecordStore`] over a SQLite database.
#[derive(Debug)]
pub struct SqliteRecordStore {
    db: DatabaseConnection,
    changes: watch::Sender<Vec<Task>>,
}

impl SqliteRecordStore {
    /// Wrap an open connection, creating the table if needed.
    pub async fn new(db: DatabaseConnection) -> Result<Self, DbErr> {
        create_task_table(&db).await?;
        let current = Self::visible_rows(&db).await?;
        let (changes, _) = watch::channel(current);
        Ok(Self { db, changes })
    }

    /// Open `url` and wrap it. In-memory databases are pinned to a single
    /// pooled connection so every query sees the same data.
    pub async fn connect(url: &str) -> Result<Self, DbErr> {
        Self::new(open(url).await?).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn visible_rows(db: &DatabaseConnection) -> Result<Vec<Task>, DbErr> {
        Entity::find()
            .filter(Column::Deleted.eq(false))
            .order_by_asc(Column::CreatedAt)
            .all(db)
            .await
    }

    async fn publish(&self) -> Result<(), DbErr> {
        let rows = Self::visible_rows(&self.db).await?;
        self.changes.send_replace(rows);
        Ok(())
    }
}

/// Open a database connection the way the sync core expects it.
pub async fn open(url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(url);
    if url.contains(":memory:") {
        opts.max_connections(1).min_connections(1);
    }
    opts.sqlx_logging(false);
    Database::connect(opts).await
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn query_by_status(&self, statuses: &[SyncStatus]) -> Result<Vec<Task>, DbErr> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        Entity::find()
            .filter(Column::SyncStatus.is_in(statuses.iter().copied()))
            .filter(Column::Deleted.eq(false))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
    }

    async fn query_deleted(&self) -> Result<Vec<Task>, DbErr> {
        Entity::find()
            .filter(Column::Deleted.eq(true))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
    }

    async fn query_by_reference(&self, id: &str) -> Result<Vec<Task>, DbErr> {
        Entity::find()
            .filter(
                Condition::any()
                    .add(Column::ParentRef.eq(id))
                    .add(Column::SpouseRef.eq(id)),
            )
            .filter(Column::Deleted.eq(false))
            .all(&self.db)
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, DbErr> {
        Entity::find_by_id(id.to_owned()).one(&self.db).await
    }

    async fn upsert(&self, task: Task) -> Result<String, DbErr> {
        let id = task.id.clone();
        Entity::insert(task.into_active_model())
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns(Column::iter().filter(|c| !matches!(c, Column::Id)))
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        self.publish().await?;
        Ok(id)
    }

    async fn delete(&self, task: &Task) -> Result<(), DbErr> {
        Entity::delete_by_id(task.id.clone()).exec(&self.db).await?;
        self.publish().await
    }

    fn observe_all(&self) -> watch::Receiver<Vec<Task>> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteRecordStore {
        SqliteRecordStore::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory store")
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let store = store().await;
        let mut task = Task::with_id("t1", "First");
        store.upsert(task.clone()).await.unwrap();
        task.title = "Second".into();
        store.upsert(task).await.unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Second");
        assert_eq!(store.observe_all().borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_status_query_skips_deleted_rows() {
        let store = store().await;
        let mut gone = Task::with_id("gone", "Gone");
        gone.soft_delete();
        let mut synced = Task::with_id("synced", "Synced");
        synced.sync_status = SyncStatus::Synced;
        store.upsert(gone).await.unwrap();
        store.upsert(synced).await.unwrap();
        store.upsert(Task::with_id("fresh", "Fresh")).await.unwrap();

        let dirty = store.query_by_status(&SyncStatus::DIRTY).await.unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id, "fresh");

        let deleted = store.query_deleted().await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].id, "gone");
    }

    #[tokio::test]
    async fn test_reference_query() {
        let store = store().await;
        let mut child = Task::with_id("child", "Child");
        child.parent_ref = Some("p".into());
        let mut spouse = Task::with_id("spouse", "Spouse");
        spouse.spouse_ref = Some("p".into());
        store.upsert(child).await.unwrap();
        store.upsert(spouse).await.unwrap();
        store.upsert(Task::with_id("other", "Other")).await.unwrap();

        let mut ids: Vec<String> = store
            .query_by_reference("p")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["child", "spouse"]);
    }

    #[tokio::test]
    async fn test_observe_sees_deletes() {
        let store = store().await;
        let mut rx = store.observe_all();
        let task = Task::with_id("t1", "Watch me");
        store.upsert(task.clone()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.delete(&task).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_empty());
        assert!(store.get("t1").await.unwrap().is_none());
    }
}
