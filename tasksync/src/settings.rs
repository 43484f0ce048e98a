//! Persisted sync parameters.
//!
//! The `_tasksync_settings` table is a small key/value table living next to
//! `task_table` in the same database. It holds the values the scheduler hands
//! to the chained and periodic jobs:
//! - `LAST_SYNC_TIME`: epoch millis of the last successful pull (default `0`)
//! - `CURRENT_USER_ID`: the user whose documents are pulled (default `"Unknown"`)
//!
//! The table is created automatically by [`TaskSyncBuilder::build()`](crate::TaskSyncBuilder::build).

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, ExecResult, FromQueryResult,
    Statement,
};

use crate::sync_state::now_millis;

pub const LAST_SYNC_TIME: &str = "LAST_SYNC_TIME";
pub const CURRENT_USER_ID: &str = "CURRENT_USER_ID";
pub const UNKNOWN_USER: &str = "Unknown";

/// Create the `_tasksync_settings` table if it does not already exist.
pub async fn create_settings_table(db: &impl ConnectionTrait) -> Result<ExecResult, DbErr> {
    db.execute_unprepared(
        "CREATE TABLE IF NOT EXISTS _tasksync_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .await
}

#[derive(Debug, FromQueryResult)]
struct SettingRow {
    value: String,
}

/// Handle on the settings table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Settings {
    db: DatabaseConnection,
}

impl Settings {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, DbErr> {
        let row = SettingRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT value FROM _tasksync_settings WHERE key = $1",
            [key.into()],
        ))
        .one(&self.db)
        .await?;
        Ok(row.map(|r| r.value))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), DbErr> {
        self.db
            .execute_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "INSERT OR REPLACE INTO _tasksync_settings (key, value, updated_at) VALUES ($1, $2, $3)",
                [key.into(), value.into(), now_millis().into()],
            ))
            .await?;
        Ok(())
    }

    pub async fn last_sync_time(&self) -> Result<i64, DbErr> {
        Ok(self
            .get(LAST_SYNC_TIME)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    pub async fn set_last_sync_time(&self, millis: i64) -> Result<(), DbErr> {
        self.set(LAST_SYNC_TIME, &millis.to_string()).await
    }

    pub async fn current_user_id(&self) -> Result<String, DbErr> {
        Ok(self
            .get(CURRENT_USER_ID)
            .await?
            .unwrap_or_else(|| UNKNOWN_USER.to_owned()))
    }

    pub async fn set_current_user_id(&self, user_id: &str) -> Result<(), DbErr> {
        self.set(CURRENT_USER_ID, user_id).await
    }

    /// Store both scheduler parameters.
    pub async fn save_sync_params(&self, last_sync_time: i64, user_id: &str) -> Result<(), DbErr> {
        self.set_last_sync_time(last_sync_time).await?;
        self.set_current_user_id(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectOptions, Database};

    async fn settings() -> Settings {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1);
        let db = Database::connect(opts).await.unwrap();
        create_settings_table(&db).await.unwrap();
        Settings::new(db)
    }

    #[tokio::test]
    async fn test_defaults_when_unset() {
        let settings = settings().await;
        assert_eq!(settings.last_sync_time().await.unwrap(), 0);
        assert_eq!(settings.current_user_id().await.unwrap(), UNKNOWN_USER);
    }

    #[tokio::test]
    async fn test_save_sync_params_overwrites() {
        let settings = settings().await;
        settings.save_sync_params(10, "alice").await.unwrap();
        settings.save_sync_params(20, "bob").await.unwrap();
        assert_eq!(settings.last_sync_time().await.unwrap(), 20);
        assert_eq!(settings.current_user_id().await.unwrap(), "bob");
    }

    #[derive(Debug, FromQueryResult)]
    struct StampRow {
        updated_at: i64,
    }

    #[tokio::test]
    async fn test_rows_are_stamped_in_millis() {
        let settings = settings().await;
        let before = now_millis();
        settings.set_current_user_id("alice").await.unwrap();

        let row = StampRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT updated_at FROM _tasksync_settings WHERE key = $1",
            [CURRENT_USER_ID.into()],
        ))
        .one(&settings.db)
        .await
        .unwrap()
        .unwrap();
        assert!(row.updated_at >= before);
    }
}
