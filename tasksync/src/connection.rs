use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::sync::{broadcast, watch};

use crate::blob::{BlobStore, FsImageSource, ImageSource, MemoryBlobStore};
use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::jobs::SyncScheduler;
use crate::remote::{MemoryRemoteStore, RemoteStore};
use crate::report::SyncReport;
use crate::repository::TaskRepository;
use crate::scheduler::{AlwaysOnline, Connectivity, JobEvent, Scheduler};
use crate::settings::{Settings, create_settings_table};
use crate::store::{RecordStore, SqliteRecordStore, open};
use crate::task::Model as Task;
use crate::upload::UploadPipeline;

/// The assembled sync core: local store, repository, engine and scheduler.
///
/// Built with [`TaskSyncBuilder`]. Cheap to clone.
#[derive(Clone)]
pub struct TaskSync {
    db: DatabaseConnection,
    store: Arc<dyn RecordStore>,
    settings: Settings,
    config: Arc<SyncConfig>,
    engine: Arc<SyncEngine>,
    repository: TaskRepository,
    scheduler: SyncScheduler,
}

impl TaskSync {
    /// Get a reference to the underlying SeaORM connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Live list of visible tasks.
    pub fn tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.store.observe_all()
    }

    pub fn job_events(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    /// Run one full cycle in the calling task, bypassing the scheduler.
    pub async fn reconcile(&self) -> SyncResult<SyncReport> {
        self.engine.reconcile().await
    }

    /// Kick off the startup chain and register the periodic jobs for `user_id`.
    pub async fn on_app_start(&self, user_id: &str) -> SyncResult<()> {
        let last_sync_time = self.settings.last_sync_time().await?;
        self.scheduler
            .chain_sync_on_startup(last_sync_time, user_id)
            .await?;
        self.scheduler
            .schedule_periodic_sync(self.config.periodic_interval(), user_id)
            .await
    }

    /// Stop all scheduled work.
    pub async fn shutdown(&self) {
        self.scheduler.cancel_all().await;
    }
}

/// Builder for [`TaskSync`].
///
/// Every collaborator has an offline default: in-memory remote and blob
/// stores, images read from disk, and a network that is always up.
///
/// ```ignore
/// let sync = TaskSyncBuilder::new("sqlite:./tasks.db?mode=rwc")
///     .with_config(SyncConfig { collection: "LearnDI".into(), ..Default::default() })
///     .with_remote_store(Arc::new(my_remote))
///     .build()
///     .await?;
/// ```
pub struct TaskSyncBuilder {
    database_url: String,
    config: SyncConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    images: Option<Arc<dyn ImageSource>>,
    connectivity: Option<Arc<dyn Connectivity>>,
}

impl TaskSyncBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            database_url: url.to_string(),
            config: SyncConfig::default(),
            remote: None,
            blobs: None,
            images: None,
            connectivity: None,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_remote_store(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_image_source(mut self, images: Arc<dyn ImageSource>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub async fn build(self) -> SyncResult<TaskSync> {
        let db = open(&self.database_url).await?;
        create_settings_table(&db).await?;
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db.clone()).await?);
        let settings = Settings::new(db.clone());
        let config = Arc::new(self.config);

        let remote = self
            .remote
            .unwrap_or_else(|| Arc::new(MemoryRemoteStore::new()));
        let blobs = self
            .blobs
            .unwrap_or_else(|| Arc::new(MemoryBlobStore::default()));
        let images = self
            .images
            .unwrap_or_else(|| Arc::new(FsImageSource::new()));
        let connectivity = self.connectivity.unwrap_or_else(|| Arc::new(AlwaysOnline));

        let uploads = UploadPipeline::new(blobs, images, config.clone());
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            remote,
            uploads,
            settings.clone(),
            config.clone(),
        ));
        let repository = TaskRepository::new(store.clone(), settings.clone());
        let scheduler = SyncScheduler::new(
            Scheduler::new(connectivity, config.constraint_poll()),
            engine.clone(),
            settings.clone(),
            config.clone(),
        );

        log::info!(
            "Task sync ready on {} (collection {})",
            self.database_url,
            config.collection
        );

        Ok(TaskSync {
            db,
            store,
            settings,
            config,
            engine,
            repository,
            scheduler,
        })
    }
}
