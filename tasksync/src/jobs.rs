//! Sync jobs and their registration with the [`Scheduler`].
//!
//! Push (local → remote) and pull (remote → local) are separate jobs so each
//! can be retried on its own. They are scheduled three ways:
//! - on startup, as a push → pull chain under [`CHAINED_SYNC`]
//! - periodically, as two independent schedules
//! - on demand, as a single push under [`IMMEDIATE_SYNC`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::scheduler::{
    BackoffPolicy, ExistingWorkPolicy, Job, JobEvent, JobResult, Scheduler, WorkRequest,
};
use crate::settings::Settings;

pub const CHAINED_SYNC: &str = "ChainedSync";
pub const IMMEDIATE_SYNC: &str = "ImmediateSync";
pub const PERIODIC_PUSH: &str = "PeriodicSyncLocalToRemote";
pub const PERIODIC_PULL: &str = "PeriodicSyncRemoteToLocal";

/// Runs the deletion and push passes.
pub struct PushJob {
    engine: Arc<SyncEngine>,
}

impl PushJob {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Job for PushJob {
    fn tag(&self) -> &str {
        "PushJob"
    }

    async fn run(&self, attempt: u32) -> JobResult {
        match self.engine.push().await {
            Ok(report) if report.is_transient_only() => JobResult::Retry(format!(
                "push attempt {attempt} made no progress while offline: {}",
                report.summary()
            )),
            // Other per-record failures stay in the report; the next cycle
            // picks those records up again.
            Ok(report) => JobResult::Success(report.summary()),
            Err(e) => JobResult::Retry(format!("push attempt {attempt} failed: {e}")),
        }
    }
}

/// Runs the pull pass.
pub struct PullJob {
    engine: Arc<SyncEngine>,
}

impl PullJob {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Job for PullJob {
    fn tag(&self) -> &str {
        "PullJob"
    }

    async fn run(&self, attempt: u32) -> JobResult {
        match self.engine.pull().await {
            Ok(report) => JobResult::Success(report.summary()),
            Err(e) => JobResult::Retry(format!("pull attempt {attempt} failed: {e}")),
        }
    }
}

/// Registers the sync jobs under their well-known names.
#[derive(Clone)]
pub struct SyncScheduler {
    scheduler: Scheduler,
    engine: Arc<SyncEngine>,
    settings: Settings,
    config: Arc<SyncConfig>,
}

impl SyncScheduler {
    pub fn new(
        scheduler: Scheduler,
        engine: Arc<SyncEngine>,
        settings: Settings,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            scheduler,
            engine,
            settings,
            config,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.scheduler.subscribe()
    }

    fn request(&self, job: Arc<dyn Job>) -> WorkRequest {
        WorkRequest::new(job)
            .with_network_required()
            .with_backoff(BackoffPolicy::Exponential, self.config.backoff_base())
            .with_max_attempts(self.config.max_attempts)
    }

    fn push_request(&self) -> WorkRequest {
        self.request(Arc::new(PushJob::new(self.engine.clone())))
    }

    fn pull_request(&self) -> WorkRequest {
        self.request(Arc::new(PullJob::new(self.engine.clone())))
    }

    /// Store the sync parameters and run push, then pull, replacing any
    /// startup chain still pending.
    pub async fn chain_sync_on_startup(&self, last_sync_time: i64, user_id: &str) -> SyncResult<()> {
        self.settings
            .save_sync_params(last_sync_time, user_id)
            .await?;
        self.scheduler
            .enqueue_unique_chain(
                CHAINED_SYNC,
                ExistingWorkPolicy::Replace,
                vec![self.push_request(), self.pull_request()],
            )
            .await;
        log::info!("Scheduled startup sync for user {user_id}");
        Ok(())
    }

    /// Register periodic push and pull. Existing schedules are kept.
    pub async fn schedule_periodic_sync(&self, interval: Duration, user_id: &str) -> SyncResult<()> {
        self.settings.set_current_user_id(user_id).await?;
        let push = self
            .scheduler
            .enqueue_unique_periodic(
                PERIODIC_PUSH,
                ExistingWorkPolicy::Keep,
                self.push_request(),
                interval,
            )
            .await;
        let pull = self
            .scheduler
            .enqueue_unique_periodic(
                PERIODIC_PULL,
                ExistingWorkPolicy::Keep,
                self.pull_request(),
                interval,
            )
            .await;
        log::info!("Periodic sync every {interval:?} (push new: {push}, pull new: {pull})");
        Ok(())
    }

    /// Push as soon as the network allows, replacing a pending request.
    pub async fn immediate_sync(&self) {
        self.scheduler
            .enqueue_unique(
                IMMEDIATE_SYNC,
                ExistingWorkPolicy::Replace,
                self.push_request(),
            )
            .await;
    }

    pub async fn cancel_all(&self) {
        self.scheduler.cancel_all().await;
    }
}
