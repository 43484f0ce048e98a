//! Named background work on top of tokio.
//!
//! [`Scheduler`] runs [`Job`]s as tokio tasks keyed by a unique name, so at
//! most one instance of each named piece of work exists at a time. It
//! supports:
//! - one-time work ([`Scheduler::enqueue_unique`])
//! - chains where step N+1 only starts after step N succeeded
//!   ([`Scheduler::enqueue_unique_chain`])
//! - periodic work ([`Scheduler::enqueue_unique_periodic`])
//!
//! Every request carries [`Constraints`], checked against a [`Connectivity`]
//! before each attempt, and a [`Backoff`] applied when the job asks to be
//! retried. Terminal outcomes are broadcast as [`JobEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

/// Upper bound on any single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);

/// What a job asks the scheduler to do after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success(String),
    /// Run again after the backoff delay.
    Retry(String),
    Failure(String),
}

#[async_trait]
pub trait Job: Send + Sync {
    /// Short label used in logs and events.
    fn tag(&self) -> &str;

    /// Run one attempt. `attempt` starts at 1.
    async fn run(&self, attempt: u32) -> JobResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub policy: BackoffPolicy,
    pub base: Duration,
    /// Attempts before the job is considered failed. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::Exponential,
            base: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Delay before the attempt following attempt number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.policy {
            BackoffPolicy::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                self.base.checked_mul(factor)
            }
            BackoffPolicy::Linear => self.base.checked_mul(attempt),
        };
        delay.unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraints {
    pub requires_network: bool,
}

/// Answers whether the device can currently reach the network.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity toggled by the host application.
#[derive(Debug)]
pub struct NetworkFlag(AtomicBool);

impl NetworkFlag {
    pub fn new(online: bool) -> Self {
        Self(AtomicBool::new(online))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Connectivity for NetworkFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A job plus the conditions it runs under.
#[derive(Clone)]
pub struct WorkRequest {
    job: Arc<dyn Job>,
    constraints: Constraints,
    backoff: Backoff,
}

impl WorkRequest {
    pub fn new(job: Arc<dyn Job>) -> Self {
        Self {
            job,
            constraints: Constraints::default(),
            backoff: Backoff::default(),
        }
    }

    pub fn with_network_required(mut self) -> Self {
        self.constraints.requires_network = true;
        self
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy, base: Duration) -> Self {
        self.backoff.policy = policy;
        self.backoff.base = base;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.backoff.max_attempts = max_attempts;
        self
    }

    pub fn tag(&self) -> &str {
        self.job.tag()
    }

    pub fn constraints(&self) -> Constraints {
        self.constraints
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }
}

/// What to do when work with the same unique name is already scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Cancel the existing work and schedule the new request.
    Replace,
    /// Leave the existing work alone and drop the new request.
    Keep,
}

pub type ExistingPeriodicWorkPolicy = ExistingWorkPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Succeeded,
    Failed,
    Cancelled,
}

/// Terminal outcome of one job, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEvent {
    /// Unique work name the job ran under.
    pub name: String,
    pub tag: String,
    pub state: JobState,
    pub message: String,
}

struct WorkHandle {
    id: u64,
    tag: String,
    handle: JoinHandle<()>,
}

struct Inner {
    work: Mutex<HashMap<String, WorkHandle>>,
    next_id: AtomicU64,
    events: broadcast::Sender<JobEvent>,
    connectivity: Arc<dyn Connectivity>,
    constraint_poll: Duration,
}

impl Inner {
    fn emit(&self, name: &str, tag: &str, state: JobState, message: impl Into<String>) {
        let _ = self.events.send(JobEvent {
            name: name.to_owned(),
            tag: tag.to_owned(),
            state,
            message: message.into(),
        });
    }

    async fn wait_for_constraints(&self, constraints: Constraints) {
        while constraints.requires_network && !self.connectivity.is_online() {
            tokio::time::sleep(self.constraint_poll).await;
        }
    }

    /// Run one request until it succeeds, fails or runs out of attempts.
    async fn run_request(&self, name: &str, request: &WorkRequest) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            self.wait_for_constraints(request.constraints).await;
            attempt += 1;
            log::debug!("Running {} ({name}), attempt {attempt}", request.tag());
            match request.job.run(attempt).await {
                JobResult::Success(message) => return Ok(message),
                JobResult::Failure(message) => return Err(message),
                JobResult::Retry(message) => {
                    if request.backoff.exhausted(attempt) {
                        return Err(format!("gave up after {attempt} attempts: {message}"));
                    }
                    let delay = request.backoff.delay_for(attempt);
                    log::info!(
                        "{} ({name}) asked for retry: {message}; next attempt in {delay:?}",
                        request.tag()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn run_chain(&self, name: &str, requests: &[WorkRequest]) {
        for (step, request) in requests.iter().enumerate() {
            match self.run_request(name, request).await {
                Ok(message) => {
                    log::info!("{} ({name}) succeeded: {message}", request.tag());
                    self.emit(name, request.tag(), JobState::Succeeded, message);
                }
                Err(message) => {
                    log::warn!("{} ({name}) failed: {message}", request.tag());
                    self.emit(name, request.tag(), JobState::Failed, message);
                    for skipped in &requests[step + 1..] {
                        self.emit(
                            name,
                            skipped.tag(),
                            JobState::Cancelled,
                            format!("{} failed earlier in the chain", request.tag()),
                        );
                    }
                    return;
                }
            }
        }
    }

    async fn run_periodic(&self, name: &str, request: &WorkRequest, interval: Duration) {
        loop {
            match self.run_request(name, request).await {
                Ok(message) => self.emit(name, request.tag(), JobState::Succeeded, message),
                Err(message) => {
                    log::warn!("{} ({name}) failed: {message}", request.tag());
                    self.emit(name, request.tag(), JobState::Failed, message);
                }
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Forget `name` once its task is done, unless it was replaced meanwhile.
    async fn finish(&self, name: &str, id: u64) {
        let mut work = self.work.lock().await;
        if work.get(name).is_some_and(|w| w.id == id) {
            work.remove(name);
        }
    }
}

/// Runs named jobs as tokio tasks. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(connectivity: Arc<dyn Connectivity>, constraint_poll: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                work: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events,
                connectivity,
                constraint_poll,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Schedule one-time work. Returns `false` when `Keep` dropped the request.
    pub async fn enqueue_unique(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        request: WorkRequest,
    ) -> bool {
        self.enqueue_unique_chain(name, policy, vec![request]).await
    }

    /// Schedule `requests` to run one after the other under one name.
    pub async fn enqueue_unique_chain(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        requests: Vec<WorkRequest>,
    ) -> bool {
        let Some(first) = requests.first() else {
            return false;
        };
        let tag = first.tag().to_owned();
        let inner = self.inner.clone();
        let owned_name = name.to_owned();
        self.spawn_unique(name, policy, tag, move |id| async move {
            inner.run_chain(&owned_name, &requests).await;
            inner.finish(&owned_name, id).await;
        })
        .await
    }

    /// Schedule `request` to run now and then every `interval`.
    pub async fn enqueue_unique_periodic(
        &self,
        name: &str,
        policy: ExistingPeriodicWorkPolicy,
        request: WorkRequest,
        interval: Duration,
    ) -> bool {
        let tag = request.tag().to_owned();
        let inner = self.inner.clone();
        let owned_name = name.to_owned();
        self.spawn_unique(name, policy, tag, move |_| async move {
            inner.run_periodic(&owned_name, &request, interval).await;
        })
        .await
    }

    async fn spawn_unique<F, Fut>(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        tag: String,
        task: F,
    ) -> bool
    where
        F: FnOnce(u64) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut work = self.inner.work.lock().await;
        let running = work.get(name).is_some_and(|w| !w.handle.is_finished());
        if running {
            match policy {
                ExistingWorkPolicy::Keep => {
                    log::debug!("Keeping existing work {name}");
                    return false;
                }
                ExistingWorkPolicy::Replace => {
                    if let Some(old) = work.remove(name) {
                        self.stop(name, old, "replaced").await;
                    }
                }
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(task(id));
        work.insert(name.to_owned(), WorkHandle { id, tag, handle });
        true
    }

    async fn stop(&self, name: &str, old: WorkHandle, reason: &str) {
        old.handle.abort();
        if old.handle.await.is_err() {
            log::info!("Cancelled {name} ({reason})");
            self.inner
                .emit(name, &old.tag, JobState::Cancelled, reason.to_owned());
        }
    }

    /// Cancel the work scheduled under `name`. Returns whether there was any.
    pub async fn cancel_unique(&self, name: &str) -> bool {
        let old = self.inner.work.lock().await.remove(name);
        match old {
            Some(old) => {
                self.stop(name, old, "cancelled").await;
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        let drained: Vec<(String, WorkHandle)> = self.inner.work.lock().await.drain().collect();
        for (name, old) in drained {
            self.stop(&name, old, "cancelled").await;
        }
    }

    /// Whether work under `name` is pending or running.
    pub async fn is_scheduled(&self, name: &str) -> bool {
        self.inner
            .work
            .lock()
            .await
            .get(name)
            .is_some_and(|w| !w.handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(1), Duration::from_secs(30));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(120));
        assert_eq!(backoff.delay_for(40), MAX_BACKOFF);
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = Backoff {
            policy: BackoffPolicy::Linear,
            base: Duration::from_secs(10),
            max_attempts: Some(3),
        };
        assert_eq!(backoff.delay_for(3), Duration::from_secs(30));
        assert!(!backoff.exhausted(2));
        assert!(backoff.exhausted(3));
    }

    struct Counting {
        runs: AtomicU32,
        fail_until: u32,
    }

    #[async_trait]
    impl Job for Counting {
        fn tag(&self) -> &str {
            "Counting"
        }

        async fn run(&self, attempt: u32) -> JobResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_until {
                JobResult::Retry(format!("attempt {attempt}"))
            } else {
                JobResult::Success("done".into())
            }
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let scheduler = Scheduler::new(Arc::new(AlwaysOnline), Duration::from_millis(5));
        let mut events = scheduler.subscribe();
        let job = Arc::new(Counting {
            runs: AtomicU32::new(0),
            fail_until: 3,
        });
        let request = WorkRequest::new(job.clone())
            .with_backoff(BackoffPolicy::Linear, Duration::from_millis(5));

        assert!(
            scheduler
                .enqueue_unique("work", ExistingWorkPolicy::Replace, request)
                .await
        );
        let event = events.recv().await.unwrap();
        assert_eq!(event.state, JobState::Succeeded);
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_bounded_attempts_fail() {
        let scheduler = Scheduler::new(Arc::new(AlwaysOnline), Duration::from_millis(5));
        let mut events = scheduler.subscribe();
        let job = Arc::new(Counting {
            runs: AtomicU32::new(0),
            fail_until: u32::MAX,
        });
        let request = WorkRequest::new(job.clone())
            .with_backoff(BackoffPolicy::Exponential, Duration::from_millis(1))
            .with_max_attempts(Some(2));

        scheduler
            .enqueue_unique("work", ExistingWorkPolicy::Keep, request)
            .await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.state, JobState::Failed);
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }
}
