//! Bounded job dispatcher with single-flight deduplication.
//!
//! ```text
//! caller A ─┐                                   ┌──────────────┐
//! caller B ─┼──► in-flight map ──► spawned job ─┤ ResourcePool │──► Parser
//! caller C ─┘    (RequestKey)          │        └──────────────┘
//!                     ▲                │
//!                     └── one outcome ─┘  broadcast to A, B and C
//! ```
//!
//! Every admitted job owns one entry in the in-flight map until it settles.
//! The number of entries is therefore exactly `pending + running`, and that
//! number is what admission control compares against the queue capacity.

use crate::core::pool::ResourcePool;
use crate::domain::key::RequestKey;
use crate::domain::model::{ParseResult, SourceKind};
use crate::domain::ports::Parser;
use crate::utils::error::{Result, ReviewError, ScrapeError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

type SharedOutcome = std::result::Result<Arc<ParseResult>, JobFailure>;

#[derive(Debug, Clone)]
enum JobFailure {
    Scrape(ScrapeError),
    PoolClosed,
}

impl From<JobFailure> for ReviewError {
    fn from(failure: JobFailure) -> Self {
        match failure {
            JobFailure::Scrape(e) => ReviewError::Scrape(e),
            JobFailure::PoolClosed => ReviewError::ResourcePoolClosed,
        }
    }
}

/// Called once per successful job, on the job's own task, before any caller is woken.
///
/// Runs even when every caller has gone away.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_success(&self, kind: SourceKind, url: &str, data: &ParseResult);
}

struct InFlightEntry {
    job_id: u64,
    sender: broadcast::Sender<SharedOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub slots: usize,
    pub queue_capacity: usize,
    /// Admitted jobs still waiting for a lease.
    pub pending: usize,
    /// Jobs currently inside the parser.
    pub running: usize,
    pub in_flight: usize,
    pub total_jobs: u64,
    /// Calls that attached to an already running job instead of starting one.
    pub coalesced_requests: u64,
    pub rejected_requests: u64,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    parser: Arc<dyn Parser>,
    pool: ResourcePool,
    queue_capacity: usize,
    completion_hook: OnceLock<Arc<dyn CompletionHook>>,
    in_flight: Mutex<HashMap<RequestKey, InFlightEntry>>,
    next_job_id: AtomicU64,
    pending: AtomicUsize,
    running: AtomicUsize,
    total_jobs: AtomicU64,
    coalesced: AtomicU64,
    rejected: AtomicU64,
}

impl DispatcherInner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<RequestKey, InFlightEntry>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Dispatcher {
    pub fn new(parser: Arc<dyn Parser>, pool: ResourcePool, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                parser,
                pool,
                queue_capacity,
                completion_hook: OnceLock::new(),
                in_flight: Mutex::new(HashMap::new()),
                next_job_id: AtomicU64::new(1),
                pending: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                total_jobs: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Installs the hook run after every successful job. Only the first hook is kept.
    pub fn set_completion_hook(&self, hook: Arc<dyn CompletionHook>) -> bool {
        let installed = self.inner.completion_hook.set(hook).is_ok();
        if !installed {
            warn!("Dispatcher already has a completion hook, ignoring the new one");
        }
        installed
    }

    /// Runs the parser for `(kind, url)`, or joins the run already in progress
    /// for the same request key.
    ///
    /// Fails immediately with `queue_full` when a new job would exceed the
    /// queue capacity. Dropping the returned future detaches this caller only;
    /// the job keeps running for everyone else.
    pub async fn enqueue(&self, kind: SourceKind, url: &str) -> Result<Arc<ParseResult>> {
        let key = RequestKey::derive(kind, url);
        debug!(%key, %kind, "Derived request key");

        let mut rx = self.attach_or_start(kind, url, &key)?;
        match rx.recv().await {
            Ok(outcome) => outcome.map_err(ReviewError::from),
            Err(_) => Err(ReviewError::JobAborted {
                key: key.to_string(),
            }),
        }
    }

    fn attach_or_start(
        &self,
        kind: SourceKind,
        url: &str,
        key: &RequestKey,
    ) -> Result<broadcast::Receiver<SharedOutcome>> {
        let inner = &self.inner;
        let mut in_flight = inner.in_flight();

        if let Some(entry) = in_flight.get(key) {
            inner.coalesced.fetch_add(1, Ordering::Relaxed);
            info!(%key, %kind, job_id = entry.job_id, "Request already in progress, waiting for it");
            return Ok(entry.sender.subscribe());
        }

        if in_flight.len() >= inner.queue_capacity {
            inner.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                %key,
                %kind,
                load = in_flight.len(),
                capacity = inner.queue_capacity,
                "Parser queue is full, rejecting request"
            );
            return Err(ReviewError::QueueFull);
        }

        let job_id = inner.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (sender, rx) = broadcast::channel(1);
        in_flight.insert(
            key.clone(),
            InFlightEntry {
                job_id,
                sender: sender.clone(),
            },
        );
        inner.pending.fetch_add(1, Ordering::Relaxed);
        inner.total_jobs.fetch_add(1, Ordering::Relaxed);
        info!(%key, %kind, job_id, in_flight = in_flight.len(), "Job admitted to queue");
        drop(in_flight);

        let job = Job {
            inner: Arc::clone(inner),
            key: key.clone(),
            job_id,
            kind,
            url: url.to_string(),
            sender,
            phase: Phase::Pending,
            settled: false,
        };
        tokio::spawn(job.run());

        Ok(rx)
    }

    pub fn stats(&self) -> DispatcherStats {
        let inner = &self.inner;
        let in_flight = inner.in_flight().len();
        DispatcherStats {
            slots: inner.pool.size(),
            queue_capacity: inner.queue_capacity,
            pending: inner.pending.load(Ordering::Relaxed),
            running: inner.running.load(Ordering::Relaxed),
            in_flight,
            total_jobs: inner.total_jobs.load(Ordering::Relaxed),
            coalesced_requests: inner.coalesced.load(Ordering::Relaxed),
            rejected_requests: inner.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.inner.pool
    }

    /// Stops handing out leases. Jobs already inside the parser finish normally,
    /// queued ones fail with `resource_pool_closed`.
    pub fn shutdown(&self) {
        info!("Shutting down dispatcher");
        self.inner.pool.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Done,
}

/// One admitted job, executed on its own task.
struct Job {
    inner: Arc<DispatcherInner>,
    key: RequestKey,
    job_id: u64,
    kind: SourceKind,
    url: String,
    sender: broadcast::Sender<SharedOutcome>,
    phase: Phase,
    settled: bool,
}

impl Job {
    async fn run(mut self) {
        let outcome = self.execute().await;
        if let (Ok(data), Some(hook)) = (&outcome, self.inner.completion_hook.get()) {
            hook.on_success(self.kind, &self.url, data).await;
        }
        self.settle(outcome);
    }

    async fn execute(&mut self) -> SharedOutcome {
        let acquired = self.inner.pool.acquire().await;
        let guard = match acquired {
            Ok(guard) => guard,
            Err(_) => {
                self.leave_phase();
                warn!(key = %self.key, job_id = self.job_id, "Resource pool closed before the job could start");
                return Err(JobFailure::PoolClosed);
            }
        };

        self.enter_running();
        info!(key = %self.key, kind = %self.kind, profile = %guard.lease(), "Starting parse");
        let started = Instant::now();

        let result = self
            .inner
            .parser
            .run(self.kind, &self.url, guard.lease())
            .await;

        debug!(profile = %guard.lease(), "Releasing profile");
        drop(guard);
        self.leave_phase();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(data) => {
                info!(key = %self.key, reviews = data.reviews.len(), elapsed_ms, "Parse finished");
                Ok(Arc::new(data))
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, elapsed_ms, "Parse failed");
                Err(JobFailure::Scrape(e))
            }
        }
    }

    fn enter_running(&mut self) {
        self.inner.pending.fetch_sub(1, Ordering::Relaxed);
        self.inner.running.fetch_add(1, Ordering::Relaxed);
        self.phase = Phase::Running;
    }

    fn leave_phase(&mut self) {
        match self.phase {
            Phase::Pending => {
                self.inner.pending.fetch_sub(1, Ordering::Relaxed);
            }
            Phase::Running => {
                self.inner.running.fetch_sub(1, Ordering::Relaxed);
            }
            Phase::Done => {}
        }
        self.phase = Phase::Done;
    }

    /// Removes this job's entry, but never one registered by a later job for the same key.
    fn remove_entry(&self) -> usize {
        let mut in_flight = self.inner.in_flight();
        if in_flight
            .get(&self.key)
            .is_some_and(|entry| entry.job_id == self.job_id)
        {
            in_flight.remove(&self.key);
        }
        in_flight.len()
    }

    fn settle(&mut self, outcome: SharedOutcome) {
        let remaining = self.remove_entry();
        self.settled = true;
        let waiters = self.sender.send(outcome).unwrap_or(0);
        debug!(key = %self.key, job_id = self.job_id, waiters, in_flight = remaining, "Job settled");
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // task panicked or the runtime is going away
        self.leave_phase();
        self.remove_entry();
        error!(key = %self.key, job_id = self.job_id, "Job dropped before producing a result");
    }
}
