// Jobs manager: in-flight table keyed by fingerprint, dispatch and bookkeeping

use crate::activity::{Activity, ActivityReporter};
use crate::config::Settings;
use crate::errors::JobError;
use crate::executor::{PluginRegistry, WorkerDispatcher};
use crate::jobs::augment::create_augmented_job;
use crate::jobs::staleness;
use crate::models::{AugmentedJob, JobRequest, PluginRef, WorkerResult};
use crate::telemetry;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

/// Settled result of a job, shared by every waiter
pub type JobOutcome = Result<WorkerResult, Arc<JobError>>;

const ACTIVITY_TEXT: &str = "Running jobs";

/// Shared completion handle of one fingerprint. Await it to get the outcome.
#[derive(Clone)]
pub struct JobHandle {
    id: Uuid,
    content_digest: String,
    outcome: Shared<BoxFuture<'static, JobOutcome>>,
}

impl JobHandle {
    fn new(id: Uuid, content_digest: String, rx: oneshot::Receiver<JobOutcome>) -> Self {
        let outcome = rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(Arc::new(JobError::Cancelled(
                        "job task stopped before completion".to_string(),
                    )))
                })
            })
            .boxed()
            .shared();

        Self {
            id,
            content_digest,
            outcome,
        }
    }

    /// Id of the job that actually runs for this fingerprint
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content_digest(&self) -> &str {
        &self.content_digest
    }

    /// Outcome, once the job has settled and the handle has been polled
    pub fn peek(&self) -> Option<&JobOutcome> {
        self.outcome.peek()
    }

    /// True when both handles wait on the same execution
    pub fn same_job(&self, other: &JobHandle) -> bool {
        Shared::ptr_eq(&self.outcome, &other.outcome)
    }
}

impl IntoFuture for JobHandle {
    type Output = JobOutcome;
    type IntoFuture = Shared<BoxFuture<'static, JobOutcome>>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("content_digest", &self.content_digest)
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

/// Configuration for the jobs manager
#[derive(Debug, Clone)]
pub struct JobsManagerConfig {
    pub root_dir: PathBuf,
    /// Maximum number of work functions running at once
    pub concurrency: usize,
    /// Settled entries kept for reuse; `None` keeps all of them
    pub cache_limit: Option<usize>,
}

impl Default for JobsManagerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            concurrency: 8,
            cache_limit: None,
        }
    }
}

impl From<&Settings> for JobsManagerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            root_dir: settings.jobs.root_dir.clone(),
            concurrency: settings.worker.concurrency,
            cache_limit: settings.jobs.cache_limit,
        }
    }
}

struct InFlightEntry {
    id: Uuid,
    seq: u64,
    handle: JobHandle,
    waiters: usize,
    settled: bool,
}

#[derive(Default)]
struct JobTable {
    jobs_in_process: HashMap<String, InFlightEntry>,
    /// Settled digests, oldest first
    settled: VecDeque<String>,
    next_seq: u64,
    active_jobs: usize,
    activity: Option<Box<dyn Activity>>,
}

struct ManagerInner {
    root_dir: PathBuf,
    dispatcher: WorkerDispatcher,
    reporter: Arc<dyn ActivityReporter>,
    cache_limit: Option<usize>,
    table: Mutex<JobTable>,
}

/// Deduplicating job scheduler.
///
/// Each fingerprint runs at most once: every `enqueue` of a known fingerprint
/// gets the existing handle, whether the job is still running or settled.
#[derive(Clone)]
pub struct JobsManager {
    inner: Arc<ManagerInner>,
}

impl JobsManager {
    pub fn new(
        config: JobsManagerConfig,
        registry: PluginRegistry,
        reporter: Arc<dyn ActivityReporter>,
    ) -> Self {
        let root_dir = std::path::absolute(&config.root_dir).unwrap_or(config.root_dir);
        let dispatcher = WorkerDispatcher::new(Arc::new(registry), root_dir.clone(), config.concurrency);

        Self {
            inner: Arc::new(ManagerInner {
                root_dir,
                dispatcher,
                reporter,
                cache_limit: config.cache_limit,
                table: Mutex::new(JobTable::default()),
            }),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.inner.root_dir
    }

    /// Augment a job against this manager's project root
    pub fn create_augmented_job(
        &self,
        request: impl Into<JobRequest>,
        plugin: &PluginRef,
    ) -> Result<AugmentedJob, JobError> {
        create_augmented_job(request, plugin, &self.inner.root_dir)
    }

    /// Whether the inputs of `job` changed since it was augmented
    pub fn is_stale(&self, job: &AugmentedJob) -> bool {
        staleness::is_stale(job, &self.inner.root_dir)
    }

    /// Register `job` and return the completion handle of its fingerprint.
    ///
    /// Registration never suspends; the work function starts on a later
    /// scheduling turn. Must be called from within a Tokio runtime.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name, content_digest = %job.content_digest))]
    pub fn enqueue(&self, job: AugmentedJob) -> JobHandle {
        let (tx, handle, first_active) = {
            let mut table = self.inner.lock_table();

            if let Some(entry) = table.jobs_in_process.get_mut(&job.content_digest) {
                entry.waiters += 1;
                debug!(
                    existing_job_id = %entry.id,
                    waiters = entry.waiters,
                    settled = entry.settled,
                    "Fingerprint already scheduled, reusing handle"
                );
                telemetry::record_job_deduplicated(&job.name);
                return entry.handle.clone();
            }

            table.active_jobs += 1;
            telemetry::update_active_jobs(table.active_jobs);

            let (tx, rx) = oneshot::channel();
            let handle = JobHandle::new(job.id, job.content_digest.clone(), rx);
            let seq = table.next_seq;
            table.next_seq += 1;
            table.jobs_in_process.insert(
                job.content_digest.clone(),
                InFlightEntry {
                    id: job.id,
                    seq,
                    handle: handle.clone(),
                    waiters: 1,
                    settled: false,
                },
            );
            (tx, handle, table.active_jobs == 1)
        };

        // Reporter callbacks run without the table lock so they may query the manager
        if first_active {
            let mut activity = self.inner.reporter.phantom_activity(ACTIVITY_TEXT);
            activity.start();
            self.inner.lock_table().activity = Some(activity);
        }

        telemetry::record_job_enqueued(&job.name);
        info!("Job enqueued");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.run_job(job, tx).in_current_span());

        handle
    }

    /// Augment and enqueue in one step
    pub fn enqueue_job(
        &self,
        request: impl Into<JobRequest>,
        plugin: &PluginRef,
    ) -> Result<JobHandle, JobError> {
        let job = self.create_augmented_job(request, plugin)?;
        Ok(self.enqueue(job))
    }

    /// Wait for every job tracked at call time to settle.
    ///
    /// Never returns early on a failure. When at least one job failed the
    /// first one, in enqueue order, is reported inside
    /// [`JobError::AggregateWaitFailure`].
    pub async fn wait_until_all_complete(&self) -> Result<(), JobError> {
        let handles: Vec<JobHandle> = {
            let table = self.inner.lock_table();
            let mut entries: Vec<&InFlightEntry> = table.jobs_in_process.values().collect();
            entries.sort_by_key(|entry| entry.seq);
            let handles = entries.into_iter().map(|entry| entry.handle.clone()).collect();
            handles
        };

        debug!(jobs = handles.len(), "Waiting for tracked jobs");
        let outcomes =
            futures::future::join_all(handles.into_iter().map(IntoFuture::into_future)).await;

        let mut failures = outcomes.into_iter().filter_map(Result::err);
        match failures.next() {
            None => Ok(()),
            Some(first) => Err(JobError::AggregateWaitFailure {
                failed: 1 + failures.count(),
                first,
            }),
        }
    }

    /// Drop a settled entry so its fingerprint runs again on the next
    /// `enqueue`. Running jobs are kept; returns whether an entry was removed.
    pub fn forget(&self, content_digest: &str) -> bool {
        let mut table = self.inner.lock_table();
        let removable = table
            .jobs_in_process
            .get(content_digest)
            .is_some_and(|entry| entry.settled);
        if removable {
            table.jobs_in_process.remove(content_digest);
            table.settled.retain(|digest| digest != content_digest);
            debug!(content_digest = content_digest, "Forgot settled job");
        }
        removable
    }

    /// Number of jobs currently running
    pub fn active_jobs(&self) -> usize {
        self.inner.lock_table().active_jobs
    }

    /// Number of fingerprints in the table, running or settled
    pub fn tracked_jobs(&self) -> usize {
        self.inner.lock_table().jobs_in_process.len()
    }

    pub fn is_pending(&self, content_digest: &str) -> bool {
        self.inner
            .lock_table()
            .jobs_in_process
            .get(content_digest)
            .is_some_and(|entry| !entry.settled)
    }

    pub fn handle(&self, content_digest: &str) -> Option<JobHandle> {
        self.inner
            .lock_table()
            .jobs_in_process
            .get(content_digest)
            .map(|entry| entry.handle.clone())
    }

    /// Number of `enqueue` calls answered by the entry for `content_digest`
    pub fn waiters(&self, content_digest: &str) -> usize {
        self.inner
            .lock_table()
            .jobs_in_process
            .get(content_digest)
            .map_or(0, |entry| entry.waiters)
    }
}

impl ManagerInner {
    fn lock_table(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_job(self: Arc<Self>, job: AugmentedJob, tx: oneshot::Sender<JobOutcome>) {
        // Jobs issued in the same turn all register before any of them starts
        tokio::task::yield_now().await;

        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(&job).await.map_err(Arc::new);
        let elapsed = started.elapsed().as_secs_f64();

        telemetry::record_job_duration(&job.name, elapsed);
        match &outcome {
            Ok(_) => {
                telemetry::record_job_success(&job.name);
                info!(duration_seconds = elapsed, "Job completed");
            }
            Err(err) => {
                telemetry::record_job_failure(&job.name, err.reason());
                warn!(duration_seconds = elapsed, error = %err, "Job failed");
            }
        }

        self.settle(&job.content_digest);

        // Nobody listening is fine, the outcome stays in the shared handle
        let _ = tx.send(outcome);
    }

    fn settle(&self, content_digest: &str) {
        let finished_activity = self.record_settled(content_digest);
        if let Some(mut activity) = finished_activity {
            activity.end();
        }
    }

    /// Table bookkeeping for a settled job. Returns the activity to end when
    /// no job is left running.
    fn record_settled(&self, content_digest: &str) -> Option<Box<dyn Activity>> {
        let mut table = self.lock_table();

        if let Some(entry) = table.jobs_in_process.get_mut(content_digest) {
            entry.settled = true;
        }
        table.settled.push_back(content_digest.to_string());

        table.active_jobs = table.active_jobs.saturating_sub(1);
        telemetry::update_active_jobs(table.active_jobs);
        let finished_activity = if table.active_jobs == 0 {
            table.activity.take()
        } else {
            None
        };

        if let Some(limit) = self.cache_limit {
            while table.settled.len() > limit {
                let Some(oldest) = table.settled.pop_front() else {
                    break;
                };
                let evictable = table
                    .jobs_in_process
                    .get(&oldest)
                    .is_some_and(|entry| entry.settled);
                if evictable {
                    table.jobs_in_process.remove(&oldest);
                    debug!(content_digest = %oldest, "Evicted settled job");
                }
            }
        }

        finished_activity
    }
}
