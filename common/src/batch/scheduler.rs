// Coalescing batch scheduler
// Transforms of the same input resource are dispatched as one batch

use super::window::FlushWindow;
use crate::activity::{ActivityReporter, ProgressBar};
use crate::config::BatchConfig;
use crate::errors::BatchError;
use crate::models::{Batch, BatchOperation, TransformRequest};
use crate::telemetry;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::IntoFuture;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Settled result of a batch, shared by every transform attached to it
pub type BatchOutcome = Result<(), Arc<BatchError>>;

const PROGRESS_TEXT: &str = "Generating image thumbnails";

/// Worker executing every operation of a batch in one call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchTransformer: Send + Sync {
    async fn transform(&self, batch: &Batch) -> anyhow::Result<()>;
}

/// Completion handle shared by all transforms of one batch
#[derive(Clone)]
pub struct BatchHandle {
    batch_id: Option<Uuid>,
    outcome: Shared<BoxFuture<'static, BatchOutcome>>,
}

impl BatchHandle {
    fn pending(batch_id: Uuid, rx: oneshot::Receiver<BatchOutcome>) -> Self {
        let outcome = rx
            .map(|received| {
                received.unwrap_or_else(|_| {
                    Err(Arc::new(BatchError::Cancelled(
                        "batch task stopped before completion".to_string(),
                    )))
                })
            })
            .boxed()
            .shared();

        Self {
            batch_id: Some(batch_id),
            outcome,
        }
    }

    fn ready() -> Self {
        Self {
            batch_id: None,
            outcome: futures::future::ready(Ok(())).boxed().shared(),
        }
    }

    /// Batch the transform joined; `None` when the output already existed
    pub fn batch_id(&self) -> Option<Uuid> {
        self.batch_id
    }

    pub fn peek(&self) -> Option<&BatchOutcome> {
        self.outcome.peek()
    }

    pub fn same_batch(&self, other: &BatchHandle) -> bool {
        Shared::ptr_eq(&self.outcome, &other.outcome)
    }
}

impl IntoFuture for BatchHandle {
    type Output = BatchOutcome;
    type IntoFuture = Shared<BoxFuture<'static, BatchOutcome>>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome
    }
}

impl fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchHandle")
            .field("batch_id", &self.batch_id)
            .field("settled", &self.peek().is_some())
            .finish()
    }
}

/// Aggregate progress of the current run of transforms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub scheduled: u64,
    pub finished: u64,
}

struct PendingBatch {
    seq: u64,
    batch: Batch,
    handle: BatchHandle,
    tx: oneshot::Sender<BatchOutcome>,
}

struct BatchState {
    pending: HashMap<PathBuf, PendingBatch>,
    next_seq: u64,
    progress: BatchProgress,
    bar: Option<Box<dyn ProgressBar>>,
    window: FlushWindow,
}

struct SchedulerInner {
    transformer: Arc<dyn BatchTransformer>,
    reporter: Arc<dyn ActivityReporter>,
    report_progress: bool,
    state: Mutex<BatchState>,
}

/// Groups transforms by input resource and dispatches each group once per
/// flush window
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
}

impl BatchScheduler {
    pub fn new(
        config: &BatchConfig,
        transformer: Arc<dyn BatchTransformer>,
        reporter: Arc<dyn ActivityReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                transformer,
                reporter,
                report_progress: config.report_progress,
                state: Mutex::new(BatchState {
                    pending: HashMap::new(),
                    next_seq: 0,
                    progress: BatchProgress::default(),
                    bar: None,
                    window: FlushWindow::new(config.flush_interval()),
                }),
            }),
        }
    }

    /// Queue one transform.
    ///
    /// Resolves at once when the output already exists. Otherwise the
    /// transform joins the pending batch of its input, or opens one, and the
    /// handle settles when that batch has been dispatched and finished.
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, request: TransformRequest) -> BatchHandle {
        if request.output_path.exists() {
            debug!(output_path = %request.output_path.display(), "Output exists, skipping transform");
            return BatchHandle::ready();
        }

        let (handle, deadline) = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;

            if self.inner.report_progress && state.bar.is_none() {
                let mut bar = self.inner.reporter.create_progress(PROGRESS_TEXT);
                bar.start();
                state.bar = Some(bar);
            }

            let operation = BatchOperation {
                output_path: request.output_path,
                transforms: request.transforms,
            };

            let handle = match state.pending.get_mut(&request.input_path) {
                Some(pending) => {
                    pending.batch.operations.push(operation);
                    debug!(
                        batch_id = %pending.batch.id,
                        transforms = pending.batch.operations.len(),
                        "Transform added to pending batch"
                    );
                    pending.handle.clone()
                }
                None => {
                    let id = Uuid::new_v4();
                    let (tx, rx) = oneshot::channel();
                    let handle = BatchHandle::pending(id, rx);
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    info!(
                        batch_id = %id,
                        input_path = %request.input_path.display(),
                        "Batch created"
                    );
                    state.pending.insert(
                        request.input_path.clone(),
                        PendingBatch {
                            seq,
                            batch: Batch {
                                id,
                                input_path: request.input_path,
                                operations: vec![operation],
                            },
                            handle: handle.clone(),
                            tx,
                        },
                    );
                    handle
                }
            };

            state.progress.scheduled += 1;
            let total = state.progress.scheduled;
            if let Some(bar) = state.bar.as_mut() {
                bar.set_total(total);
            }

            (handle, state.window.arm(Instant::now()))
        };

        if let Some((deadline, generation)) = deadline {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(
                async move {
                    tokio::time::sleep_until(deadline).await;
                    inner.flush(Some(generation));
                }
                .in_current_span(),
            );
        }

        handle
    }

    /// Queue a transform of `input_path` written to `output_path`
    pub fn schedule_transform(
        &self,
        input_path: impl Into<PathBuf>,
        transforms: Value,
        output_path: impl Into<PathBuf>,
    ) -> BatchHandle {
        self.schedule(TransformRequest {
            input_path: input_path.into(),
            output_path: output_path.into(),
            transforms,
        })
    }

    /// Dispatch every pending batch now instead of waiting for the window
    pub fn flush_now(&self) {
        self.inner.flush(None);
    }

    /// Number of batches waiting for the next flush
    pub fn pending_batches(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn progress(&self) -> BatchProgress {
        self.inner.lock_state().progress
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain and dispatch every pending batch.
    ///
    /// A timer passes the window generation it was armed for and flushes
    /// nothing once that window has already been closed.
    fn flush(self: &Arc<Self>, generation: Option<u64>) {
        let mut drained: Vec<PendingBatch> = {
            let mut state = self.lock_state();
            match generation {
                Some(generation) => {
                    if !state.window.fire_generation(generation) {
                        debug!(generation, "Window already flushed, skipping timer");
                        return;
                    }
                }
                None => {
                    state.window.fire();
                }
            }
            let drained = state.pending.drain().map(|(_, pending)| pending).collect();
            drained
        };
        drained.sort_by_key(|pending| pending.seq);

        if !drained.is_empty() {
            debug!(batches = drained.len(), "Flushing pending batches");
        }

        for pending in drained {
            telemetry::record_batch_dispatched(pending.batch.operations.len());
            let inner = Arc::clone(self);
            tokio::spawn(inner.run_batch(pending).in_current_span());
        }
    }

    async fn run_batch(self: Arc<Self>, pending: PendingBatch) {
        let PendingBatch { batch, tx, .. } = pending;
        let transforms = batch.operations.len();

        let outcome = self.dispatch(&batch).await.map_err(Arc::new);
        match &outcome {
            Ok(()) => info!(batch_id = %batch.id, transforms, "Batch finished"),
            Err(err) => warn!(batch_id = %batch.id, transforms, error = %err, "Batch failed"),
        }

        self.finish(transforms as u64);
        let _ = tx.send(outcome);
    }

    async fn dispatch(&self, batch: &Batch) -> Result<(), BatchError> {
        let panicked = |payload: Box<dyn Any + Send>| BatchError::TransformFailed {
            input: batch.input_path.clone(),
            message: panic_message(payload),
            cause: None,
        };

        let future = std::panic::catch_unwind(AssertUnwindSafe(|| self.transformer.transform(batch)))
            .map_err(panicked)?;

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(BatchError::transform_failed(&batch.input_path, err)),
            Err(payload) => Err(panicked(payload)),
        }
    }

    fn finish(&self, transforms: u64) {
        let completed = {
            let mut state = self.lock_state();
            if let Some(bar) = state.bar.as_mut() {
                bar.tick(transforms);
            }

            state.progress.finished += transforms;
            if state.progress.finished >= state.progress.scheduled {
                state.progress = BatchProgress::default();
                state.bar.take()
            } else {
                None
            }
        };

        if let Some(mut bar) = completed {
            bar.done();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "transform panicked".to_string()
    }
}
