// Worker dispatch: resolve a job's work function and run it in isolation

use super::{PluginRegistry, WorkFunction, WorkInput};
use crate::errors::JobError;
use crate::jobs::paths::resolve_path;
use crate::models::{AugmentedJob, WorkerResult};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

/// Runs work functions with bounded concurrency
pub struct WorkerDispatcher {
    registry: Arc<PluginRegistry>,
    root_dir: PathBuf,
    permits: Arc<Semaphore>,
}

impl WorkerDispatcher {
    /// Create a dispatcher allowing `concurrency` work functions at once
    pub fn new(registry: Arc<PluginRegistry>, root_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            registry,
            root_dir: root_dir.into(),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Find the work function for `job` in its plugin's worker module
    pub fn resolve(&self, job: &AugmentedJob) -> Result<Arc<dyn WorkFunction>, JobError> {
        self.registry
            .worker_module(&job.plugin.resolve)
            .and_then(|module| module.work_function(&job.name))
            .ok_or_else(|| JobError::WorkerNotFound {
                plugin: job.plugin.name.clone(),
                name: job.name.clone(),
            })
    }

    /// Execute `job`. Errors and panics of the work function come back as
    /// [`JobError::WorkerExecutionFailed`].
    #[instrument(skip(self, job), fields(job_id = %job.id, job_name = %job.name))]
    pub async fn dispatch(&self, job: &AugmentedJob) -> Result<WorkerResult, JobError> {
        let function = self.resolve(job)?;

        let output_dir = resolve_path(&job.output_dir, &self.root_dir);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| JobError::OutputDirFailed {
                path: output_dir.clone(),
                reason: e.to_string(),
            })?;

        let input = WorkInput {
            input_paths: job
                .input_paths
                .iter()
                .map(|input| resolve_path(&input.path, &self.root_dir))
                .collect(),
            output_dir,
            args: job.args.clone(),
        };

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| JobError::Cancelled("worker pool closed".to_string()))?;

        debug!("Invoking work function");
        run_isolated(&job.name, function.as_ref(), input).await
    }
}

async fn run_isolated(
    name: &str,
    function: &dyn WorkFunction,
    input: WorkInput,
) -> Result<WorkerResult, JobError> {
    // A panic while building the future counts the same as one while polling it
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| function.run(input))) {
        Ok(future) => future,
        Err(payload) => return Err(panicked(name, payload)),
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(JobError::execution_failed(name, err)),
        Err(payload) => Err(panicked(name, payload)),
    }
}

fn panicked(name: &str, payload: Box<dyn Any + Send>) -> JobError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "work function panicked".to_string()
    };
    JobError::WorkerExecutionFailed {
        name: name.to_string(),
        message,
        cause: None,
    }
}
