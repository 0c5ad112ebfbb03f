// Executor module for job execution
// Work functions are resolved by job name from the plugin that owns the job

pub mod dispatch;
pub mod fs;
pub mod registry;

pub use dispatch::WorkerDispatcher;
pub use registry::{PluginRegistry, WorkerModule, WorkerPlugin};

use crate::models::{JobArgs, WorkerResult};
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;

/// Arguments handed to a work function
#[derive(Debug, Clone, PartialEq)]
pub struct WorkInput {
    /// Absolute input paths, in the order the job declared them
    pub input_paths: Vec<PathBuf>,
    /// Absolute output directory; exists when the function is invoked
    pub output_dir: PathBuf,
    pub args: JobArgs,
}

/// WorkFunction trait defines the interface for a named unit of work
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkFunction: Send + Sync {
    /// Execute the work and return its result
    async fn run(&self, input: WorkInput) -> anyhow::Result<WorkerResult>;
}

/// Work function backed by a closure
pub struct FnWorker<F>(F);

/// Wrap a closure returning a future as a [`WorkFunction`]
pub fn fn_worker<F, Fut>(f: F) -> FnWorker<F>
where
    F: Fn(WorkInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<WorkerResult>> + Send + 'static,
{
    FnWorker(f)
}

#[async_trait]
impl<F, Fut> WorkFunction for FnWorker<F>
where
    F: Fn(WorkInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<WorkerResult>> + Send + 'static,
{
    async fn run(&self, input: WorkInput) -> anyhow::Result<WorkerResult> {
        (self.0)(input).await
    }
}
