// Error handling framework for job scheduling and dispatch

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while scheduling or executing a job
#[derive(Error, Debug)]
pub enum JobError {
    #[error("{} is not inside {}. Make sure your files are inside your project.", .path.display(), .root.display())]
    PathEscapesRoot { path: PathBuf, root: PathBuf },

    #[error("No work function named '{name}' found in plugin {plugin}")]
    WorkerNotFound { plugin: String, name: String },

    #[error("Job {name} failed: {message}")]
    WorkerExecutionFailed {
        name: String,
        message: String,
        cause: Option<Arc<anyhow::Error>>,
    },

    #[error("{failed} job(s) failed; first failure: {first}")]
    AggregateWaitFailure { failed: usize, first: Arc<JobError> },

    #[error("Failed to read input file {}: {reason}", .path.display())]
    InputUnreadable { path: PathBuf, reason: String },

    #[error("Failed to create output directory {}: {reason}", .path.display())]
    OutputDirFailed { path: PathBuf, reason: String },

    #[error("Job cancelled: {0}")]
    Cancelled(String),
}

impl JobError {
    /// Wrap an error returned by a work function, keeping the original error
    pub fn execution_failed(name: impl Into<String>, err: anyhow::Error) -> Self {
        JobError::WorkerExecutionFailed {
            name: name.into(),
            message: format!("{:#}", err),
            cause: Some(Arc::new(err)),
        }
    }

    /// Original error produced by the work function, if any
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            JobError::WorkerExecutionFailed { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Short machine-readable label used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            JobError::PathEscapesRoot { .. } => "path_escapes_root",
            JobError::WorkerNotFound { .. } => "worker_not_found",
            JobError::WorkerExecutionFailed { .. } => "worker_execution_failed",
            JobError::AggregateWaitFailure { .. } => "aggregate_wait_failure",
            JobError::InputUnreadable { .. } => "input_unreadable",
            JobError::OutputDirFailed { .. } => "output_dir_failed",
            JobError::Cancelled(_) => "cancelled",
        }
    }
}

/// Errors raised by the coalescing batch scheduler
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Transform of {} failed: {message}", .input.display())]
    TransformFailed {
        input: PathBuf,
        message: String,
        cause: Option<Arc<anyhow::Error>>,
    },

    #[error("Batch cancelled: {0}")]
    Cancelled(String),
}

impl BatchError {
    /// Wrap an error returned by the transformer, keeping the original error
    pub fn transform_failed(input: impl Into<PathBuf>, err: anyhow::Error) -> Self {
        BatchError::TransformFailed {
            input: input.into(),
            message: format!("{:#}", err),
            cause: Some(Arc::new(err)),
        }
    }

    /// Original error produced by the transformer, if any
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            BatchError::TransformFailed { cause, .. } => cause.as_deref(),
            BatchError::Cancelled(_) => None,
        }
    }
}

/// Errors raised while loading or validating settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
