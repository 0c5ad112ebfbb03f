// Bootstrap utilities for binary initialization

use crate::activity::TracingReporter;
use crate::batch::{BatchScheduler, BatchTransformer};
use crate::config::Settings;
use crate::executor::fs::{FsPlugin, PLUGIN_NAME};
use crate::executor::PluginRegistry;
use crate::jobs::{JobsManager, JobsManagerConfig};
use crate::models::PluginRef;
use crate::telemetry;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Location the built-in `fs` plugin is registered under
pub fn fs_plugin_ref(root_dir: &Path) -> PluginRef {
    PluginRef {
        name: PLUGIN_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        resolve: root_dir.join("plugins").join(PLUGIN_NAME),
    }
}

/// Initialize logging and, when a port is configured, the Prometheus exporter
///
/// # Errors
/// Returns error if the subscriber or the exporter cannot be installed
pub fn init_telemetry(settings: &Settings) -> Result<()> {
    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )
    .context("Failed to initialize logging")?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port).context("Failed to initialize metrics")?;
    }
    Ok(())
}

/// Registry holding every built-in plugin
pub fn init_plugin_registry(root_dir: &Path) -> PluginRegistry {
    let fs = fs_plugin_ref(root_dir);
    info!(plugin = %fs.name, resolve = %fs.resolve.display(), "Registering built-in plugin");
    PluginRegistry::new().with_plugin(&fs.resolve, FsPlugin)
}

/// Jobs manager configured from settings, reporting through tracing
#[tracing::instrument(skip(settings, registry))]
pub fn init_jobs_manager(settings: &Settings, registry: PluginRegistry) -> JobsManager {
    let manager = JobsManager::new(
        JobsManagerConfig::from(settings),
        registry,
        Arc::new(TracingReporter),
    );
    info!(
        root_dir = %manager.root_dir().display(),
        concurrency = settings.worker.concurrency,
        cache_limit = settings.jobs.cache_limit,
        "Jobs manager initialized"
    );
    manager
}

/// Batch scheduler configured from settings
#[tracing::instrument(skip(settings, transformer))]
pub fn init_batch_scheduler(
    settings: &Settings,
    transformer: Arc<dyn BatchTransformer>,
) -> BatchScheduler {
    info!(
        flush_interval_ms = settings.batch.flush_interval_ms,
        report_progress = settings.batch.report_progress,
        "Batch scheduler initialized"
    );
    BatchScheduler::new(&settings.batch, transformer, Arc::new(TracingReporter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fs::CopyTransformer;
    use crate::jobs::describe_plugin;
    use crate::models::Job;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn settings(root: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.jobs.root_dir = root.to_path_buf();
        settings
    }

    #[test]
    fn test_fs_plugin_is_local_to_project() {
        let root = TempDir::new().unwrap();
        let plugin = describe_plugin(&fs_plugin_ref(root.path()), root.path());
        assert_eq!(plugin.name, "fs");
        assert!(plugin.is_local);
    }

    #[tokio::test]
    async fn test_bootstrapped_manager_runs_fs_jobs() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.txt"), b"a").unwrap();
        let settings = settings(root.path());
        let manager = init_jobs_manager(&settings, init_plugin_registry(root.path()));

        let job = Job {
            name: "COPY".to_string(),
            input_paths: vec!["a.txt".into()],
            output_dir: "public".into(),
            args: Default::default(),
        };
        let result = manager
            .enqueue_job(job, &fs_plugin_ref(root.path()))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(result, json!(["a.txt"]));
        assert!(root.path().join("public/a.txt").is_file());
    }

    #[tokio::test]
    async fn test_bootstrapped_batch_scheduler_copies_outputs() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("cat.jpg"), b"jpg").unwrap();
        let mut settings = settings(root.path());
        settings.batch.flush_interval_ms = 10;
        let scheduler = init_batch_scheduler(&settings, Arc::new(CopyTransformer));

        scheduler
            .schedule_transform(root.path().join("cat.jpg"), json!({}), root.path().join("out/cat.png"))
            .await
            .unwrap();
        assert!(root.path().join("out/cat.png").is_file());
    }
}
