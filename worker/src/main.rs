// Worker binary entry point
// Runs the jobs and transforms of a manifest, then exits

mod manifest;

use anyhow::{bail, Context, Result};
use common::bootstrap;
use common::config::Settings;
use common::executor::fs::CopyTransformer;
use common::jobs::JobHandle;
use common::telemetry;
use futures::future::join_all;
use manifest::JobManifest;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Configuration error")?;
    bootstrap::init_telemetry(&settings)?;

    info!("Starting build job worker");

    let manifest_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: job-worker <manifest.json>")?;
    let manifest = JobManifest::load(&manifest_path)?;
    if manifest.is_empty() {
        warn!(manifest = %manifest_path.display(), "Manifest has no work");
        return Ok(());
    }

    let result = run(&settings, manifest).await;
    telemetry::shutdown_tracer();
    result
}

async fn run(settings: &Settings, manifest: JobManifest) -> Result<()> {
    let root_dir = &settings.jobs.root_dir;
    let manager = bootstrap::init_jobs_manager(settings, bootstrap::init_plugin_registry(root_dir));
    let scheduler = bootstrap::init_batch_scheduler(settings, Arc::new(CopyTransformer));
    let plugin = bootstrap::fs_plugin_ref(root_dir);

    let mut handles: Vec<JobHandle> = Vec::with_capacity(manifest.jobs.len());
    for job in manifest.jobs {
        let name = job.name.clone();
        let handle = manager
            .enqueue_job(job, &plugin)
            .with_context(|| format!("Failed to enqueue job {}", name))?;
        handles.push(handle);
    }

    let batches: Vec<_> = manifest
        .transforms
        .into_iter()
        .map(|mut request| {
            request.input_path = manager.root_dir().join(&request.input_path);
            request.output_path = manager.root_dir().join(&request.output_path);
            scheduler.schedule(request)
        })
        .collect();

    info!(
        jobs = handles.len(),
        deduplicated_to = manager.tracked_jobs(),
        transforms = batches.len(),
        pending_batches = scheduler.pending_batches(),
        "Work scheduled"
    );

    let jobs_outcome = manager.wait_until_all_complete().await;
    for handle in &handles {
        match handle.peek() {
            Some(Ok(value)) => info!(job_id = %handle.id(), result = %value, "Job succeeded"),
            Some(Err(err)) => error!(job_id = %handle.id(), error = %err, "Job failed"),
            None => warn!(job_id = %handle.id(), "Job did not settle"),
        }
    }

    let transform_failures = join_all(batches.into_iter().map(IntoFuture::into_future))
        .await
        .into_iter()
        .filter_map(Result::err)
        .inspect(|err| error!(error = %err, "Transform failed"))
        .count();

    jobs_outcome.context("Some jobs failed")?;
    if transform_failures > 0 {
        bail!("{} transforms failed", transform_failures);
    }

    info!("All work completed");
    Ok(())
}
