// Built-in filesystem plugin
// COPY and CONCAT work functions plus a copying batch transformer

use super::{WorkFunction, WorkInput, WorkerPlugin};
use crate::batch::BatchTransformer;
use crate::models::{Batch, WorkerResult};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const PLUGIN_NAME: &str = "fs";

/// Worker module of the `fs` plugin
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPlugin;

impl WorkerPlugin for FsPlugin {
    fn work_function(&self, name: &str) -> Option<Arc<dyn WorkFunction>> {
        match name {
            "COPY" => Some(Arc::new(CopyFiles)),
            "CONCAT" => Some(Arc::new(ConcatFiles)),
            _ => None,
        }
    }
}

/// Copies every input into the output directory and returns the written
/// file names
pub struct CopyFiles;

#[async_trait]
impl WorkFunction for CopyFiles {
    #[instrument(skip(self, input), fields(inputs = input.input_paths.len()))]
    async fn run(&self, input: WorkInput) -> anyhow::Result<WorkerResult> {
        let mut written = Vec::with_capacity(input.input_paths.len());
        for source in &input.input_paths {
            let file_name = file_name(source)?;
            let target = input.output_dir.join(&file_name);
            tokio::fs::copy(source, &target)
                .await
                .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;
            debug!(target = %target.display(), "Copied file");
            written.push(Value::String(file_name));
        }
        Ok(Value::Array(written))
    }
}

/// Concatenates the inputs, in order, into `args.file_name`
pub struct ConcatFiles;

#[async_trait]
impl WorkFunction for ConcatFiles {
    #[instrument(skip(self, input), fields(inputs = input.input_paths.len()))]
    async fn run(&self, input: WorkInput) -> anyhow::Result<WorkerResult> {
        let file_name = input
            .args
            .get("file_name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("CONCAT requires a string `file_name` argument"))?;

        let mut contents = Vec::new();
        for source in &input.input_paths {
            let bytes = tokio::fs::read(source)
                .await
                .with_context(|| format!("Failed to read {}", source.display()))?;
            contents.extend_from_slice(&bytes);
        }

        let target = input.output_dir.join(file_name);
        tokio::fs::write(&target, &contents)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        Ok(json!({ "fileName": file_name, "bytes": contents.len() }))
    }
}

/// Batch transformer writing every output of a batch as a copy of its input
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyTransformer;

#[async_trait]
impl BatchTransformer for CopyTransformer {
    #[instrument(skip(self, batch), fields(batch_id = %batch.id, transforms = batch.operations.len()))]
    async fn transform(&self, batch: &Batch) -> anyhow::Result<()> {
        let source = tokio::fs::read(&batch.input_path)
            .await
            .with_context(|| format!("Failed to read {}", batch.input_path.display()))?;

        for operation in &batch.operations {
            if let Some(parent) = operation.output_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&operation.output_path, &source)
                .await
                .with_context(|| format!("Failed to write {}", operation.output_path.display()))?;
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", path.display()))
}
