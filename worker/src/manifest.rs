// Job manifest read by the worker binary

use anyhow::{Context, Result};
use common::models::{Job, TransformRequest};
use serde::Deserialize;
use std::path::Path;

/// Work requested in one run
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManifest {
    /// Jobs for the built-in `fs` plugin
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub transforms: Vec<TransformRequest>,
}

impl JobManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.transforms.is_empty()
    }
}
