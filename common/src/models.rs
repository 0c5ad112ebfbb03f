// Data models for jobs, plugins and coalesced transforms

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque argument bag passed through to the work function
pub type JobArgs = Map<String, Value>;

/// Value produced by a successful work function
pub type WorkerResult = Value;

/// Job as requested by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Name of the work function to run
    pub name: String,
    #[serde(default)]
    pub input_paths: Vec<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub args: JobArgs,
}

/// Plugin that owns a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRef {
    pub name: String,
    pub version: String,
    /// Location the plugin was resolved from
    pub resolve: PathBuf,
}

/// Plugin identity as it takes part in the fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub resolve: String,
    pub is_local: bool,
}

/// Input file rewritten to its root-relative path and content hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFile {
    pub path: String,
    pub content_digest: String,
}

/// Job after path normalisation and fingerprinting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AugmentedJob {
    pub id: Uuid,
    pub content_digest: String,
    pub name: String,
    pub input_paths: Vec<InputFile>,
    pub output_dir: String,
    pub args: JobArgs,
    pub plugin: PluginDescriptor,
}

/// Either a fresh job or one that has already been augmented
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    New(Job),
    Augmented(AugmentedJob),
}

impl From<Job> for JobRequest {
    fn from(job: Job) -> Self {
        JobRequest::New(job)
    }
}

impl From<AugmentedJob> for JobRequest {
    fn from(job: AugmentedJob) -> Self {
        JobRequest::Augmented(job)
    }
}

/// One requested derivative of an input resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub transforms: Value,
}

/// Output entry of a coalesced batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub output_path: PathBuf,
    pub transforms: Value,
}

/// Every transform requested for one input resource, dispatched as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: Uuid,
    pub input_path: PathBuf,
    pub operations: Vec<BatchOperation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_deserializes_camel_case() {
        let job: Job = serde_json::from_value(json!({
            "name": "COPY",
            "inputPaths": ["src/a.jpg"],
            "outputDir": "public/static",
            "args": { "width": 200 }
        }))
        .unwrap();

        assert_eq!(job.name, "COPY");
        assert_eq!(job.input_paths, vec![PathBuf::from("src/a.jpg")]);
        assert_eq!(job.args.get("width"), Some(&json!(200)));
    }

    #[test]
    fn test_job_args_default_to_empty() {
        let job: Job =
            serde_json::from_value(json!({ "name": "NOOP", "outputDir": "public" })).unwrap();
        assert!(job.args.is_empty());
        assert!(job.input_paths.is_empty());
    }
}
