// Job augmentation: path normalisation, input hashing and fingerprinting

use crate::errors::JobError;
use crate::jobs::fingerprint::{hash_file, job_digest};
use crate::jobs::paths::{normalize_path, resolve_path, to_slash};
use crate::models::{AugmentedJob, InputFile, JobRequest, PluginDescriptor, PluginRef};
use std::path::{Component, Path};
use uuid::Uuid;

/// Turn a requested job into an [`AugmentedJob`].
///
/// Already augmented jobs are returned untouched: no re-hashing and no new id.
/// Every path is validated before any file is read, so a path outside
/// `root_dir` fails without touching the filesystem.
pub fn create_augmented_job(
    request: impl Into<JobRequest>,
    plugin: &PluginRef,
    root_dir: &Path,
) -> Result<AugmentedJob, JobError> {
    let job = match request.into() {
        JobRequest::Augmented(job) => return Ok(job),
        JobRequest::New(job) => job,
    };

    let relative_inputs = job
        .input_paths
        .iter()
        .map(|path| normalize_path(path, root_dir))
        .collect::<Result<Vec<_>, _>>()?;
    let output_dir = normalize_path(&job.output_dir, root_dir)?;

    let input_paths = relative_inputs
        .into_iter()
        .map(|path| {
            let content_digest = hash_file(&resolve_path(&path, root_dir))?;
            Ok(InputFile {
                path,
                content_digest,
            })
        })
        .collect::<Result<Vec<_>, JobError>>()?;

    let plugin = describe_plugin(plugin, root_dir);
    let input_hashes: Vec<&str> = input_paths
        .iter()
        .map(|input| input.content_digest.as_str())
        .collect();
    let content_digest = job_digest(&job.name, &input_hashes, &output_dir, &job.args, &plugin);

    Ok(AugmentedJob {
        id: Uuid::new_v4(),
        content_digest,
        name: job.name,
        input_paths,
        output_dir,
        args: job.args,
        plugin,
    })
}

/// Normalised plugin identity. A plugin is local when it lives inside the
/// project and not in an installed package directory.
pub fn describe_plugin(plugin: &PluginRef, root_dir: &Path) -> PluginDescriptor {
    let installed = plugin
        .resolve
        .components()
        .any(|c| matches!(c, Component::Normal(segment) if segment == "node_modules"));
    let inside_root = normalize_path(&plugin.resolve, root_dir).is_ok();

    PluginDescriptor {
        name: plugin.name.clone(),
        version: plugin.version.clone(),
        resolve: to_slash(&plugin.resolve),
        is_local: inside_root && !installed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobArgs};
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn plugin() -> PluginRef {
        PluginRef {
            name: "plugin-test".to_string(),
            version: "1.0.0".to_string(),
            resolve: PathBuf::from("/node_modules/plugin-test"),
        }
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("fixtures")).unwrap();
        fs::write(dir.path().join("fixtures/input1.jpg"), b"input1").unwrap();
        fs::write(dir.path().join("fixtures/input2.jpg"), b"input2").unwrap();
        dir
    }

    fn mock_job(root: &Path) -> Job {
        let mut args = JobArgs::new();
        args.insert("param1".to_string(), json!("param1"));
        args.insert("param2".to_string(), json!("param2"));
        Job {
            name: "TEST_JOB".to_string(),
            input_paths: vec![
                root.join("fixtures/input1.jpg"),
                root.join("fixtures/input2.jpg"),
            ],
            output_dir: root.join("public/outputDir"),
            args,
        }
    }

    #[test]
    fn test_returns_relative_paths_digests_and_plugin() {
        let root = project();
        let job = create_augmented_job(mock_job(root.path()), &plugin(), root.path()).unwrap();

        assert_eq!(job.name, "TEST_JOB");
        assert_eq!(job.output_dir, "public/outputDir");
        let paths: Vec<&str> = job.input_paths.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["fixtures/input1.jpg", "fixtures/input2.jpg"]);
        assert_ne!(job.input_paths[0].content_digest, job.input_paths[1].content_digest);
        assert_eq!(job.content_digest.len(), 64);
        assert_eq!(
            job.plugin,
            PluginDescriptor {
                name: "plugin-test".to_string(),
                version: "1.0.0".to_string(),
                resolve: "/node_modules/plugin-test".to_string(),
                is_local: false,
            }
        );
    }

    #[test]
    fn test_fails_when_input_is_outside_root() {
        let root = project();
        let mut job = mock_job(root.path());
        job.input_paths = vec![PathBuf::from("/anotherdir/files/image.jpg")];

        let err = create_augmented_job(job, &plugin(), root.path()).unwrap_err();
        assert!(matches!(err, JobError::PathEscapesRoot { .. }));
    }

    #[test]
    fn test_fails_when_output_is_outside_root() {
        let root = project();
        let mut job = mock_job(root.path());
        job.output_dir = PathBuf::from("../public");

        let err = create_augmented_job(job, &plugin(), root.path()).unwrap_err();
        assert!(matches!(err, JobError::PathEscapesRoot { .. }));
    }

    #[test]
    fn test_missing_input_is_unreadable() {
        let root = project();
        let mut job = mock_job(root.path());
        job.input_paths = vec![PathBuf::from("fixtures/missing.jpg")];

        let err = create_augmented_job(job, &plugin(), root.path()).unwrap_err();
        assert!(matches!(err, JobError::InputUnreadable { .. }));
    }

    #[test]
    fn test_augmenting_twice_is_identity() {
        let root = project();
        let once = create_augmented_job(mock_job(root.path()), &plugin(), root.path()).unwrap();
        let twice = create_augmented_job(once.clone(), &plugin(), root.path()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_same_job_twice_gets_new_id_same_digest() {
        let root = project();
        let first = create_augmented_job(mock_job(root.path()), &plugin(), root.path()).unwrap();
        let second = create_augmented_job(mock_job(root.path()), &plugin(), root.path()).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.content_digest, second.content_digest);
    }

    #[test]
    fn test_plugin_locality() {
        let root = project();
        let local = PluginRef {
            name: "local".to_string(),
            version: "0.0.1".to_string(),
            resolve: root.path().join("plugins/local"),
        };
        let vendored = PluginRef {
            name: "vendored".to_string(),
            version: "0.0.1".to_string(),
            resolve: root.path().join("node_modules/vendored"),
        };

        assert!(describe_plugin(&local, root.path()).is_local);
        assert!(!describe_plugin(&vendored, root.path()).is_local);
        assert!(!describe_plugin(&plugin(), root.path()).is_local);
    }
}
