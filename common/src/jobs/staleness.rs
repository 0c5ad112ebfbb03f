// Staleness detection for previously executed jobs

use crate::jobs::fingerprint::{hash_file, hash_file_async};
use crate::jobs::paths::{normalize_path, resolve_path};
use crate::models::{AugmentedJob, InputFile, PluginRef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A job is stale when any input is gone or its bytes no longer hash to the
/// recorded digest.
pub fn is_stale(job: &AugmentedJob, root_dir: &Path) -> bool {
    job.input_paths
        .iter()
        .any(|input| input_is_stale(input, root_dir))
}

/// Async variant of [`is_stale`] for callers already on the runtime
pub async fn is_stale_async(job: &AugmentedJob, root_dir: &Path) -> bool {
    for input in &job.input_paths {
        let Some(full_path) = cached_input_path(input, root_dir) else {
            return true;
        };
        match hash_file_async(&full_path).await {
            Ok(digest) if digest == input.content_digest => {}
            _ => return true,
        }
    }
    false
}

/// Location of a cached input on disk, `None` when it lies outside the root
fn cached_input_path(input: &InputFile, root_dir: &Path) -> Option<PathBuf> {
    match normalize_path(Path::new(&input.path), root_dir) {
        Ok(relative) => Some(resolve_path(&relative, root_dir)),
        Err(err) => {
            debug!(path = %input.path, error = %err, "Cached input outside the project root");
            None
        }
    }
}

fn input_is_stale(input: &InputFile, root_dir: &Path) -> bool {
    let Some(full_path) = cached_input_path(input, root_dir) else {
        return true;
    };
    if !full_path.exists() {
        debug!(path = %input.path, "Input file missing");
        return true;
    }

    match hash_file(&full_path) {
        Ok(digest) => {
            let changed = digest != input.content_digest;
            if changed {
                debug!(path = %input.path, "Input file content changed");
            }
            changed
        }
        Err(_) => true,
    }
}

/// Result of checking persisted job caches against the filesystem
#[derive(Debug, Default)]
pub struct StaleSweep {
    /// Digests whose cached entry must be dropped
    pub removed: Vec<String>,
    /// Unfinished jobs whose inputs are still valid, to be offered again
    pub to_enqueue: Vec<(AugmentedJob, PluginRef)>,
}

/// Check completed and unfinished jobs of an external cache snapshot.
///
/// Stale entries of both maps end up in `removed`; fresh unfinished jobs are
/// returned in `to_enqueue`. Fresh completed jobs need nothing.
pub fn sweep_stale_jobs(
    done: &HashMap<String, AugmentedJob>,
    pending: &HashMap<String, (AugmentedJob, PluginRef)>,
    root_dir: &Path,
) -> StaleSweep {
    let mut sweep = StaleSweep::default();

    for (digest, job) in done {
        if is_stale(job, root_dir) {
            sweep.removed.push(digest.clone());
        }
    }

    for (digest, (job, plugin)) in pending {
        if is_stale(job, root_dir) {
            sweep.removed.push(digest.clone());
        } else {
            sweep.to_enqueue.push((job.clone(), plugin.clone()));
        }
    }

    sweep.removed.sort();
    sweep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::fingerprint::hash_file;
    use crate::models::{JobArgs, PluginDescriptor};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn job_with_inputs(inputs: Vec<InputFile>) -> AugmentedJob {
        AugmentedJob {
            id: Uuid::new_v4(),
            content_digest: "1234".to_string(),
            name: "TEST_JOB".to_string(),
            input_paths: inputs,
            output_dir: "public".to_string(),
            args: JobArgs::new(),
            plugin: PluginDescriptor {
                name: "plugin-test".to_string(),
                version: "1.0.0".to_string(),
                resolve: "/node_modules/plugin-test".to_string(),
                is_local: false,
            },
        }
    }

    fn fixture(dir: &TempDir, name: &str, bytes: &[u8]) -> InputFile {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        InputFile {
            path: name.to_string(),
            content_digest: hash_file(&path).unwrap(),
        }
    }

    #[test]
    fn test_missing_file_is_stale() {
        let dir = TempDir::new().unwrap();
        let job = job_with_inputs(vec![InputFile {
            path: "unknown-file.jpg".to_string(),
            content_digest: "1234".to_string(),
        }]);
        assert!(is_stale(&job, dir.path()));
    }

    #[test]
    fn test_changed_digest_is_stale() {
        let dir = TempDir::new().unwrap();
        let mut input = fixture(&dir, "input1.jpg", b"original");
        input.content_digest = "1234".to_string();
        assert!(is_stale(&job_with_inputs(vec![input]), dir.path()));
    }

    #[test]
    fn test_unchanged_file_is_fresh() {
        let dir = TempDir::new().unwrap();
        let job = job_with_inputs(vec![fixture(&dir, "input1.jpg", b"original")]);
        assert!(!is_stale(&job, dir.path()));
    }

    #[test]
    fn test_rewritten_file_is_stale() {
        let dir = TempDir::new().unwrap();
        let job = job_with_inputs(vec![fixture(&dir, "input1.jpg", b"original")]);
        fs::write(dir.path().join("input1.jpg"), b"rewritten").unwrap();
        assert!(is_stale(&job, dir.path()));
    }

    #[test]
    fn test_job_without_inputs_is_fresh() {
        let dir = TempDir::new().unwrap();
        assert!(!is_stale(&job_with_inputs(vec![]), dir.path()));
    }

    #[tokio::test]
    async fn test_input_outside_root_is_stale() {
        let dir = TempDir::new().unwrap();
        let outside = fixture(&dir, "outside.txt", b"secret");
        fs::create_dir_all(dir.path().join("project")).unwrap();
        let root = dir.path().join("project");

        // Digest matches the file one level up, which must not be read
        let job = job_with_inputs(vec![InputFile {
            path: "../outside.txt".to_string(),
            content_digest: outside.content_digest,
        }]);
        assert!(is_stale(&job, &root));
        assert!(is_stale_async(&job, &root).await);

        let mut done = HashMap::new();
        done.insert("escaped".to_string(), job);
        let sweep = sweep_stale_jobs(&done, &HashMap::new(), &root);
        assert_eq!(sweep.removed, vec!["escaped"]);
    }

    #[tokio::test]
    async fn test_async_check_agrees() {
        let dir = TempDir::new().unwrap();
        let job = job_with_inputs(vec![fixture(&dir, "nested.jpg", b"bytes")]);
        assert!(!is_stale_async(&job, dir.path()).await);
        fs::remove_file(dir.path().join("nested.jpg")).unwrap();
        assert!(is_stale_async(&job, dir.path()).await);
    }

    #[test]
    fn test_sweep_splits_caches() {
        let dir = TempDir::new().unwrap();
        let fresh = fixture(&dir, "fresh.jpg", b"fresh");
        let gone = InputFile {
            path: "gone.jpg".to_string(),
            content_digest: "1234".to_string(),
        };
        let plugin = PluginRef {
            name: "test".to_string(),
            version: "1.0.0".to_string(),
            resolve: PathBuf::from("/node_modules/test"),
        };

        let mut done = HashMap::new();
        done.insert("done-stale".to_string(), job_with_inputs(vec![gone.clone()]));
        done.insert("done-fresh".to_string(), job_with_inputs(vec![fresh.clone()]));

        let mut pending = HashMap::new();
        pending.insert(
            "pending-stale".to_string(),
            (job_with_inputs(vec![gone]), plugin.clone()),
        );
        let fresh_job = job_with_inputs(vec![fresh]);
        pending.insert("pending-fresh".to_string(), (fresh_job.clone(), plugin.clone()));

        let sweep = sweep_stale_jobs(&done, &pending, dir.path());
        assert_eq!(sweep.removed, vec!["done-stale", "pending-stale"]);
        assert_eq!(sweep.to_enqueue, vec![(fresh_job, plugin)]);
    }
}
