// Content digests for files and jobs

use crate::errors::JobError;
use crate::models::{JobArgs, PluginDescriptor};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Digest algorithm used for input files and job fingerprints
pub const DIGEST_ALGORITHM: &str = "sha256";

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Serialize a JSON value with object keys sorted and no whitespace
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, to_canonical_json(v)))
                .collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// Hex digest of the canonical form of `value`
pub fn content_digest(value: &Value) -> String {
    hex::encode(Sha256::digest(to_canonical_json(value).as_bytes()))
}

/// Fingerprint of a job's full semantic input
pub fn job_digest(
    name: &str,
    input_hashes: &[&str],
    output_dir: &str,
    args: &JobArgs,
    plugin: &PluginDescriptor,
) -> String {
    content_digest(&json!({
        "name": name,
        "inputPaths": input_hashes,
        "outputDir": output_dir,
        "args": args,
        "plugin": {
            "name": plugin.name,
            "version": plugin.version,
            "resolve": plugin.resolve,
            "isLocal": plugin.is_local,
        },
    }))
}

/// Hash the bytes of a file
pub fn hash_file(path: &Path) -> Result<String, JobError> {
    let unreadable = |e: std::io::Error| JobError::InputUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut file = File::open(path).map_err(unreadable)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).map_err(unreadable)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash the bytes of a file without blocking the runtime
pub async fn hash_file_async(path: &Path) -> Result<String, JobError> {
    let unreadable = |e: std::io::Error| JobError::InputUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(unreadable)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn plugin() -> PluginDescriptor {
        PluginDescriptor {
            name: "plugin-test".to_string(),
            version: "1.0.0".to_string(),
            resolve: "/node_modules/plugin-test".to_string(),
            is_local: false,
        }
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let val = json!({ "z": [ { "y": "yes", "b": 1 }, null ], "a": { "x": 10 } });
        assert_eq!(
            to_canonical_json(&val),
            "{\"a\":{\"x\":10},\"z\":[{\"b\":1,\"y\":\"yes\"},null]}"
        );
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        assert_eq!(to_canonical_json(&json!("a\"b")), "\"a\\\"b\"");
        assert_eq!(to_canonical_json(&json!({ "k\"": true })), "{\"k\\\"\":true}");
    }

    #[test]
    fn test_job_digest_ignores_arg_order() {
        let mut first = JobArgs::new();
        first.insert("param1".to_string(), json!("param1"));
        first.insert("param2".to_string(), json!("param2"));
        let mut second = JobArgs::new();
        second.insert("param2".to_string(), json!("param2"));
        second.insert("param1".to_string(), json!("param1"));

        assert_eq!(
            job_digest("TEST_JOB", &["h1"], "public", &first, &plugin()),
            job_digest("TEST_JOB", &["h1"], "public", &second, &plugin())
        );
    }

    #[test]
    fn test_job_digest_depends_on_input_order_and_content() {
        let args = JobArgs::new();
        let base = job_digest("TEST_JOB", &["h1", "h2"], "public", &args, &plugin());
        assert_ne!(base, job_digest("TEST_JOB", &["h2", "h1"], "public", &args, &plugin()));
        assert_ne!(base, job_digest("TEST_JOB", &["h1", "h3"], "public", &args, &plugin()));
        assert_ne!(base, job_digest("TEST_JOB", &["h1", "h2"], "public/x", &args, &plugin()));

        let mut other_plugin = plugin();
        other_plugin.version = "1.0.1".to_string();
        assert_ne!(base, job_digest("TEST_JOB", &["h1", "h2"], "public", &args, &other_plugin));
    }

    #[test]
    fn test_hash_file_matches_known_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.txt");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_hash_file_async_agrees_with_sync() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let bytes: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &bytes).unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_file_async(&path).await.unwrap());
    }

    #[test]
    fn test_hash_missing_file_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let err = hash_file(&dir.path().join("missing.jpg")).unwrap_err();
        assert!(matches!(err, JobError::InputUnreadable { .. }));
    }
}
