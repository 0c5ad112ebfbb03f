// Content-addressed build jobs
// Augmentation, fingerprinting, staleness and the deduplicating manager

pub mod augment;
pub mod fingerprint;
pub mod manager;
pub mod paths;
pub mod staleness;

pub use augment::{create_augmented_job, describe_plugin};
pub use fingerprint::{content_digest, hash_file, job_digest};
pub use manager::{JobHandle, JobOutcome, JobsManager, JobsManagerConfig};
pub use paths::normalize_path;
pub use staleness::{is_stale, sweep_stale_jobs, StaleSweep};
