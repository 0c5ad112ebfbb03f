// Configuration management with layered configuration (file, env)

use crate::errors::SettingsError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub jobs: JobsConfig,
    pub worker: WorkerConfig,
    pub batch: BatchConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Project root every job path must live under
    pub root_dir: PathBuf,
    /// Maximum number of settled jobs kept in the in-flight table.
    /// `None` keeps every settled job for the life of the process.
    #[serde(default)]
    pub cache_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of work functions running at the same time
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Quiescence interval of the trailing-edge flush window
    pub flush_interval_ms: u64,
    #[serde(default = "default_report_progress")]
    pub report_progress: bool,
}

fn default_report_progress() -> bool {
    true
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, SettingsError> {
        let config_dir = config_dir.as_ref();
        let defaults = Settings::default();

        let builder = Config::builder()
            // Built-in defaults so every key is optional in files and env
            .set_default("jobs.root_dir", defaults.jobs.root_dir.to_string_lossy().to_string())?
            .set_default("worker.concurrency", defaults.worker.concurrency as u64)?
            .set_default("batch.flush_interval_ms", defaults.batch.flush_interval_ms)?
            .set_default("batch.report_progress", defaults.batch.report_progress)?
            .set_default("observability.log_level", defaults.observability.log_level.clone())?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.jobs.root_dir.as_os_str().is_empty() {
            return Err(SettingsError::Invalid(
                "jobs.root_dir cannot be empty".to_string(),
            ));
        }
        if self.jobs.cache_limit == Some(0) {
            return Err(SettingsError::Invalid(
                "jobs.cache_limit must be greater than 0 when set".to_string(),
            ));
        }

        if self.worker.concurrency == 0 {
            return Err(SettingsError::Invalid(
                "worker.concurrency must be greater than 0".to_string(),
            ));
        }

        if self.batch.flush_interval_ms == 0 {
            return Err(SettingsError::Invalid(
                "batch.flush_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.observability.log_level.is_empty() {
            return Err(SettingsError::Invalid(
                "observability.log_level cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: JobsConfig {
                root_dir: PathBuf::from("."),
                cache_limit: None,
            },
            worker: WorkerConfig { concurrency: 8 },
            batch: BatchConfig {
                flush_interval_ms: 1000,
                report_progress: true,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.batch.flush_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validation_catches_zero_concurrency() {
        let mut settings = Settings::default();
        settings.worker.concurrency = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_cache_limit() {
        let mut settings = Settings::default();
        settings.jobs.cache_limit = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_flush_interval() {
        let mut settings = Settings::default();
        settings.batch.flush_interval_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            r#"
[jobs]
root_dir = "/srv/site"
cache_limit = 500

[worker]
concurrency = 2

[batch]
flush_interval_ms = 250
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(temp_dir.path()).unwrap();
        assert_eq!(settings.jobs.root_dir, PathBuf::from("/srv/site"));
        assert_eq!(settings.jobs.cache_limit, Some(500));
        assert_eq!(settings.worker.concurrency, 2);
        assert_eq!(settings.batch.flush_interval_ms, 250);
        assert!(settings.batch.report_progress);
        assert_eq!(settings.observability.log_level, "info");
    }
}
