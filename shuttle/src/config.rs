use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::check::CheckKind;
use crate::checksum::ChecksumAlgorithm;
use crate::constants::{DEFAULT_PART_SIZE, MAXIMUM_AUTO_MULTIPART_SIZE, MAXIMUM_PART_SIZE};
use crate::error::{ShuttleError, ShuttleResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub transfer: TransferConfig,
    pub job: Option<JobConfig>,
}

/// Knobs consumed by the copy strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Preferred part size for segmented copies and the fixed part size of
    /// streamed copies.
    pub part_size: u64,
    /// Files at or above this size are copied in segments.
    pub auto_multipart_threshold: u64,
    /// Concurrent asynchronous tasks per scope.
    pub max_in_flight: usize,
    pub checksum: ChecksumAlgorithm,
    /// Precondition checks run before each file copy.
    pub checks: Vec<CheckKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Dir,
    File,
    Stream,
}

/// A single transfer run by the `shuttle` binary between two local roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub kind: JobKind,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            transfer: TransferConfig::default(),
            job: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            auto_multipart_threshold: MAXIMUM_AUTO_MULTIPART_SIZE,
            max_in_flight: num_cpus::get() * 2,
            checksum: ChecksumAlgorithm::Md5,
            checks: Vec::new(),
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> ShuttleResult<()> {
        if self.part_size == 0 || self.part_size > MAXIMUM_PART_SIZE {
            return Err(ShuttleError::InvalidConfiguration {
                field: "transfer.part_size".to_string(),
                reason: format!("must be between 1 and {}", MAXIMUM_PART_SIZE),
            });
        }
        if self.auto_multipart_threshold == 0 {
            return Err(ShuttleError::InvalidConfiguration {
                field: "transfer.auto_multipart_threshold".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_in_flight == 0 {
            return Err(ShuttleError::InvalidConfiguration {
                field: "transfer.max_in_flight".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Config {
    pub async fn load() -> ShuttleResult<Self> {
        let config_path = std::env::var("SHUTTLE_CONFIG_PATH")
            .unwrap_or_else(|_| "/etc/shuttle/config.toml".to_string());

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => Self::from_toml(&content),
            Err(_) => {
                warn!("Configuration file not found at {}. Using default settings.", config_path);
                Ok(Config::default())
            }
        }
    }

    pub fn from_toml(content: &str) -> ShuttleResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.transfer.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.transfer.part_size, 128 * 1024 * 1024);
        assert_eq!(config.transfer.auto_multipart_threshold, 1024 * 1024 * 1024);
        assert!(config.transfer.max_in_flight > 0);
        assert!(config.transfer.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [transfer]
            part_size = 8388608
            checksum = "sha256"
            checks = ["destination_exists", "size_equal"]

            [job]
            kind = "dir"
            source_root = "/data/in"
            destination_root = "/data/out"
            source = "photos"
            destination = "backup/photos"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.transfer.part_size, 8 * 1024 * 1024);
        assert_eq!(config.transfer.auto_multipart_threshold, MAXIMUM_AUTO_MULTIPART_SIZE);
        assert_eq!(config.transfer.checksum, ChecksumAlgorithm::Sha256);
        assert_eq!(config.transfer.checks, vec![CheckKind::DestinationExists, CheckKind::SizeEqual]);
        let job = config.job.unwrap();
        assert_eq!(job.kind, JobKind::Dir);
        assert_eq!(job.destination, "backup/photos");
    }

    #[test]
    fn test_rejects_oversized_part() {
        let err = Config::from_toml("[transfer]\npart_size = 6442450944\n").unwrap_err();
        assert!(matches!(err, ShuttleError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(Config::from_toml("transfer = ["), Err(ShuttleError::Config(_))));
    }
}
