use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::storage::checksum::DigestAlgorithm;

pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Retry policy for remote fetches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub timeout_seconds: u64,
    pub min_attempts_interval_seconds: u64,
    pub buffer_size: usize,
    pub heartbeat_ttl_seconds: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn min_attempts_interval(&self) -> Duration {
        Duration::from_secs(self.min_attempts_interval_seconds)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("\n")))
        }
    }

    fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.max_attempts < 1 {
            errors.push("max_attempts must be at least 1".to_string());
        }
        if self.buffer_size == 0 {
            errors.push("buffer_size must be greater than zero".to_string());
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            max_attempts: 5,
            timeout_seconds: 60,
            min_attempts_interval_seconds: 5,
            buffer_size: DEFAULT_BUFFER_SIZE,
            heartbeat_ttl_seconds: 60,
        }
    }
}

/// Per-repository storage behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryPolicy {
    pub trash_enabled: bool,
    pub force_deletion_allowed: bool,
    pub digest_algorithms: Vec<DigestAlgorithm>,
}

impl Default for RepositoryPolicy {
    fn default() -> Self {
        RepositoryPolicy {
            trash_enabled: true,
            force_deletion_allowed: false,
            digest_algorithms: vec![DigestAlgorithm::Md5, DigestAlgorithm::Sha1],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub root_dir: PathBuf,
    pub storage_id: String,
    /// When set, path locks are `flock(2)` files under this directory and
    /// hold across processes sharing the storage root.
    pub lock_dir: Option<PathBuf>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub policy: RepositoryPolicy,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.storage_id.is_empty() {
            errors.push("storage id must not be empty".to_string());
        }
        if self.storage_id.contains('/') {
            errors.push(format!(
                "storage id `{}` must not contain `/`",
                self.storage_id
            ));
        }
        self.fetch.collect_errors(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("\n")))
        }
    }
}
