use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{Config, DEFAULT_BUFFER_SIZE, FetchConfig, RepositoryPolicy};
use crate::error::ConfigError;
use crate::storage::checksum::DigestAlgorithm;

/// Command line and environment settings. Embedders flatten this into their
/// own `Parser` with `#[command(flatten)]`.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding every storage
    #[arg(long, env = "DEPOT_ROOTDIR", default_value = "/var/lib/depot")]
    pub root: PathBuf,

    /// Identifier of the storage under the root directory
    #[arg(long, env = "DEPOT_STORAGE_ID", default_value = "storage0")]
    pub storage_id: String,

    /// Directory for cross-process lock files; in-process locks when unset
    #[arg(long, env = "DEPOT_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,

    /// Attempts per remote fetch, the first one included
    #[arg(long, env = "DEPOT_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    /// Give up on a remote fetch after this many seconds
    #[arg(long, env = "DEPOT_FETCH_TIMEOUT", default_value_t = 60)]
    pub timeout_seconds: u64,

    /// Seconds to wait between fetch attempts
    #[arg(long, env = "DEPOT_MIN_ATTEMPTS_INTERVAL", default_value_t = 5)]
    pub min_attempts_interval_seconds: u64,

    /// Copy buffer size in bytes
    #[arg(long, env = "DEPOT_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Seconds a remote heartbeat report stays valid
    #[arg(long, env = "DEPOT_HEARTBEAT_TTL", default_value_t = 60)]
    pub heartbeat_ttl_seconds: u64,

    /// Move deleted files to the trash instead of removing them
    #[arg(long, env = "DEPOT_TRASH_ENABLED", default_value_t = true, action = ArgAction::Set)]
    pub trash_enabled: bool,

    /// Allow forced deletes to bypass the trash
    #[arg(
        long,
        env = "DEPOT_FORCE_DELETION_ALLOWED",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub force_deletion_allowed: bool,

    /// Checksum siblings written next to every artifact
    #[arg(
        long,
        env = "DEPOT_DIGEST_ALGORITHMS",
        value_delimiter = ',',
        default_value = "MD5,SHA-1"
    )]
    pub digest_algorithms: Vec<DigestAlgorithm>,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let config = Config {
            root_dir: args.root,
            storage_id: args.storage_id,
            lock_dir: args.lock_dir,
            fetch: FetchConfig {
                max_attempts: args.max_attempts,
                timeout_seconds: args.timeout_seconds,
                min_attempts_interval_seconds: args.min_attempts_interval_seconds,
                buffer_size: args.buffer_size,
                heartbeat_ttl_seconds: args.heartbeat_ttl_seconds,
            },
            policy: RepositoryPolicy {
                trash_enabled: args.trash_enabled,
                force_deletion_allowed: args.force_deletion_allowed,
                digest_algorithms: args.digest_algorithms,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_config() {
        let args = Args::try_parse_from(["depot"]).unwrap();
        let config = Config::try_from(args).unwrap();
        assert_eq!(config.storage_id, "storage0");
        assert_eq!(config.fetch, FetchConfig::default());
        assert_eq!(config.policy, RepositoryPolicy::default());
        assert!(config.lock_dir.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "depot",
            "--root",
            "/srv/depot",
            "--max-attempts",
            "3",
            "--trash-enabled",
            "false",
            "--digest-algorithms",
            "sha-256,SHA512",
        ])
        .unwrap();
        let config = Config::try_from(args).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/srv/depot"));
        assert_eq!(config.fetch.max_attempts, 3);
        assert!(!config.policy.trash_enabled);
        assert_eq!(
            config.policy.digest_algorithms,
            vec![DigestAlgorithm::Sha256, DigestAlgorithm::Sha512]
        );
    }

    #[test]
    fn invalid_values_are_collected() {
        let args = Args::try_parse_from([
            "depot",
            "--storage-id",
            "a/b",
            "--max-attempts",
            "0",
            "--buffer-size",
            "0",
        ])
        .unwrap();
        let ConfigError::Invalid(message) = Config::try_from(args).unwrap_err();
        assert_eq!(message.lines().count(), 3);
    }
}
