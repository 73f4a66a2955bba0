use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::lock::LockMode;

/// Raised when a repository path cannot be built from the given input.
///
/// Always a caller bug, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathConstructionError {
    #[error("path `{path}` resolves outside of repository root `{root}`")]
    ExceedsRoot { root: String, path: String },

    #[error("path `{0}` is not relative to the repository root")]
    NotRelativized(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unlock of `{uri}` without holding its {mode} lock")]
pub struct LockStateError {
    pub uri: String,
    pub mode: LockMode,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{op} `{}` failed: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{0}` not found")]
    NotFound(String),

    #[error("`{0}` is a directory")]
    IsDirectory(String),

    #[error("stream for `{0}` is already closed")]
    StreamClosed(String),

    #[error("record hook for `{path}` failed: {message}")]
    Record { path: String, message: String },

    #[error(transparent)]
    Path(#[from] PathConstructionError),

    #[error(transparent)]
    Lock(#[from] LockStateError),
}

impl StorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound(_) => true,
            StorageError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<StorageError> for io::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io { source, .. } => source,
            StorageError::NotFound(path) => io::Error::new(io::ErrorKind::NotFound, path),
            other => io::Error::other(other),
        }
    }
}

/// Network or protocol failure while talking to a remote repository.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("remote answered {status} for `{resource}`")]
    Status { resource: String, status: u16 },

    #[error("request for `{resource}` failed: {message}")]
    Request { resource: String, message: String },

    #[error("reading `{resource}` from remote failed: {source}")]
    Io {
        resource: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Why a fetch gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    AttemptsExhausted,
    TimedOut,
    RangeUnsupported,
    RemoteDead,
    NotFound,
    NotProxied,
    Storage,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            TerminalReason::AttemptsExhausted => "attempts exhausted",
            TerminalReason::TimedOut => "timeout",
            TerminalReason::RangeUnsupported => "range unsupported",
            TerminalReason::RemoteDead => "remote dead",
            TerminalReason::NotFound => "not found",
            TerminalReason::NotProxied => "not proxied",
            TerminalReason::Storage => "storage failure",
        };
        f.write_str(reason)
    }
}

/// Terminal outcome of a remote fetch. Every variant names the artifact.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("fetching `{path}` failed after {attempts} attempts: {source}")]
    AttemptsExhausted {
        path: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("fetching `{path}` timed out after {elapsed:?}: {source}")]
    TimedOut {
        path: String,
        elapsed: Duration,
        #[source]
        source: TransportError,
    },

    #[error(
        "remote does not support range requests, cannot resume `{path}` at byte {offset}: {source}"
    )]
    RangeUnsupported {
        path: String,
        offset: u64,
        #[source]
        source: TransportError,
    },

    #[error("remote `{remote}` serving `{path}` is not alive: {source}")]
    RemoteUnavailable {
        path: String,
        remote: String,
        #[source]
        source: TransportError,
    },

    #[error("`{path}` not found on remote `{remote}`")]
    NotFound { path: String, remote: String },

    #[error("`{path}` is not served by a remote repository")]
    NotProxied { path: String },

    #[error("storing `{path}` failed: {source}")]
    Storage {
        path: String,
        #[source]
        source: StorageError,
    },
}

impl FetchError {
    pub(crate) fn storage(path: impl Into<String>, source: StorageError) -> Self {
        FetchError::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FetchError::AttemptsExhausted { path, .. }
            | FetchError::TimedOut { path, .. }
            | FetchError::RangeUnsupported { path, .. }
            | FetchError::RemoteUnavailable { path, .. }
            | FetchError::NotFound { path, .. }
            | FetchError::NotProxied { path }
            | FetchError::Storage { path, .. } => path,
        }
    }

    pub fn reason(&self) -> TerminalReason {
        match self {
            FetchError::AttemptsExhausted { .. } => TerminalReason::AttemptsExhausted,
            FetchError::TimedOut { .. } => TerminalReason::TimedOut,
            FetchError::RangeUnsupported { .. } => TerminalReason::RangeUnsupported,
            FetchError::RemoteUnavailable { .. } => TerminalReason::RemoteDead,
            FetchError::NotFound { .. } => TerminalReason::NotFound,
            FetchError::NotProxied { .. } => TerminalReason::NotProxied,
            FetchError::Storage { .. } => TerminalReason::Storage,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration:\n{0}")]
    Invalid(String),
}
