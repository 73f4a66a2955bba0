//! Storage and proxy core of an artifact repository.
//!
//! Artifacts are addressed by [`storage::VirtualPath`], written atomically
//! through [`storage::AtomicStorageProvider`], guarded by a
//! [`lock::PathLockManager`] and, for proxy repositories, pulled from the
//! remote by [`service::ProxyFetchEngine`].

pub mod config;
pub mod domain;
pub mod error;
pub mod lock;
pub mod remote;
pub mod service;
pub mod storage;
pub mod utils;

pub use config::{Config, FetchConfig, RepositoryPolicy};
pub use error::{
    ConfigError, FetchError, LockStateError, PathConstructionError, StorageError, TransportError,
};
pub use utils::state::DepotState;
