//! # cachelink
//!
//! Connection lifecycle management for a Redis-style key-value cache.
//!
//! ## Components
//!
//! - **[`ConfigProvider`]**: per-store connection settings, loaded once and memoized
//! - **[`ConnectionRegistry`]**: one connection per (store, database index), created
//!   lazily, pinged at most every 5 seconds and replaced when the ping fails
//! - **[`KeyScanner`]**: cursor-based enumeration of keys matching a glob pattern,
//!   bounded by a wall-clock timeout
//! - **[`BulkDeleter`]**: deletes scanned keys in fixed-size pipelined batches
//! - **[`CacheClient`]**: the above bound to a single store
//!
//! ## Feature Flags
//!
//! - `redis` (default): the [`redis`](crate::redis) backend
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "redis")]
//! # fn main() -> Result<(), cachelink::CacheError> {
//! use cachelink::CacheClient;
//!
//! let cache = CacheClient::from_config_file("config/cache.toml");
//!
//! let keys = cache.scan(9, "session:*")?;
//! println!("{} sessions", keys.len());
//!
//! let summary = cache.delete_matching(9, "session:*")?;
//! println!("removed {} keys in {} batches", summary.removed, summary.batches);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "redis"))]
//! # fn main() {}
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod delete;
pub mod error;
pub mod registry;
pub mod scan;

#[cfg(feature = "redis")]
pub mod redis;

pub use backend::{BackendConnection, ConnectionHandle, Connector, ScanCursor, ScanPage};
pub use client::{CacheClient, DEFAULT_STORE};
pub use config::{
    ConfigProvider, ConnectionParameters, Credential, TomlConfigProvider, lookup_dotted,
};
pub use delete::{BulkDeleter, DEFAULT_DELETE_BATCH_SIZE, DeleteSummary};
pub use error::{
    BackendError, CacheError, CacheResult, ConfigError, ConfigResult, ConnectStage, ErrorKind,
};
pub use registry::{
    ConnectionKey, ConnectionRegistry, ConnectionState, DEFAULT_HEALTH_CHECK_INTERVAL,
};
pub use scan::{DEFAULT_SCAN_COUNT, DEFAULT_SCAN_TIMEOUT, KeyScanner};

#[cfg(feature = "redis")]
pub use crate::redis::{RedisConnection, RedisConnector};
