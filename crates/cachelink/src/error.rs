//! Error types for connection, configuration and scan operations

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::registry::ConnectionKey;

/// Result type for cachelink operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for configuration lookups
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or reading store configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid TOML
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// No section exists for the requested store
    #[error("store '{0}' is not configured")]
    StoreNotFound(String),

    /// The store section exists but cannot be turned into connection parameters
    #[error("invalid settings for store '{store}': {reason}")]
    InvalidStore { store: String, reason: String },
}

/// Failures reported by a backend connection handle
#[derive(Error, Debug)]
pub enum BackendError {
    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// The handle was closed and can no longer issue commands
    #[error("connection is closed")]
    Closed,

    /// The backend answered with something that does not fit the command's reply shape
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The backend is unreachable or refused the command
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Another caller panicked while holding the handle
    #[error("connection lock poisoned")]
    Poisoned,
}

/// The step of connection creation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Connect,
    Authenticate,
    SelectNamespace,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStage::Connect => f.write_str("connect"),
            ConnectStage::Authenticate => f.write_str("authenticate"),
            ConnectStage::SelectNamespace => f.write_str("select"),
        }
    }
}

/// Coarse classification of a [`CacheError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    ScanTimeout,
    Protocol,
    Command,
}

/// Errors surfaced by the public cachelink API
#[derive(Error, Debug)]
pub enum CacheError {
    /// Configuration source missing, unreadable, or the store is absent
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport connect, authentication or namespace selection failed
    #[error("connection to {key} failed during {stage}: {source}")]
    Connection {
        key: ConnectionKey,
        stage: ConnectStage,
        #[source]
        source: BackendError,
    },

    /// Cumulative scan time exceeded the configured budget
    #[error("scan for '{pattern}' exceeded {timeout:?} after {calls} calls ({elapsed:?} elapsed)")]
    ScanTimeout {
        pattern: String,
        timeout: Duration,
        elapsed: Duration,
        calls: usize,
    },

    /// The backend returned a null or malformed cursor
    #[error("protocol error while scanning '{pattern}': {reason}")]
    Protocol { pattern: String, reason: String },

    /// A command round-trip failed at the transport level
    #[error("{operation} failed: {source}")]
    Command {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    /// A pipelined delete batch failed; earlier batches stay applied
    #[error("delete batch {batch} failed after {completed} completed batches: {source}")]
    BatchFailed {
        batch: usize,
        completed: usize,
        #[source]
        source: BackendError,
    },

    /// A registry slot was poisoned by a panicking caller
    #[error("lock poisoned: {resource}")]
    Poisoned { resource: String },
}

impl CacheError {
    pub(crate) fn connection(key: &ConnectionKey, stage: ConnectStage, source: BackendError) -> Self {
        CacheError::Connection {
            key: key.clone(),
            stage,
            source,
        }
    }

    /// Category of this error, for callers that branch on kind only
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Config(_) => ErrorKind::Config,
            CacheError::Connection { .. } | CacheError::Poisoned { .. } => ErrorKind::Connection,
            CacheError::ScanTimeout { .. } => ErrorKind::ScanTimeout,
            CacheError::Protocol { .. } => ErrorKind::Protocol,
            CacheError::Command { .. } | CacheError::BatchFailed { .. } => ErrorKind::Command,
        }
    }
}
