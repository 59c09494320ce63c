//! Store-scoped convenience facade over the registry, scanner and deleter

use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{ConnectionHandle, Connector};
use crate::config::ConfigProvider;
use crate::delete::{BulkDeleter, DeleteSummary};
use crate::error::CacheResult;
use crate::registry::ConnectionRegistry;
use crate::scan::KeyScanner;

/// Store used when callers name only a database index
pub const DEFAULT_STORE: &str = "default";

/// Binds a shared [`ConnectionRegistry`] to one store
///
/// Clones share the registry, so every clone sees the same connections.
pub struct CacheClient<C: Connector> {
    registry: Arc<ConnectionRegistry<C>>,
    store: String,
    scanner: KeyScanner,
    deleter: BulkDeleter,
}

impl<C: Connector> Clone for CacheClient<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            store: self.store.clone(),
            scanner: self.scanner.clone(),
            deleter: self.deleter.clone(),
        }
    }
}

impl<C: Connector> CacheClient<C> {
    pub fn new(registry: Arc<ConnectionRegistry<C>>) -> Self {
        Self {
            registry,
            store: DEFAULT_STORE.to_string(),
            scanner: KeyScanner::default(),
            deleter: BulkDeleter::default(),
        }
    }

    /// Same registry, different store
    pub fn with_store(mut self, store: impl Into<String>) -> Self {
        self.store = store.into();
        self
    }

    pub fn with_scanner(mut self, scanner: KeyScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_deleter(mut self, deleter: BulkDeleter) -> Self {
        self.deleter = deleter;
        self
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    /// Connection to database `index` of this client's store
    pub fn connection(&self, index: u32) -> CacheResult<ConnectionHandle<C::Connection>> {
        self.registry.acquire(&self.store, index)
    }

    /// Connection to database `index` of any configured store
    pub fn connection_for(
        &self,
        store: &str,
        index: u32,
    ) -> CacheResult<ConnectionHandle<C::Connection>> {
        self.registry.acquire(store, index)
    }

    /// Keys in database `index` matching `pattern`
    pub fn scan(&self, index: u32, pattern: &str) -> CacheResult<HashSet<String>> {
        let conn = self.connection(index)?;
        self.scanner.scan(&conn, pattern)
    }

    /// Delete keys in database `index` matching `pattern`
    pub fn delete_matching(&self, index: u32, pattern: &str) -> CacheResult<DeleteSummary> {
        let conn = self.connection(index)?;
        self.deleter.delete_matching(&conn, pattern)
    }

    /// Setting at `dotted_key` in this client's store section, or `default`
    pub fn config_value(&self, dotted_key: &str, default: toml::Value) -> CacheResult<toml::Value> {
        Ok(self
            .registry
            .config()
            .get_config_value(&self.store, dotted_key, default)?)
    }
}

#[cfg(feature = "redis")]
impl CacheClient<crate::redis::RedisConnector> {
    /// Redis-backed client reading store settings from a TOML file
    pub fn from_config_file(path: impl AsRef<std::path::Path>) -> Self {
        let config: Arc<dyn ConfigProvider> =
            Arc::new(crate::config::TomlConfigProvider::from_path(path));
        let registry = ConnectionRegistry::new(crate::redis::RedisConnector::new(), config);
        Self::new(Arc::new(registry))
    }
}
