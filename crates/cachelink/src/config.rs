//! Store configuration
//!
//! Connection settings live in a TOML document with one table per store:
//!
//! ```toml
//! [default]
//! hostname = "127.0.0.1"
//! port = 6379
//! password = "secret"
//! connect_timeout = "5s"
//! retry_interval = "300ms"
//! ```
//!
//! The document is read at most once per [`TomlConfigProvider`], and the
//! parameters resolved for each store are memoized.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ConfigError, ConfigResult};

/// Port used when a store section omits one
pub const DEFAULT_PORT: u16 = 6379;

/// Upper bound for establishing the transport connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause before the single transport-level connect retry
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Credentials used for `AUTH`
///
/// The password is zeroed on drop and never printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    username: Option<String>,
    password: String,
}

impl Credential {
    /// Password-only credential (legacy `AUTH password`)
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            username: None,
            password: password.into(),
        }
    }

    /// ACL credential (`AUTH username password`)
    pub fn with_username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: password.into(),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Expose the password for the authentication command. Never log the result.
    pub fn expose_password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Immutable settings for connecting to one store
#[derive(Debug, Clone)]
pub struct ConnectionParameters {
    pub host: String,
    pub port: u16,
    pub credential: Option<Credential>,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    /// Read/write timeout applied to the socket once connected
    pub read_timeout: Option<Duration>,
}

impl ConnectionParameters {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credential: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            read_timeout: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

/// Source of per-store connection settings
pub trait ConfigProvider: Send + Sync {
    /// Connection parameters for `store`
    fn resolve(&self, store: &str) -> ConfigResult<Arc<ConnectionParameters>>;

    /// Raw value at `dotted_key` inside the store's section, `None` when any
    /// segment is missing or not a table. An empty key yields the whole section.
    fn value(&self, store: &str, dotted_key: &str) -> ConfigResult<Option<toml::Value>>;

    /// Like [`value`](Self::value), falling back to `default` for missing paths
    fn get_config_value(
        &self,
        store: &str,
        dotted_key: &str,
        default: toml::Value,
    ) -> ConfigResult<toml::Value> {
        Ok(self.value(store, dotted_key)?.unwrap_or(default))
    }
}

/// Walk a `.`-separated path through nested tables
///
/// The first segment of a dotted path is matched in lowercase, so
/// `"POOL.size"` finds `[store.pool] size`. A key without dots is matched as is.
pub fn lookup_dotted(section: &toml::Table, dotted_key: &str) -> Option<toml::Value> {
    if dotted_key.is_empty() {
        return Some(toml::Value::Table(section.clone()));
    }

    let Some((first, rest)) = dotted_key.split_once('.') else {
        return section.get(dotted_key).cloned();
    };

    let mut current = section.get(first.to_lowercase().as_str())?;
    for segment in rest.split('.') {
        current = current.as_table()?.get(segment)?;
    }
    Some(current.clone())
}

#[derive(Debug)]
enum ConfigSource {
    File(PathBuf),
    Inline,
}

/// [`ConfigProvider`] backed by a TOML document
#[derive(Debug)]
pub struct TomlConfigProvider {
    source: ConfigSource,
    document: OnceCell<toml::Table>,
    resolved: DashMap<String, Arc<ConnectionParameters>>,
}

impl TomlConfigProvider {
    /// Provider that reads `path` lazily on first use
    ///
    /// A failed read is reported to the caller and retried on the next lookup.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            source: ConfigSource::File(path.as_ref().to_path_buf()),
            document: OnceCell::new(),
            resolved: DashMap::new(),
        }
    }

    /// Provider over an in-memory TOML document
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let table: toml::Table = toml::from_str(content)?;
        Ok(Self::from_table(table))
    }

    pub fn from_table(table: toml::Table) -> Self {
        Self {
            source: ConfigSource::Inline,
            document: OnceCell::with_value(table),
            resolved: DashMap::new(),
        }
    }

    fn document(&self) -> ConfigResult<&toml::Table> {
        self.document.get_or_try_init(|| match &self.source {
            ConfigSource::File(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })?;
                let table: toml::Table = toml::from_str(&content)?;
                debug!(path = %path.display(), stores = table.len(), "loaded cache config");
                Ok(table)
            }
            // Inline documents are stored at construction
            ConfigSource::Inline => Ok(toml::Table::new()),
        })
    }

    fn build_parameters(&self, store: &str) -> ConfigResult<ConnectionParameters> {
        let section = self.section(store)?;
        let settings: StoreSettings = toml::Value::Table(section.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::InvalidStore {
                store: store.to_string(),
                reason: e.message().to_string(),
            })?;
        settings.into_parameters(store)
    }

    fn section(&self, store: &str) -> ConfigResult<&toml::Table> {
        let value = self
            .document()?
            .get(store)
            .ok_or_else(|| ConfigError::StoreNotFound(store.to_string()))?;

        value.as_table().ok_or_else(|| ConfigError::InvalidStore {
            store: store.to_string(),
            reason: format!("expected a table, found {}", value.type_str()),
        })
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn resolve(&self, store: &str) -> ConfigResult<Arc<ConnectionParameters>> {
        if let Some(params) = self.resolved.get(store) {
            return Ok(Arc::clone(params.value()));
        }

        // Resolution runs under the entry's shard lock, so racing first calls share one result
        let params = self
            .resolved
            .entry(store.to_string())
            .or_try_insert_with(|| self.build_parameters(store).map(Arc::new))?;
        Ok(Arc::clone(params.value()))
    }

    fn value(&self, store: &str, dotted_key: &str) -> ConfigResult<Option<toml::Value>> {
        Ok(lookup_dotted(self.section(store)?, dotted_key))
    }
}

/// On-disk shape of a store section
#[derive(Debug, Deserialize)]
struct StoreSettings {
    #[serde(alias = "host")]
    hostname: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    connect_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    retry_interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    read_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

impl StoreSettings {
    fn into_parameters(self, store: &str) -> ConfigResult<ConnectionParameters> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::InvalidStore {
                store: store.to_string(),
                reason: "hostname cannot be empty".to_string(),
            });
        }

        // An empty password means the server has no AUTH configured
        let credential = match (self.username, self.password) {
            (None, None) => None,
            (None, Some(password)) if password.is_empty() => None,
            (None, Some(password)) => Some(Credential::password(password)),
            (Some(_), None) => {
                return Err(ConfigError::InvalidStore {
                    store: store.to_string(),
                    reason: "username is set but password is missing".to_string(),
                });
            }
            (Some(_), Some(password)) if password.is_empty() => {
                return Err(ConfigError::InvalidStore {
                    store: store.to_string(),
                    reason: "username is set but password is empty".to_string(),
                });
            }
            (Some(username), Some(password)) => Some(Credential::with_username(username, password)),
        };

        let mut params = ConnectionParameters::new(self.hostname, self.port)
            .with_connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .with_retry_interval(self.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL));
        params.credential = credential;
        params.read_timeout = self.read_timeout;
        Ok(params)
    }
}
