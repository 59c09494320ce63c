//! Per-(store, database) connection registry with health checks
//!
//! Each [`ConnectionKey`] owns at most one live connection. A connection that
//! was verified within the health check interval is handed out without any
//! round-trip; an older one is pinged first and replaced if the ping fails.
//!
//! ```text
//! Absent --create--> Fresh --interval elapsed--> Stale --ping ok--> Fresh
//!                                                  |
//!                                                  +--ping fails--> recreate --> Fresh | Absent + error
//! ```
//!
//! Creation, probing and reconnection for a key run under that key's own
//! lock, so concurrent callers of one key never open duplicate connections
//! while callers of other keys proceed independently.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::backend::{BackendConnection, ConnectionHandle, Connector};
use crate::config::ConfigProvider;
use crate::error::{CacheError, CacheResult, ConnectStage};

/// How long a verified connection is trusted without another ping
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Identifies one pooled connection: a named store and a logical database index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub store: String,
    pub index: u32,
}

impl ConnectionKey {
    pub fn new(store: impl Into<String>, index: u32) -> Self {
        Self {
            store: store.into(),
            index,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.index)
    }
}

/// Observable state of a registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection registered
    Absent,
    /// Verified within the health check interval
    Fresh,
    /// Due for a liveness probe on the next acquire
    Stale,
}

/// A registered connection and when it was last known to be alive
struct ConnectionEntry<T> {
    handle: ConnectionHandle<T>,
    last_checked_at: Instant,
}

impl<T: BackendConnection> ConnectionEntry<T> {
    fn new(connection: T) -> Self {
        Self {
            handle: ConnectionHandle::new(connection),
            last_checked_at: Instant::now(),
        }
    }

    fn is_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_checked_at) > interval
    }

    fn state(&self, now: Instant, interval: Duration) -> ConnectionState {
        if self.is_due(now, interval) {
            ConnectionState::Stale
        } else {
            ConnectionState::Fresh
        }
    }
}

type Slot<T> = Arc<Mutex<Option<ConnectionEntry<T>>>>;

/// Owns every live connection, keyed by (store, database index)
pub struct ConnectionRegistry<C: Connector> {
    connector: C,
    config: Arc<dyn ConfigProvider>,
    health_check_interval: Duration,
    slots: DashMap<ConnectionKey, Slot<C::Connection>>,
}

impl<C: Connector> ConnectionRegistry<C> {
    pub fn new(connector: C, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            connector,
            config,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            slots: DashMap::new(),
        }
    }

    /// Configure how long a connection is trusted between pings
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    pub fn config(&self) -> &Arc<dyn ConfigProvider> {
        &self.config
    }

    /// Get the connection for `(store, index)`, creating or reviving it as needed
    pub fn acquire(&self, store: &str, index: u32) -> CacheResult<ConnectionHandle<C::Connection>> {
        let key = ConnectionKey::new(store, index);
        let slot = self.slot(&key);
        let mut guard = lock_slot(&slot, &key)?;
        let now = Instant::now();

        if let Some(entry) = guard.as_mut() {
            if !entry.is_due(now, self.health_check_interval) {
                return Ok(entry.handle.clone());
            }

            match entry.handle.ping() {
                Ok(()) => {
                    entry.last_checked_at = now;
                    debug!(%key, "connection passed health check");
                    return Ok(entry.handle.clone());
                }
                Err(e) => warn!(%key, error = %e, "health check failed, reconnecting"),
            }

            // Drop the stale entry before recreating so a failed attempt leaves the slot empty
            if let Some(stale) = guard.take() {
                stale.handle.close();
            }
        }

        let entry = match self.create(&key) {
            Ok(entry) => entry,
            Err(e) => {
                drop(guard);
                self.discard_if_unused(&key, &slot);
                return Err(e);
            }
        };
        let handle = entry.handle.clone();
        *guard = Some(entry);
        Ok(handle)
    }

    /// Current state of the slot for `(store, index)` without touching the backend
    pub fn state(&self, store: &str, index: u32) -> ConnectionState {
        let key = ConnectionKey::new(store, index);
        let Some(slot) = self.slots.get(&key).map(|s| Arc::clone(s.value())) else {
            return ConnectionState::Absent;
        };
        let guard = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .map(|entry| entry.state(Instant::now(), self.health_check_interval))
            .unwrap_or(ConnectionState::Absent)
    }

    /// Close and forget the connection for `(store, index)`; returns whether one existed
    pub fn remove(&self, store: &str, index: u32) -> CacheResult<bool> {
        let key = ConnectionKey::new(store, index);
        let Some(slot) = self.slots.get(&key).map(|s| Arc::clone(s.value())) else {
            return Ok(false);
        };
        let mut guard = lock_slot(&slot, &key)?;
        let removed = match guard.take() {
            Some(entry) => {
                entry.handle.close();
                debug!(%key, "connection removed");
                true
            }
            None => false,
        };
        drop(guard);
        self.discard_if_unused(&key, &slot);
        Ok(removed)
    }

    /// Close every registered connection
    pub fn close_all(&self) {
        let slots: Vec<_> = self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        let mut closed = 0;
        for slot in slots {
            let mut guard = match slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(entry) = guard.take() {
                entry.handle.close();
                closed += 1;
            }
        }
        // Slots still referenced belong to callers mid-acquire
        self.slots
            .retain(|_, slot| Arc::strong_count(slot) > 1 || !is_empty_slot(slot));
        info!(closed, "closed cache connections");
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        let slots: Vec<_> = self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        slots
            .iter()
            .filter(|slot| slot.lock().map(|guard| guard.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &ConnectionKey) -> Slot<C::Connection> {
        // Clone the Arc out so the map shard is not held while connecting
        Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }

    /// Drop `slot` from the map when it is empty and only `held` and the map reference it
    fn discard_if_unused(&self, key: &ConnectionKey, held: &Slot<C::Connection>) {
        // New references are only handed out under the shard lock that remove_if holds
        self.slots.remove_if(key, |_, slot| {
            Arc::ptr_eq(slot, held) && Arc::strong_count(slot) == 2 && is_empty_slot(slot)
        });
    }

    fn create(&self, key: &ConnectionKey) -> CacheResult<ConnectionEntry<C::Connection>> {
        let params = self.config.resolve(&key.store)?;

        let mut conn = self
            .connector
            .connect(&params)
            .map_err(|e| CacheError::connection(key, ConnectStage::Connect, e))?;

        let prepared = match &params.credential {
            Some(credential) => conn
                .authenticate(credential)
                .map_err(|e| (ConnectStage::Authenticate, e)),
            None => Ok(()),
        }
        .and_then(|()| {
            conn.select_namespace(key.index)
                .map_err(|e| (ConnectStage::SelectNamespace, e))
        });

        if let Err((stage, source)) = prepared {
            conn.close();
            return Err(CacheError::connection(key, stage, source));
        }

        info!(%key, host = %params.host, port = params.port, "connection established");
        Ok(ConnectionEntry::new(conn))
    }
}

impl<C: Connector> fmt::Debug for ConnectionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("health_check_interval", &self.health_check_interval)
            .field("slots", &self.slots.len())
            .finish()
    }
}

fn is_empty_slot<T>(slot: &Mutex<Option<ConnectionEntry<T>>>) -> bool {
    match slot.try_lock() {
        Ok(guard) => guard.is_none(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_none(),
        Err(TryLockError::WouldBlock) => false,
    }
}

fn lock_slot<'a, T>(
    slot: &'a Mutex<Option<ConnectionEntry<T>>>,
    key: &ConnectionKey,
) -> CacheResult<MutexGuard<'a, Option<ConnectionEntry<T>>>> {
    slot.lock().map_err(|_| CacheError::Poisoned {
        resource: format!("connection slot {}", key),
    })
}
