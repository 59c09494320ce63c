//! # cachelink testing backend
//!
//! [`MockConnector`] is an in-memory stand-in for a Redis server. It records
//! every call, can be scripted to fail at any stage of the connection
//! lifecycle, and can replay hand-written SCAN pages.
//!
//! ```rust
//! use cachelink_testing::MockConnector;
//!
//! let backend = MockConnector::new().with_keys(["user:1", "user:2", "order:9"]);
//! assert_eq!(backend.key_count(), 3);
//! ```

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use cachelink::{
    BackendConnection, BackendError, ConnectionParameters, Connector, Credential, ScanCursor,
    ScanPage,
};
use tracing::trace;
use wildmatch::WildMatch;

/// Everything the mock backend was asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub connects: usize,
    pub authentications: Vec<Option<String>>,
    pub selects: Vec<u32>,
    pub pings: usize,
    pub scans: Vec<String>,
    /// Size of every pipelined delete batch, in order
    pub pipelines: Vec<usize>,
    pub closes: usize,
}

#[derive(Debug, Default)]
struct MockState {
    keyspace: BTreeSet<String>,
    scripted_pages: VecDeque<ScanPage>,
    endless_scan: bool,
    failing_connects: usize,
    password: Option<String>,
    reject_select: bool,
    unhealthy: bool,
    fail_pipeline_at: Option<usize>,
    calls: CallLog,
}

/// Blocks connection attempts to one host until released
#[derive(Debug, Default)]
struct ConnectGate {
    host: Option<String>,
    waiting: usize,
    open: bool,
}

/// Scripted in-memory backend
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    gate: Arc<(Mutex<ConnectGate>, Condvar)>,
    next_id: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Seed the keyspace
    pub fn with_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert_keys(keys);
        self
    }

    /// Replay these pages for the next SCAN calls instead of walking the keyspace
    pub fn with_scan_pages(self, pages: impl IntoIterator<Item = ScanPage>) -> Self {
        self.state().scripted_pages.extend(pages);
        self
    }

    /// Every SCAN returns a non-zero cursor and no keys
    pub fn with_endless_scan(self) -> Self {
        self.state().endless_scan = true;
        self
    }

    /// Require `password` on AUTH
    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.state().password = Some(password.into());
        self
    }

    /// Reject every SELECT
    pub fn with_rejected_select(self) -> Self {
        self.state().reject_select = true;
        self
    }

    /// Fail the pipelined delete with this zero-based index
    pub fn with_failing_pipeline(self, index: usize) -> Self {
        self.state().fail_pipeline_at = Some(index);
        self
    }

    /// Make connection attempts to `host` wait until [`release_connects`](Self::release_connects)
    pub fn with_gated_host(self, host: impl Into<String>) -> Self {
        lock(&self.gate.0).host = Some(host.into());
        self
    }

    pub fn insert_keys<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .keyspace
            .extend(keys.into_iter().map(Into::into));
    }

    /// Fail the next `count` connection attempts
    pub fn fail_next_connects(&self, count: usize) {
        self.state().failing_connects = count;
    }

    /// Toggle whether PING succeeds
    pub fn set_healthy(&self, healthy: bool) {
        self.state().unhealthy = !healthy;
    }

    /// Number of connect attempts currently blocked on the gate
    pub fn waiting_connects(&self) -> usize {
        lock(&self.gate.0).waiting
    }

    /// Let gated connection attempts proceed
    pub fn release_connects(&self) {
        let (gate, signal) = &*self.gate;
        lock(gate).open = true;
        signal.notify_all();
    }

    pub fn calls(&self) -> CallLog {
        self.state().calls.clone()
    }

    pub fn key_count(&self) -> usize {
        self.state().keyspace.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state().keyspace.contains(key)
    }

    fn wait_at_gate(&self, host: &str) {
        let (gate, signal) = &*self.gate;
        let mut guard = lock(gate);
        if guard.host.as_deref() != Some(host) {
            return;
        }
        guard.waiting += 1;
        while !guard.open {
            guard = signal.wait(guard).unwrap_or_else(|p| p.into_inner());
        }
        guard.waiting -= 1;
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self, params: &ConnectionParameters) -> Result<MockConnection, BackendError> {
        self.wait_at_gate(&params.host);

        let mut state = self.state();
        state.calls.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(BackendError::Unavailable(format!(
                "connection refused by {}:{}",
                params.host, params.port
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        trace!(id, host = %params.host, "mock connection opened");
        Ok(MockConnection {
            id,
            state: Arc::clone(&self.state),
            open: true,
        })
    }
}

/// Connection handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    state: Arc<Mutex<MockState>>,
    open: bool,
}

impl MockConnection {
    /// Sequence number of this connection, starting at 0
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, BackendError> {
        if !self.open {
            return Err(BackendError::Closed);
        }
        Ok(lock(&self.state))
    }
}

impl BackendConnection for MockConnection {
    fn authenticate(&mut self, credential: &Credential) -> Result<(), BackendError> {
        let mut state = self.state()?;
        state
            .calls
            .authentications
            .push(credential.username().map(str::to_string));
        match &state.password {
            Some(expected) if expected != credential.expose_password() => Err(
                BackendError::Unavailable("WRONGPASS invalid password".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn select_namespace(&mut self, index: u32) -> Result<(), BackendError> {
        let mut state = self.state()?;
        state.calls.selects.push(index);
        if state.reject_select {
            return Err(BackendError::Unavailable("ERR DB index is out of range".to_string()));
        }
        Ok(())
    }

    fn ping(&mut self) -> Result<(), BackendError> {
        let mut state = self.state()?;
        state.calls.pings += 1;
        if state.unhealthy {
            return Err(BackendError::Unavailable("connection reset by peer".to_string()));
        }
        Ok(())
    }

    fn scan_cursor(
        &mut self,
        cursor: &ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, BackendError> {
        let mut state = self.state()?;
        state.calls.scans.push(cursor.to_string());

        if let Some(page) = state.scripted_pages.pop_front() {
            return Ok(page);
        }
        if state.endless_scan {
            return Ok(ScanPage::new(Vec::new(), state.calls.scans.len() as u64));
        }

        let offset: usize = cursor
            .to_string()
            .parse()
            .map_err(|_| BackendError::MalformedReply(format!("invalid cursor {}", cursor)))?;
        let matcher = WildMatch::new(pattern);
        let keys: Vec<String> = state
            .keyspace
            .iter()
            .skip(offset)
            .take(count)
            .filter(|key| matcher.matches(key))
            .cloned()
            .collect();

        let next = offset + count;
        let next = if next >= state.keyspace.len() { 0 } else { next };
        Ok(ScanPage::new(keys, next as u64))
    }

    fn delete_batch(&mut self, keys: &[String]) -> Result<u64, BackendError> {
        let mut state = self.state()?;
        let index = state.calls.pipelines.len();
        state.calls.pipelines.push(keys.len());
        if state.fail_pipeline_at == Some(index) {
            return Err(BackendError::Unavailable("broken pipe".to_string()));
        }

        let removed = keys.iter().filter(|key| state.keyspace.remove(*key)).count();
        Ok(removed as u64)
    }

    fn close(&mut self) {
        if self.open {
            lock(&self.state).calls.closes += 1;
            self.open = false;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
