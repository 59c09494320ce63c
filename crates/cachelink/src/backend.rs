//! Backend connection abstraction
//!
//! The registry, scanner and deleter only talk to the key-value server through
//! these traits. [`crate::redis`] provides the Redis implementation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{ConnectionParameters, Credential};
use crate::error::BackendError;

/// Opens transport connections to a backend
pub trait Connector: Send + Sync {
    type Connection: BackendConnection + 'static;

    /// Open a transport connection honouring the connect timeout and retry interval
    fn connect(&self, params: &ConnectionParameters) -> Result<Self::Connection, BackendError>;
}

/// Commands the cache layer needs from one open backend connection
pub trait BackendConnection: Send {
    fn authenticate(&mut self, credential: &Credential) -> Result<(), BackendError>;

    /// Switch to the logical database `index`
    fn select_namespace(&mut self, index: u32) -> Result<(), BackendError>;

    /// Liveness probe
    fn ping(&mut self) -> Result<(), BackendError>;

    /// One cursor-based enumeration step
    fn scan_cursor(
        &mut self,
        cursor: &ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, BackendError>;

    /// Delete `keys` in a single pipelined round-trip, returning how many existed
    fn delete_batch(&mut self, keys: &[String]) -> Result<u64, BackendError>;

    /// Release the underlying transport. Later commands fail with [`BackendError::Closed`].
    fn close(&mut self);
}

/// Iteration token returned by the backend's SCAN primitive
///
/// Servers may encode the cursor as an integer or as a decimal string; both
/// spellings of zero mark the end of iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCursor {
    Numeric(u64),
    Text(String),
}

impl ScanCursor {
    /// Cursor that starts a fresh iteration
    pub fn start() -> Self {
        ScanCursor::Numeric(0)
    }

    pub fn is_end(&self) -> bool {
        match self {
            ScanCursor::Numeric(n) => *n == 0,
            ScanCursor::Text(s) => s.trim() == "0",
        }
    }
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanCursor::Numeric(n) => write!(f, "{}", n),
            ScanCursor::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ScanCursor {
    fn from(value: u64) -> Self {
        ScanCursor::Numeric(value)
    }
}

impl From<&str> for ScanCursor {
    fn from(value: &str) -> Self {
        ScanCursor::Text(value.to_string())
    }
}

/// Result of one SCAN step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPage {
    pub keys: Vec<String>,
    /// Next cursor; `None` when the backend answered with a null cursor
    pub cursor: Option<ScanCursor>,
}

impl ScanPage {
    pub fn new(keys: Vec<String>, cursor: impl Into<ScanCursor>) -> Self {
        Self {
            keys,
            cursor: Some(cursor.into()),
        }
    }

    /// Page carrying a null cursor
    pub fn null_cursor(keys: Vec<String>) -> Self {
        Self { keys, cursor: None }
    }
}

/// Shared handle to a registered connection
///
/// Clones refer to the same underlying connection; commands are serialized
/// through an internal lock.
pub struct ConnectionHandle<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for ConnectionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ConnectionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

impl<T: BackendConnection> ConnectionHandle<T> {
    pub fn new(connection: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(connection)),
        }
    }

    /// Whether both handles point at the same underlying connection
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, T>, BackendError> {
        self.inner.lock().map_err(|_| BackendError::Poisoned)
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut conn = self.lock()?;
        f(&mut *conn)
    }

    pub fn ping(&self) -> Result<(), BackendError> {
        self.with_connection(|conn| conn.ping())
    }

    /// Close the connection, even if a previous holder panicked
    pub fn close(&self) {
        let mut conn = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        conn.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_cursor_in_either_encoding_ends_iteration() {
        assert!(ScanCursor::Numeric(0).is_end());
        assert!(ScanCursor::from("0").is_end());
        assert!(ScanCursor::default().is_end());

        assert!(!ScanCursor::Numeric(17).is_end());
        assert!(!ScanCursor::from("17").is_end());
        assert!(!ScanCursor::from("").is_end());
    }

    #[test]
    fn cursor_renders_as_command_argument() {
        assert_eq!(ScanCursor::Numeric(42).to_string(), "42");
        assert_eq!(ScanCursor::from("1337").to_string(), "1337");
    }

    #[test]
    fn null_cursor_page_has_no_cursor() {
        let page = ScanPage::null_cursor(vec!["a".into()]);
        assert!(page.cursor.is_none());
        assert_eq!(ScanPage::new(Vec::new(), 0u64).cursor, Some(ScanCursor::Numeric(0)));
    }
}
