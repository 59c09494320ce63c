//! Pattern-based key enumeration over cursor-based SCAN

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::{BackendConnection, ConnectionHandle, ScanCursor};
use crate::error::{BackendError, CacheError, CacheResult};

/// Keys requested per SCAN call
pub const DEFAULT_SCAN_COUNT: usize = 5000;

/// Wall-clock budget for a whole scan
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Enumerates every key matching a glob pattern
///
/// `count` is a hint passed to the server: larger values mean fewer round-trips
/// but a longer block per call. 5000 to 10000 suits most workloads; push it
/// toward 10000 when concurrency is low.
///
/// The timeout is checked before each round-trip, so one slow call can overrun
/// it by that call's duration. Keys are collected into a set because the server
/// may repeat keys across pages when the keyspace changes mid-scan.
#[derive(Debug, Clone)]
pub struct KeyScanner {
    count: usize,
    timeout: Duration,
}

impl Default for KeyScanner {
    fn default() -> Self {
        Self {
            count: DEFAULT_SCAN_COUNT,
            timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl KeyScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call count hint (values below 1 are raised to 1)
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Collect all keys matching `pattern`
    pub fn scan<T: BackendConnection>(
        &self,
        connection: &ConnectionHandle<T>,
        pattern: &str,
    ) -> CacheResult<HashSet<String>> {
        let started = Instant::now();
        let mut cursor = ScanCursor::start();
        let mut keys = HashSet::new();
        let mut calls = 0;

        loop {
            let elapsed = started.elapsed();
            if elapsed > self.timeout {
                return Err(CacheError::ScanTimeout {
                    pattern: pattern.to_string(),
                    timeout: self.timeout,
                    elapsed,
                    calls,
                });
            }

            let page = connection
                .with_connection(|conn| conn.scan_cursor(&cursor, pattern, self.count))
                .map_err(|e| scan_failure(pattern, e))?;
            calls += 1;
            keys.extend(page.keys);

            match page.cursor {
                Some(next) if next.is_end() => break,
                Some(next) => cursor = next,
                None => {
                    return Err(CacheError::Protocol {
                        pattern: pattern.to_string(),
                        reason: format!("null cursor after {} calls", calls),
                    });
                }
            }
        }

        debug!(
            pattern,
            calls,
            matched = keys.len(),
            elapsed = ?started.elapsed(),
            "scan complete"
        );
        Ok(keys)
    }
}

fn scan_failure(pattern: &str, error: BackendError) -> CacheError {
    match error {
        BackendError::MalformedReply(reason) => CacheError::Protocol {
            pattern: pattern.to_string(),
            reason,
        },
        source => CacheError::Command {
            operation: "SCAN",
            source,
        },
    }
}
