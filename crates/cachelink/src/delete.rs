//! Batched, pipelined deletion of every key matching a pattern

use tracing::{debug, warn};

use crate::backend::{BackendConnection, ConnectionHandle};
use crate::error::{CacheError, CacheResult};
use crate::scan::KeyScanner;

/// Keys deleted per pipelined round-trip
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 1000;

/// Outcome of [`BulkDeleter::delete_matching`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Keys the scan resolved the pattern to
    pub matched: usize,
    /// Pipelined batches executed
    pub batches: usize,
    /// Keys the backend reported as actually removed
    pub removed: u64,
}

/// Resolves a pattern with a [`KeyScanner`] and deletes the keys in bounded batches
///
/// Each batch is one pipelined round-trip. The first failing batch aborts the
/// run; batches already executed are not rolled back.
#[derive(Debug, Clone)]
pub struct BulkDeleter {
    scanner: KeyScanner,
    batch_size: usize,
}

impl Default for BulkDeleter {
    fn default() -> Self {
        Self {
            scanner: KeyScanner::default(),
            batch_size: DEFAULT_DELETE_BATCH_SIZE,
        }
    }
}

impl BulkDeleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the keys per batch (values below 1 are raised to 1)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_scanner(mut self, scanner: KeyScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn scanner(&self) -> &KeyScanner {
        &self.scanner
    }

    /// Delete every key matching `pattern`
    pub fn delete_matching<T: BackendConnection>(
        &self,
        connection: &ConnectionHandle<T>,
        pattern: &str,
    ) -> CacheResult<DeleteSummary> {
        let mut keys: Vec<String> = self.scanner.scan(connection, pattern)?.into_iter().collect();
        if keys.is_empty() {
            debug!(pattern, "no keys matched, nothing to delete");
            return Ok(DeleteSummary::default());
        }
        keys.sort_unstable();

        debug!(
            pattern,
            matched = keys.len(),
            batches = batch_count(keys.len(), self.batch_size),
            "deleting matched keys"
        );

        let mut summary = DeleteSummary {
            matched: keys.len(),
            ..DeleteSummary::default()
        };

        for (batch, chunk) in keys.chunks(self.batch_size).enumerate() {
            let removed = connection
                .with_connection(|conn| conn.delete_batch(chunk))
                .map_err(|source| {
                    warn!(pattern, batch, completed = summary.batches, error = %source, "delete batch failed");
                    CacheError::BatchFailed {
                        batch,
                        completed: summary.batches,
                        source,
                    }
                })?;
            summary.batches += 1;
            summary.removed += removed;
        }

        debug!(
            pattern,
            matched = summary.matched,
            batches = summary.batches,
            removed = summary.removed,
            "bulk delete complete"
        );
        Ok(summary)
    }
}

/// Number of batches `keys` splits into at `batch_size`
pub fn batch_count(keys: usize, batch_size: usize) -> usize {
    keys.div_ceil(batch_size.max(1))
}
