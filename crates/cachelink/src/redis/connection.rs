//! Synchronous Redis connections

use std::thread;

use redis::{ErrorKind as RedisErrorKind, RedisError};
use tracing::{debug, warn};

use crate::backend::{BackendConnection, Connector, ScanCursor, ScanPage};
use crate::config::{ConnectionParameters, Credential};
use crate::error::BackendError;

use super::reply::parse_scan_reply;

/// Opens [`RedisConnection`]s over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }

    fn open(params: &ConnectionParameters) -> redis::RedisResult<redis::Connection> {
        let client = redis::Client::open((params.host.clone(), params.port))?;
        let conn = client.get_connection_with_timeout(params.connect_timeout)?;
        if let Some(timeout) = params.read_timeout {
            conn.set_read_timeout(Some(timeout))?;
            conn.set_write_timeout(Some(timeout))?;
        }
        Ok(conn)
    }
}

impl Connector for RedisConnector {
    type Connection = RedisConnection;

    fn connect(&self, params: &ConnectionParameters) -> Result<RedisConnection, BackendError> {
        let conn = retry_once(params, || Self::open(params))?;

        debug!(host = %params.host, port = params.port, "redis transport connected");
        Ok(RedisConnection { inner: Some(conn) })
    }
}

/// Run `open`, and once more after `retry_interval` if it failed transiently
fn retry_once<T>(
    params: &ConnectionParameters,
    mut open: impl FnMut() -> redis::RedisResult<T>,
) -> redis::RedisResult<T> {
    match open() {
        Err(e) if !params.retry_interval.is_zero() && is_transient(&e) => {
            warn!(
                host = %params.host,
                port = params.port,
                error = %e,
                retry_in = ?params.retry_interval,
                "connect failed, retrying once"
            );
            thread::sleep(params.retry_interval);
            open()
        }
        result => result,
    }
}

fn is_transient(error: &RedisError) -> bool {
    error.is_io_error() || error.is_timeout() || error.is_connection_refusal()
}

/// One open Redis connection
pub struct RedisConnection {
    inner: Option<redis::Connection>,
}

impl RedisConnection {
    /// The underlying `redis` connection, for commands beyond the cache layer's own
    ///
    /// ```rust,no_run
    /// # fn demo(handle: cachelink::ConnectionHandle<cachelink::RedisConnection>) -> Result<(), cachelink::BackendError> {
    /// use redis::Commands;
    ///
    /// let hits: u64 = handle.with_connection(|c| Ok(c.redis()?.incr("hits", 1)?))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn redis(&mut self) -> Result<&mut redis::Connection, BackendError> {
        self.inner.as_mut().ok_or(BackendError::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

impl BackendConnection for RedisConnection {
    fn authenticate(&mut self, credential: &Credential) -> Result<(), BackendError> {
        let conn = self.redis()?;
        let mut cmd = redis::cmd("AUTH");
        if let Some(username) = credential.username() {
            cmd.arg(username);
        }
        cmd.arg(credential.expose_password());

        // Reported without the server's message so no argument echo reaches the logs
        cmd.query::<()>(conn).map_err(|e| match e.kind() {
            RedisErrorKind::AuthenticationFailed => {
                BackendError::Unavailable("authentication failed".to_string())
            }
            _ => BackendError::from(e),
        })
    }

    fn select_namespace(&mut self, index: u32) -> Result<(), BackendError> {
        let conn = self.redis()?;
        redis::cmd("SELECT").arg(index).query::<()>(conn)?;
        Ok(())
    }

    fn ping(&mut self) -> Result<(), BackendError> {
        let conn = self.redis()?;
        let reply: String = redis::cmd("PING").query(conn)?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(BackendError::MalformedReply(format!(
                "unexpected PING reply '{}'",
                reply
            )))
        }
    }

    fn scan_cursor(
        &mut self,
        cursor: &ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, BackendError> {
        let conn = self.redis()?;
        let reply: redis::Value = redis::cmd("SCAN")
            .arg(cursor.to_string())
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query(conn)?;
        parse_scan_reply(reply)
    }

    fn delete_batch(&mut self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let conn = self.redis()?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.del(key);
        }
        let removed: Vec<u64> = pipe.query(conn)?;
        Ok(removed.into_iter().sum())
    }

    fn close(&mut self) {
        // Dropping the connection closes the socket
        if self.inner.take().is_some() {
            debug!("redis connection closed");
        }
    }
}
