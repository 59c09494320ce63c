//! Redis backend
//!
//! Synchronous connections opened through the `redis` crate:
//! - [`RedisConnector`] opens a TCP connection with a bounded connect timeout
//!   and one retry after the configured retry interval
//! - [`RedisConnection`] implements AUTH, SELECT, PING, SCAN and pipelined DEL

pub mod connection;
pub mod reply;

pub use connection::{RedisConnection, RedisConnector};
pub use reply::parse_scan_reply;
