//! Decoding of raw SCAN replies
//!
//! SCAN is decoded from a raw [`redis::Value`] rather than through
//! `FromRedisValue` so that a nil cursor stays distinguishable from cursor 0.

use redis::Value;

use crate::backend::{ScanCursor, ScanPage};
use crate::error::BackendError;

/// Decode a `[cursor, [key, ...]]` SCAN reply
pub fn parse_scan_reply(reply: Value) -> Result<ScanPage, BackendError> {
    let mut parts = match reply {
        Value::Array(parts) => parts,
        other => {
            return Err(BackendError::MalformedReply(format!(
                "expected a two-element array, got {:?}",
                other
            )));
        }
    };
    if parts.len() != 2 {
        return Err(BackendError::MalformedReply(format!(
            "expected 2 elements in SCAN reply, got {}",
            parts.len()
        )));
    }

    let keys_value = parts.pop().unwrap_or(Value::Nil);
    let cursor_value = parts.pop().unwrap_or(Value::Nil);

    let keys: Vec<String> = match keys_value {
        Value::Nil => Vec::new(),
        other => redis::from_redis_value(&other)
            .map_err(|e| BackendError::MalformedReply(format!("unreadable key list: {}", e)))?,
    };

    Ok(ScanPage {
        keys,
        cursor: parse_cursor(cursor_value)?,
    })
}

fn parse_cursor(value: Value) -> Result<Option<ScanCursor>, BackendError> {
    match value {
        Value::Nil => Ok(None),
        Value::Int(n) => u64::try_from(n)
            .map(|n| Some(ScanCursor::Numeric(n)))
            .map_err(|_| BackendError::MalformedReply(format!("negative cursor {}", n))),
        Value::BulkString(bytes) => String::from_utf8(bytes)
            .map(|s| Some(ScanCursor::Text(s)))
            .map_err(|_| BackendError::MalformedReply("cursor is not valid UTF-8".to_string())),
        Value::SimpleString(s) => Ok(Some(ScanCursor::Text(s))),
        other => Err(BackendError::MalformedReply(format!(
            "unexpected cursor value {:?}",
            other
        ))),
    }
}
