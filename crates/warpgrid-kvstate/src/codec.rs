//! Record codec: maps values and expiry metadata to and from table columns.
//!
//! Timestamps are stored as unix milliseconds in `BIGINT` columns so the same
//! schema works on PostgreSQL and SQLite. Binary payloads are base64-encoded
//! into the textual `value` column and flagged with `isbinary = 1`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sqlx::Row;
use sqlx::any::AnyRow;

use crate::error::{StateError, StateResult};
use crate::types::{Record, StateValue};

/// Column form of a [`StateValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub text: String,
    pub is_binary: i64,
}

pub fn encode_value(value: &StateValue) -> EncodedValue {
    match value {
        StateValue::Text(s) => EncodedValue {
            text: s.clone(),
            is_binary: 0,
        },
        StateValue::Binary(b) => EncodedValue {
            text: STANDARD.encode(b),
            is_binary: 1,
        },
    }
}

pub fn decode_value(key: &str, text: String, is_binary: i64) -> StateResult<StateValue> {
    if is_binary == 0 {
        return Ok(StateValue::Text(text));
    }
    STANDARD
        .decode(text.as_bytes())
        .map(StateValue::Binary)
        .map_err(|e| StateError::Decode(format!("binary value for key {key:?}: {e}")))
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    to_millis(SystemTime::now())
}

pub fn to_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub fn from_millis(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

/// Absolute expiry for a write executing at `now`.
pub fn expires_at(now: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(ttl_ms)
    })
}

/// Decode a row produced by the `get` statement.
pub fn decode_record(row: &AnyRow) -> StateResult<Record> {
    let key: String = row.try_get("key")?;
    let text: String = row.try_get("value")?;
    let is_binary: i64 = row.try_get("isbinary")?;
    let etag: String = row.try_get("etag")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;

    let value = decode_value(&key, text, is_binary)?;
    Ok(Record {
        key,
        value,
        etag,
        expires_at: expires_at.map(from_millis),
    })
}
