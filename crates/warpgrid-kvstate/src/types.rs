//! Request and record types for the WarpGrid key/value state store.
//!
//! Requests arrive either already typed ([`SetRequest`], [`DeleteRequest`])
//! or wrapped in a [`TransactionalOperation`] envelope, which is the JSON shape
//! used by hosts and the `warpkv` CLI for multi-operation batches.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Opaque version token attached to every stored record.
pub type Etag = String;

// ── Values ─────────────────────────────────────────────────────────

/// Payload of a record. The store never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Text(String),
    Binary(Vec<u8>),
}

impl StateValue {
    pub fn is_empty(&self) -> bool {
        match self {
            StateValue::Text(s) => s.is_empty(),
            StateValue::Binary(b) => b.is_empty(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            StateValue::Text(s) => s.as_bytes(),
            StateValue::Binary(b) => b,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, StateValue::Binary(_))
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Text(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::Text(s)
    }
}

impl From<Vec<u8>> for StateValue {
    fn from(b: Vec<u8>) -> Self {
        StateValue::Binary(b)
    }
}

// ── Requests ───────────────────────────────────────────────────────

/// Write policy applied when a request carries no etag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    /// Only write if no live record exists for the key.
    FirstWrite,
    /// Overwrite unconditionally.
    #[default]
    LastWrite,
}

/// Insert-or-overwrite request for a single key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRequest {
    #[serde(default)]
    pub key: String,
    pub value: StateValue,
    /// Expected current etag. `None` (or empty) means no etag check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
    /// Time to live, relative to the moment the write executes.
    #[serde(
        default,
        rename = "ttlInSeconds",
        with = "ttl_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,
    #[serde(default)]
    pub concurrency: Concurrency,
}

impl SetRequest {
    pub fn new(key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            etag: None,
            ttl: None,
            concurrency: Concurrency::LastWrite,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<Etag>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Removal request for a single key.
///
/// Unknown fields are rejected so a payload carrying a `value` can never be
/// read as a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeleteRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
}

impl DeleteRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<Etag>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

// ── Transactional envelope ─────────────────────────────────────────

/// Declared kind of a [`TransactionalOperation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    Upsert,
    Delete,
    /// Any tag the store does not understand. Always rejected.
    Other(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Upsert => "upsert",
            OperationKind::Delete => "delete",
            OperationKind::Other(s) => s,
        }
    }
}

impl From<String> for OperationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "upsert" => OperationKind::Upsert,
            "delete" => OperationKind::Delete,
            _ => OperationKind::Other(s),
        }
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload carried by a [`TransactionalOperation`].
///
/// Deserialization tries the set shape first (it requires `value`), so a
/// payload without a value is read as a delete request. A payload whose
/// `value` is neither a string nor a byte array matches no variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestPayload {
    Set(SetRequest),
    Delete(DeleteRequest),
}

/// One entry of a multi-operation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionalOperation {
    pub operation: OperationKind,
    pub request: RequestPayload,
}

impl TransactionalOperation {
    pub fn upsert(request: SetRequest) -> Self {
        Self {
            operation: OperationKind::Upsert,
            request: RequestPayload::Set(request),
        }
    }

    pub fn delete(request: DeleteRequest) -> Self {
        Self {
            operation: OperationKind::Delete,
            request: RequestPayload::Delete(request),
        }
    }
}

// ── Records ────────────────────────────────────────────────────────

/// A live record as returned by reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub key: String,
    pub value: StateValue,
    pub etag: Etag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<SystemTime>,
}

/// Optional capabilities advertised by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Etag,
    Transactional,
    Ttl,
}

/// `Option<Duration>` as whole seconds on the wire.
mod ttl_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}
