//! Operation validation.
//!
//! Turns loosely shaped requests into owned descriptors that the statement
//! builder can render without further checks. Nothing here touches storage.

use std::time::Duration;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// A validated upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOp {
    pub key: String,
    pub value: StateValue,
    pub etag: Option<Etag>,
    pub ttl: Option<Duration>,
    pub concurrency: Concurrency,
}

/// A validated delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOp {
    pub key: String,
    pub etag: Option<Etag>,
}

/// A validated operation, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedOp {
    Set(SetOp),
    Delete(DeleteOp),
}

impl ValidatedOp {
    pub fn key(&self) -> &str {
        match self {
            ValidatedOp::Set(op) => &op.key,
            ValidatedOp::Delete(op) => &op.key,
        }
    }
}

pub fn validate_key(key: &str) -> StateResult<()> {
    if key.is_empty() {
        return Err(StateError::InvalidKey);
    }
    Ok(())
}

pub fn validate_set(req: &SetRequest) -> StateResult<SetOp> {
    validate_key(&req.key)?;
    if req.value.is_empty() {
        return Err(StateError::InvalidValue(req.key.clone()));
    }
    Ok(SetOp {
        key: req.key.clone(),
        value: req.value.clone(),
        etag: normalize_etag(req.etag.as_deref()),
        ttl: req.ttl,
        concurrency: req.concurrency,
    })
}

pub fn validate_delete(req: &DeleteRequest) -> StateResult<DeleteOp> {
    validate_key(&req.key)?;
    Ok(DeleteOp {
        key: req.key.clone(),
        etag: normalize_etag(req.etag.as_deref()),
    })
}

/// Validate one entry of a transactional batch.
pub fn validate_operation(op: &TransactionalOperation) -> StateResult<ValidatedOp> {
    match (&op.operation, &op.request) {
        (OperationKind::Upsert, RequestPayload::Set(req)) => validate_set(req).map(ValidatedOp::Set),
        (OperationKind::Delete, RequestPayload::Delete(req)) => {
            validate_delete(req).map(ValidatedOp::Delete)
        }
        (OperationKind::Upsert, RequestPayload::Delete(_)) => Err(StateError::OperationMismatch {
            kind: "upsert",
            payload: "delete",
        }),
        (OperationKind::Delete, RequestPayload::Set(_)) => Err(StateError::OperationMismatch {
            kind: "delete",
            payload: "set",
        }),
        (OperationKind::Other(kind), _) => Err(StateError::UnsupportedOperation(kind.clone())),
    }
}

/// An empty etag means "no etag".
fn normalize_etag(etag: Option<&str>) -> Option<Etag> {
    etag.filter(|e| !e.is_empty()).map(str::to_string)
}
