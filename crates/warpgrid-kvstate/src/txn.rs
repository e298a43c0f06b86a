//! Transaction executor.
//!
//! A [`TxnExecutor`] owns one open database transaction and moves through
//! `Begun → Applying* → Committed | RolledBack`. Statements run strictly in
//! the order they are applied, so later operations in a batch observe the
//! effects of earlier ones.
//!
//! Commit only happens through [`TxnExecutor::commit`]. Every other exit
//! (an error returned by [`run_batch`], a deadline, a cancelled caller, a
//! panic) drops the inner `sqlx::Transaction`, which rolls back.

use sqlx::{Any, AnyPool, Transaction};
use tracing::{debug, warn};

use crate::codec;
use crate::error::{StateError, StateResult};
use crate::statements::{Statement, Statements};
use crate::validate::ValidatedOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Begun,
    Applying,
    Committed,
    RolledBack,
}

pub struct TxnExecutor {
    tx: Option<Transaction<'static, Any>>,
    state: TxnState,
    applied: usize,
}

impl TxnExecutor {
    /// Acquire a connection from the pool and open a transaction on it.
    pub async fn begin(pool: &AnyPool) -> StateResult<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            tx: Some(tx),
            state: TxnState::Begun,
            applied: 0,
        })
    }

    /// Number of statements applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Execute one statement inside the transaction. A statement that
    /// requires an affected row and gets none fails with a conflict; the
    /// caller must then roll back.
    pub async fn apply(&mut self, stmt: &Statement) -> StateResult<u64> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(StateError::Closed);
        };
        self.state = TxnState::Applying;
        let affected = stmt.execute(&mut **tx).await?;
        self.applied += 1;
        Ok(affected)
    }

    pub async fn commit(mut self) -> StateResult<()> {
        let Some(tx) = self.tx.take() else {
            return Err(StateError::Closed);
        };
        let result = tx.commit().await;
        self.state = if result.is_ok() {
            TxnState::Committed
        } else {
            TxnState::RolledBack
        };
        result?;
        debug!(applied = self.applied, "transaction committed");
        Ok(())
    }

    /// Roll back after `cause`. Rollback failures are logged; the caller
    /// reports `cause`.
    pub async fn rollback(mut self, cause: &StateError) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, cause = %cause, "transaction rollback failed");
            }
        }
        self.state = TxnState::RolledBack;
        debug!(applied = self.applied, cause = %cause, "transaction rolled back");
    }
}

impl Drop for TxnExecutor {
    fn drop(&mut self) {
        if matches!(self.state, TxnState::Begun | TxnState::Applying) {
            warn!(
                applied = self.applied,
                "transaction dropped before completion, rolling back"
            );
        }
    }
}

/// Apply `ops` in order inside one transaction.
///
/// Callers validate the whole batch first, so only statement failures
/// (conflicts, database errors) can occur here. The first one rolls back
/// every earlier effect and is returned. An empty batch still begins and
/// commits.
pub async fn run_batch(
    pool: &AnyPool,
    statements: &Statements,
    ops: &[ValidatedOp],
) -> StateResult<usize> {
    let mut txn = TxnExecutor::begin(pool).await?;

    for (index, op) in ops.iter().enumerate() {
        let stmt = statements.render(op, codec::now_millis());
        if let Err(e) = txn.apply(&stmt).await {
            debug!(index, key = op.key(), error = %e, "batch operation failed");
            txn.rollback(&e).await;
            return Err(e);
        }
    }

    let applied = txn.applied();
    txn.commit().await?;
    Ok(applied)
}
