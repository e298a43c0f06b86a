//! Background task that deletes expired records.
//!
//! Reads already hide expired rows; the sweeper reclaims their storage. It
//! runs on its own timer, independent of foreground traffic, and each tick is
//! one short transaction.

use std::sync::Arc;
use std::time::Duration;

use sqlx::AnyPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::codec;
use crate::deadline::Deadline;
use crate::error::StateResult;
use crate::statements::Statements;
use crate::txn::TxnExecutor;

/// Handle to a running sweep loop.
pub struct ExpirySweeper {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(
        pool: AnyPool,
        statements: Arc<Statements>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            run_sweep_loop(pool, statements, interval, timeout, shutdown_rx).await;
        });
        info!(interval_secs = interval.as_secs(), "expiry sweeper started");
        Self {
            handle,
            shutdown_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit. A sweep that is
    /// already running completes first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "expiry sweeper task failed");
        }
        info!("expiry sweeper stopped");
    }
}

async fn run_sweep_loop(
    pool: AnyPool,
    statements: Arc<Statements>,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match sweep_once(&pool, &statements, Deadline::after(timeout)).await {
                    Ok(0) => debug!(table = statements.table(), "no expired records"),
                    Ok(removed) => info!(table = statements.table(), removed, "expired records swept"),
                    Err(e) => error!(table = statements.table(), error = %e, "expiry sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                debug!("expiry sweep loop shutting down");
                break;
            }
        }
    }
}

/// Delete every record whose expiry is at or before now, in one transaction.
/// Returns the number of rows removed.
pub async fn sweep_once(
    pool: &AnyPool,
    statements: &Statements,
    deadline: Deadline,
) -> StateResult<u64> {
    deadline
        .run(async {
            let stmt = statements.render_sweep(codec::now_millis());
            let mut txn = TxnExecutor::begin(pool).await?;
            match txn.apply(&stmt).await {
                Ok(removed) => {
                    txn.commit().await?;
                    Ok(removed)
                }
                Err(e) => {
                    txn.rollback(&e).await;
                    Err(e)
                }
            }
        })
        .await
}
