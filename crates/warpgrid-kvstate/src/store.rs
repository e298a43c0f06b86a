//! StateStore: transactional key/value state over a relational database.
//!
//! Single-key writes run as one statement on the pool. Bulk and multi
//! operations run through [`run_batch`], one transaction per call. Every
//! call acquires its own pooled connection and releases it on return; no
//! record is cached in-process.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::codec;
use crate::config::StoreMetadata;
use crate::deadline::Deadline;
use crate::error::{StateError, StateResult};
use crate::statements::Statements;
use crate::sweeper::{self, ExpirySweeper};
use crate::txn::run_batch;
use crate::types::*;
use crate::validate::{self, ValidatedOp};

const FEATURES: &[Feature] = &[Feature::Etag, Feature::Transactional, Feature::Ttl];

/// Thread-safe state store handle. Clones share one pool and one sweeper.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Inner>,
}

struct Inner {
    pool: AnyPool,
    statements: Arc<Statements>,
    metadata: StoreMetadata,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl StateStore {
    /// Connect, create the table if needed, and start the expiry sweeper
    /// when a cleanup interval is configured.
    pub async fn init(metadata: StoreMetadata) -> StateResult<Self> {
        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new().acquire_timeout(metadata.timeout);
        if metadata.is_in_memory() {
            // Each SQLite in-memory connection is its own database.
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else if let Some(max) = metadata.max_connections {
            options = options.max_connections(max);
        }

        let pool = Deadline::after(metadata.timeout)
            .run(async { Ok(options.connect(&metadata.connection_string).await?) })
            .await?;

        let statements = Arc::new(Statements::new(&metadata.table_name));
        for ddl in statements.schema() {
            sqlx::query(&ddl).execute(&pool).await?;
        }

        let sweeper = metadata.cleanup_interval.map(|interval| {
            ExpirySweeper::spawn(pool.clone(), statements.clone(), interval, metadata.timeout)
        });

        info!(
            backend = ?metadata.backend,
            connection = %metadata.redacted_connection_string(),
            table = %metadata.table_name,
            sweeper = sweeper.is_some(),
            "state store opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                statements,
                metadata,
                sweeper: Mutex::new(sweeper),
            }),
        })
    }

    /// Parse host properties and [`init`](Self::init).
    pub async fn init_from_properties(props: &HashMap<String, String>) -> StateResult<Self> {
        Self::init(StoreMetadata::from_properties(props)?).await
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.inner.metadata
    }

    pub fn features(&self) -> &'static [Feature] {
        FEATURES
    }

    pub async fn is_sweeper_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .await
            .as_ref()
            .is_some_and(ExpirySweeper::is_running)
    }

    /// Stop the sweeper (letting an in-flight sweep finish) and close the
    /// pool. Later calls on any clone fail with [`StateError::Closed`].
    pub async fn close(&self) -> StateResult<()> {
        if let Some(sweeper) = self.inner.sweeper.lock().await.take() {
            sweeper.stop().await;
        }
        self.inner.pool.close().await;
        info!(table = %self.inner.metadata.table_name, "state store closed");
        Ok(())
    }

    pub async fn ping(&self, deadline: Deadline) -> StateResult<()> {
        self.run(deadline, async {
            sqlx::query("SELECT 1").execute(&self.inner.pool).await?;
            Ok(())
        })
        .await
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get a live record. Expired records read as absent.
    pub async fn get(&self, key: &str, deadline: Deadline) -> StateResult<Option<Record>> {
        validate::validate_key(key)?;
        self.run(deadline, async {
            let row = sqlx::query(self.inner.statements.get_sql())
                .bind(key.to_string())
                .bind(codec::now_millis())
                .fetch_optional(&self.inner.pool)
                .await?;
            row.as_ref().map(codec::decode_record).transpose()
        })
        .await
    }

    /// Get several records over one connection, in `keys` order.
    pub async fn bulk_get(
        &self,
        keys: &[String],
        deadline: Deadline,
    ) -> StateResult<Vec<Option<Record>>> {
        for key in keys {
            validate::validate_key(key)?;
        }
        self.run(deadline, async {
            let mut conn = self.inner.pool.acquire().await?;
            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                let row = sqlx::query(self.inner.statements.get_sql())
                    .bind(key.clone())
                    .bind(codec::now_millis())
                    .fetch_optional(&mut *conn)
                    .await?;
                records.push(row.as_ref().map(codec::decode_record).transpose()?);
            }
            Ok(records)
        })
        .await
    }

    // ── Single writes ──────────────────────────────────────────────

    /// Insert or overwrite one record. With an etag, fails with
    /// [`StateError::Conflict`] unless it matches the stored one.
    pub async fn set(&self, req: &SetRequest, deadline: Deadline) -> StateResult<()> {
        let op = validate::validate_set(req)?;
        self.run(deadline, async {
            let stmt = self.inner.statements.render_set(&op, codec::now_millis());
            stmt.execute(&self.inner.pool).await?;
            debug!(key = %op.key, etag_checked = op.etag.is_some(), "record set");
            Ok(())
        })
        .await
    }

    /// Delete one record. Deleting an absent key without an etag succeeds;
    /// with an etag it is a conflict.
    pub async fn delete(&self, req: &DeleteRequest, deadline: Deadline) -> StateResult<()> {
        let op = validate::validate_delete(req)?;
        self.run(deadline, async {
            let stmt = self.inner.statements.render_delete(&op, codec::now_millis());
            let removed = stmt.execute(&self.inner.pool).await?;
            debug!(key = %op.key, removed, "record deleted");
            Ok(())
        })
        .await
    }

    // ── Bulk & transactional ───────────────────────────────────────

    /// Apply all sets in one transaction. Any invalid element fails the call
    /// before a transaction is opened; the first conflict rolls it back.
    pub async fn bulk_set(&self, reqs: &[SetRequest], deadline: Deadline) -> StateResult<()> {
        let ops = reqs
            .iter()
            .map(|req| validate::validate_set(req).map(ValidatedOp::Set))
            .collect::<StateResult<Vec<_>>>()?;
        let applied = self
            .run(deadline, run_batch(&self.inner.pool, &self.inner.statements, &ops))
            .await?;
        debug!(applied, "bulk set committed");
        Ok(())
    }

    /// Apply all deletes in one transaction.
    pub async fn bulk_delete(&self, reqs: &[DeleteRequest], deadline: Deadline) -> StateResult<()> {
        let ops = reqs
            .iter()
            .map(|req| validate::validate_delete(req).map(ValidatedOp::Delete))
            .collect::<StateResult<Vec<_>>>()?;
        let applied = self
            .run(deadline, run_batch(&self.inner.pool, &self.inner.statements, &ops))
            .await?;
        debug!(applied, "bulk delete committed");
        Ok(())
    }

    /// Apply a mixed batch atomically, in order.
    pub async fn execute_multi(
        &self,
        ops: &[TransactionalOperation],
        deadline: Deadline,
    ) -> StateResult<()> {
        let validated = ops
            .iter()
            .map(validate::validate_operation)
            .collect::<StateResult<Vec<_>>>()?;
        let applied = self
            .run(
                deadline,
                run_batch(&self.inner.pool, &self.inner.statements, &validated),
            )
            .await?;
        debug!(applied, "multi committed");
        Ok(())
    }

    // ── Maintenance ────────────────────────────────────────────────

    /// Run one expiry sweep now. Returns the number of records removed.
    pub async fn sweep_expired(&self, deadline: Deadline) -> StateResult<u64> {
        self.ensure_open()?;
        let deadline = deadline.capped(self.inner.metadata.timeout);
        let removed = sweeper::sweep_once(&self.inner.pool, &self.inner.statements, deadline).await?;
        info!(table = self.inner.statements.table(), removed, "manual expiry sweep");
        Ok(removed)
    }

    fn ensure_open(&self) -> StateResult<()> {
        if self.inner.pool.is_closed() {
            return Err(StateError::Closed);
        }
        Ok(())
    }

    /// Common entry path: reject closed stores, then bound `fut` by the
    /// earlier of the caller's deadline and the configured timeout.
    async fn run<T, F>(&self, deadline: Deadline, fut: F) -> StateResult<T>
    where
        F: std::future::Future<Output = StateResult<T>>,
    {
        self.ensure_open()?;
        deadline.capped(self.inner.metadata.timeout).run(fut).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn memory_store() -> StateStore {
        let md = StoreMetadata::from_toml_str(
            r#"
connectionString = "sqlite::memory:"
cleanupIntervalInSeconds = 0
"#,
        )
        .unwrap();
        StateStore::init(md).await.unwrap()
    }

    #[tokio::test]
    async fn set_and_get() {
        let store = memory_store().await;
        store
            .set(&SetRequest::new("key1", "value1"), Deadline::none())
            .await
            .unwrap();

        let record = store.get("key1", Deadline::none()).await.unwrap().unwrap();
        assert_eq!(record.key, "key1");
        assert_eq!(record.value, StateValue::from("value1"));
        assert!(!record.etag.is_empty());
        assert_eq!(record.expires_at, None);
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let store = memory_store().await;
        assert!(store.get("nope", Deadline::none()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_with_empty_key_is_rejected() {
        let store = memory_store().await;
        let err = store.get("", Deadline::none()).await.unwrap_err();
        assert!(matches!(err, StateError::InvalidKey));
    }

    #[tokio::test]
    async fn update_in_place_rotates_etag() {
        let store = memory_store().await;
        store
            .set(&SetRequest::new("k", "v1"), Deadline::none())
            .await
            .unwrap();
        let first = store.get("k", Deadline::none()).await.unwrap().unwrap();

        store
            .set(&SetRequest::new("k", "v2"), Deadline::none())
            .await
            .unwrap();
        let second = store.get("k", Deadline::none()).await.unwrap().unwrap();

        assert_eq!(second.value, StateValue::from("v2"));
        assert_ne!(first.etag, second.etag);
    }

    #[tokio::test]
    async fn binary_values_round_trip_through_storage() {
        let store = memory_store().await;
        let bytes = vec![0u8, 1, 2, 254, 255];
        store
            .set(&SetRequest::new("bin", bytes.clone()), Deadline::none())
            .await
            .unwrap();

        let record = store.get("bin", Deadline::none()).await.unwrap().unwrap();
        assert_eq!(record.value, StateValue::Binary(bytes));
    }

    #[tokio::test]
    async fn ttl_sets_expiry_timestamp() {
        let store = memory_store().await;
        store
            .set(
                &SetRequest::new("k", "v").with_ttl(Duration::from_secs(3600)),
                Deadline::none(),
            )
            .await
            .unwrap();

        let record = store.get("k", Deadline::none()).await.unwrap().unwrap();
        let expires_at = record.expires_at.unwrap();
        assert!(expires_at > std::time::SystemTime::now());
    }

    #[tokio::test]
    async fn bulk_get_preserves_order() {
        let store = memory_store().await;
        store
            .set(&SetRequest::new("a", "1"), Deadline::none())
            .await
            .unwrap();
        store
            .set(&SetRequest::new("c", "3"), Deadline::none())
            .await
            .unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let records = store.bulk_get(&keys, Deadline::none()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].as_ref().unwrap().value, StateValue::from("1"));
        assert!(records[1].is_none());
        assert_eq!(records[2].as_ref().unwrap().value, StateValue::from("3"));
    }

    #[tokio::test]
    async fn features_and_ping() {
        let store = memory_store().await;
        assert!(store.features().contains(&Feature::Etag));
        assert!(store.features().contains(&Feature::Transactional));
        store.ping(Deadline::none()).await.unwrap();
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = memory_store().await;
        let clone = store.clone();
        store.close().await.unwrap();

        let err = clone.get("k", Deadline::none()).await.unwrap_err();
        assert!(matches!(err, StateError::Closed));
        let err = clone
            .set(&SetRequest::new("k", "v"), Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Closed));
    }
}
