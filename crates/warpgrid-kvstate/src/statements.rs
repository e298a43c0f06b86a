//! SQL statement builder.
//!
//! All statements are rendered once per table by [`Statements::new`] and use
//! `$n` placeholders, which both PostgreSQL and SQLite accept. Liveness of a
//! row is always evaluated against a `now` bound by the caller, so reads and
//! conditional writes agree on what "expired" means for a given execution.
//!
//! Table layout (timestamps are unix milliseconds):
//!
//! ```text
//! key          TEXT    PRIMARY KEY
//! value        TEXT    payload, base64 when isbinary = 1
//! isbinary     BIGINT
//! etag         TEXT    rotated on every write
//! insert_time  BIGINT
//! update_time  BIGINT  NULL until the first overwrite
//! expires_at   BIGINT  NULL = never expires
//! ```

use sqlx::Any;

use crate::codec::{self, EncodedValue};
use crate::error::{StateError, StateResult};
use crate::types::Concurrency;
use crate::validate::{DeleteOp, SetOp, ValidatedOp};

/// Bound argument of a rendered statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Text(String),
    Int(i64),
    NullableInt(Option<i64>),
}

/// How many rows a statement must affect to count as applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Any count, including zero.
    Any,
    /// Exactly one row; zero means the etag (or first-write) check failed.
    One,
}

/// A parameterized statement plus its bound arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Arg>,
    pub expect: Expect,
    /// Key the statement targets, for error reporting.
    pub key: Option<String>,
}

impl Statement {
    /// Execute against any connection or transaction and enforce [`Expect`].
    pub async fn execute<'c, E>(&self, executor: E) -> StateResult<u64>
    where
        E: sqlx::Executor<'c, Database = Any>,
    {
        let mut query = sqlx::query::<Any>(&self.sql);
        for arg in &self.args {
            query = match arg {
                Arg::Text(s) => query.bind(s.clone()),
                Arg::Int(i) => query.bind(*i),
                Arg::NullableInt(i) => query.bind(*i),
            };
        }
        let affected = query.execute(executor).await?.rows_affected();

        if self.expect == Expect::One && affected == 0 {
            return Err(StateError::Conflict(self.key.clone().unwrap_or_default()));
        }
        Ok(affected)
    }
}

/// Pre-rendered SQL for one state table.
#[derive(Debug, Clone)]
pub struct Statements {
    table: String,
    upsert: String,
    insert_first_write: String,
    update_with_etag: String,
    delete: String,
    delete_with_etag: String,
    get: String,
    sweep: String,
}

impl Statements {
    /// Render statements for `table`. The name must already be a validated
    /// identifier; it is interpolated, not bound.
    pub fn new(table: &str) -> Self {
        let live = format!("({table}.expires_at IS NULL OR {table}.expires_at > $");
        Self {
            upsert: format!(
                "INSERT INTO {table} (key, value, isbinary, etag, insert_time, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, \
                 isbinary = excluded.isbinary, etag = excluded.etag, \
                 update_time = excluded.insert_time, expires_at = excluded.expires_at"
            ),
            // An expired row still occupies the key; first-write may replace it.
            insert_first_write: format!(
                "INSERT INTO {table} (key, value, isbinary, etag, insert_time, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value, \
                 isbinary = excluded.isbinary, etag = excluded.etag, \
                 insert_time = excluded.insert_time, update_time = NULL, \
                 expires_at = excluded.expires_at \
                 WHERE {table}.expires_at IS NOT NULL AND {table}.expires_at <= $7"
            ),
            update_with_etag: format!(
                "UPDATE {table} SET value = $1, isbinary = $2, etag = $3, update_time = $4, \
                 expires_at = $5 WHERE key = $6 AND etag = $7 AND {live}8)"
            ),
            delete: format!("DELETE FROM {table} WHERE key = $1"),
            delete_with_etag: format!(
                "DELETE FROM {table} WHERE key = $1 AND etag = $2 AND {live}3)"
            ),
            get: format!(
                "SELECT key, value, isbinary, etag, expires_at FROM {table} \
                 WHERE key = $1 AND {live}2)"
            ),
            sweep: format!(
                "DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= $1"
            ),
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// DDL executed at startup. Idempotent.
    pub fn schema(&self) -> Vec<String> {
        let table = &self.table;
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 key TEXT NOT NULL PRIMARY KEY, \
                 value TEXT NOT NULL, \
                 isbinary BIGINT NOT NULL DEFAULT 0, \
                 etag TEXT NOT NULL, \
                 insert_time BIGINT NOT NULL, \
                 update_time BIGINT NULL, \
                 expires_at BIGINT NULL)"
            ),
            format!("CREATE INDEX IF NOT EXISTS {table}_expires_at_idx ON {table} (expires_at)"),
        ]
    }

    /// SQL for a point read; bind `key`, then `now`.
    pub fn get_sql(&self) -> &str {
        &self.get
    }

    pub fn render(&self, op: &ValidatedOp, now: i64) -> Statement {
        match op {
            ValidatedOp::Set(set) => self.render_set(set, now),
            ValidatedOp::Delete(del) => self.render_delete(del, now),
        }
    }

    pub fn render_set(&self, op: &SetOp, now: i64) -> Statement {
        let EncodedValue { text, is_binary } = codec::encode_value(&op.value);
        let expires_at = codec::expires_at(now, op.ttl);
        let new_etag = new_etag();
        let key = Some(op.key.clone());

        if let Some(etag) = &op.etag {
            return Statement {
                sql: self.update_with_etag.clone(),
                args: vec![
                    Arg::Text(text),
                    Arg::Int(is_binary),
                    Arg::Text(new_etag),
                    Arg::Int(now),
                    Arg::NullableInt(expires_at),
                    Arg::Text(op.key.clone()),
                    Arg::Text(etag.clone()),
                    Arg::Int(now),
                ],
                expect: Expect::One,
                key,
            };
        }

        let mut args = vec![
            Arg::Text(op.key.clone()),
            Arg::Text(text),
            Arg::Int(is_binary),
            Arg::Text(new_etag),
            Arg::Int(now),
            Arg::NullableInt(expires_at),
        ];
        match op.concurrency {
            Concurrency::LastWrite => Statement {
                sql: self.upsert.clone(),
                args,
                expect: Expect::Any,
                key,
            },
            Concurrency::FirstWrite => {
                args.push(Arg::Int(now));
                Statement {
                    sql: self.insert_first_write.clone(),
                    args,
                    expect: Expect::One,
                    key,
                }
            }
        }
    }

    pub fn render_delete(&self, op: &DeleteOp, now: i64) -> Statement {
        let key = Some(op.key.clone());
        match &op.etag {
            None => Statement {
                sql: self.delete.clone(),
                args: vec![Arg::Text(op.key.clone())],
                expect: Expect::Any,
                key,
            },
            Some(etag) => Statement {
                sql: self.delete_with_etag.clone(),
                args: vec![
                    Arg::Text(op.key.clone()),
                    Arg::Text(etag.clone()),
                    Arg::Int(now),
                ],
                expect: Expect::One,
                key,
            },
        }
    }

    pub fn render_sweep(&self, now: i64) -> Statement {
        Statement {
            sql: self.sweep.clone(),
            args: vec![Arg::Int(now)],
            expect: Expect::Any,
            key: None,
        }
    }
}

fn new_etag() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Highest `$n` placeholder referenced by `sql`.
#[cfg(test)]
fn max_placeholder(sql: &str) -> usize {
    sql.split('$')
        .skip(1)
        .filter_map(|rest| {
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::StateValue;

    fn set_op(etag: Option<&str>, concurrency: Concurrency) -> SetOp {
        SetOp {
            key: "key1".to_string(),
            value: StateValue::from("value1"),
            etag: etag.map(str::to_string),
            ttl: None,
            concurrency,
        }
    }

    fn assert_args_match(stmt: &Statement) {
        assert_eq!(
            max_placeholder(&stmt.sql),
            stmt.args.len(),
            "placeholder count mismatch in {}",
            stmt.sql
        );
    }

    #[test]
    fn unconditional_upsert_is_insert_on_conflict() {
        let stmts = Statements::new("state");
        let stmt = stmts.render_set(&set_op(None, Concurrency::LastWrite), 1_000);

        assert!(stmt.sql.starts_with("INSERT INTO state"));
        assert!(stmt.sql.contains("ON CONFLICT (key) DO UPDATE"));
        assert!(!stmt.sql.contains("WHERE"));
        assert_eq!(stmt.expect, Expect::Any);
        assert_eq!(stmt.args[0], Arg::Text("key1".to_string()));
        assert_args_match(&stmt);
    }

    #[test]
    fn etag_upsert_is_conditional_update() {
        let stmts = Statements::new("state");
        let stmt = stmts.render_set(&set_op(Some("e1"), Concurrency::LastWrite), 1_000);

        assert!(stmt.sql.starts_with("UPDATE state"));
        assert!(stmt.sql.contains("etag = $7"));
        assert_eq!(stmt.args[6], Arg::Text("e1".to_string()));
        assert_eq!(stmt.expect, Expect::One);
        assert_eq!(stmt.key.as_deref(), Some("key1"));
        assert_args_match(&stmt);
    }

    #[test]
    fn etag_takes_precedence_over_first_write() {
        let stmts = Statements::new("state");
        let stmt = stmts.render_set(&set_op(Some("e1"), Concurrency::FirstWrite), 1_000);
        assert!(stmt.sql.starts_with("UPDATE state"));
    }

    #[test]
    fn first_write_only_replaces_expired_rows() {
        let stmts = Statements::new("state");
        let stmt = stmts.render_set(&set_op(None, Concurrency::FirstWrite), 1_000);

        assert!(stmt.sql.contains("WHERE state.expires_at IS NOT NULL"));
        assert_eq!(stmt.expect, Expect::One);
        assert_eq!(stmt.args.last(), Some(&Arg::Int(1_000)));
        assert_args_match(&stmt);
    }

    #[test]
    fn ttl_renders_absolute_expiry() {
        let stmts = Statements::new("state");
        let mut op = set_op(None, Concurrency::LastWrite);
        op.ttl = Some(Duration::from_secs(5));
        let stmt = stmts.render_set(&op, 1_000);
        assert_eq!(stmt.args[5], Arg::NullableInt(Some(6_000)));

        op.ttl = None;
        let stmt = stmts.render_set(&op, 1_000);
        assert_eq!(stmt.args[5], Arg::NullableInt(None));
    }

    #[test]
    fn each_write_gets_a_fresh_etag() {
        let stmts = Statements::new("state");
        let op = set_op(None, Concurrency::LastWrite);
        let a = stmts.render_set(&op, 1_000);
        let b = stmts.render_set(&op, 1_000);
        assert_ne!(a.args[3], b.args[3]);
    }

    #[test]
    fn deletes() {
        let stmts = Statements::new("state");

        let plain = stmts.render_delete(
            &DeleteOp {
                key: "key1".to_string(),
                etag: None,
            },
            1_000,
        );
        assert_eq!(plain.sql, "DELETE FROM state WHERE key = $1");
        assert_eq!(plain.expect, Expect::Any);
        assert_args_match(&plain);

        let guarded = stmts.render_delete(
            &DeleteOp {
                key: "key1".to_string(),
                etag: Some("e1".to_string()),
            },
            1_000,
        );
        assert!(guarded.sql.contains("etag = $2"));
        assert_eq!(guarded.expect, Expect::One);
        assert_args_match(&guarded);
    }

    #[test]
    fn reads_and_sweeps_compare_against_now() {
        let stmts = Statements::new("kv");
        assert!(stmts.get_sql().contains("kv.expires_at > $2"));
        assert_eq!(max_placeholder(stmts.get_sql()), 2);

        let sweep = stmts.render_sweep(42);
        assert!(sweep.sql.contains("expires_at <= $1"));
        assert_eq!(sweep.args, vec![Arg::Int(42)]);
    }

    #[test]
    fn schema_uses_table_name() {
        let ddl = Statements::new("state").schema();
        assert!(ddl[0].starts_with("CREATE TABLE IF NOT EXISTS state ("));
        assert!(ddl[1].contains("state_expires_at_idx"));
    }
}
