//! warpgrid-kvstate: transactional key/value state store for WarpGrid.
//!
//! Backed by a relational database through [sqlx](https://docs.rs/sqlx):
//! PostgreSQL in production, SQLite for embedded and test use. The driver is
//! picked from the connection string scheme.
//!
//! # Architecture
//!
//! ```text
//! StateStore (get / set / delete / bulk_* / execute_multi)
//!   ├── validate      reject malformed requests before any I/O
//!   ├── statements    render parameterized SQL per table
//!   ├── txn           one transaction per batch, commit or roll back
//!   │                 on every exit path
//!   ├── codec         values and expiry <-> table columns
//!   └── ExpirySweeper background task deleting expired rows
//! ```
//!
//! Optimistic concurrency uses per-record etags: every successful write
//! stores a fresh etag, and a write or delete that supplies an etag only
//! applies if it still matches. A mismatch surfaces as
//! [`StateError::Conflict`] and rolls back the surrounding transaction.
//!
//! Expired records are hidden from reads immediately and physically removed
//! by the sweeper on its next tick.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by an `Arc` around
//! the connection pool) and can be shared across async tasks.

pub mod codec;
pub mod config;
pub mod deadline;
pub mod error;
pub mod statements;
pub mod store;
pub mod sweeper;
pub mod txn;
pub mod types;
pub mod validate;

pub use config::{Backend, StoreMetadata};
pub use deadline::Deadline;
pub use error::{ErrorKind, StateError, StateResult};
pub use store::StateStore;
pub use types::*;
