//! Per-call deadlines.
//!
//! Every public store operation takes a [`Deadline`]. When it passes, the
//! operation future is dropped at its current await point. Any transaction it
//! had open is dropped with it, and the driver rolls it back before the
//! connection is reused.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{StateError, StateResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// No caller deadline; only the store's operation timeout applies.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// The earlier of `self` and `now + timeout`.
    pub fn capped(self, timeout: Duration) -> Self {
        let cap = Instant::now() + timeout;
        match self.0 {
            Some(at) if at <= cap => self,
            _ => Self(Some(cap)),
        }
    }

    /// Run `fut` to completion or fail with [`StateError::Timeout`].
    pub async fn run<T, F>(self, fut: F) -> StateResult<T>
    where
        F: Future<Output = StateResult<T>>,
    {
        match self.0 {
            None => fut.await,
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| StateError::Timeout)?,
        }
    }
}
