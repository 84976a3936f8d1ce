//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap external calls (reload, certificate observation, connectivity) with a deadline
//! - Report which operation ran out of time
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the wrapped future is dropped on expiry
//! - Timeout errors are distinct from other errors so callers can map them
//!   (a reload timeout takes the rollback path)

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// An operation did not finish within its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} timed out after {}ms", .after.as_millis())]
pub struct DeadlineExceeded {
    pub operation: &'static str,
    pub after: Duration,
}

/// Run `fut` to completion or fail after `after`.
pub async fn with_deadline<F>(operation: &'static str, after: Duration, fut: F) -> Result<F::Output, DeadlineExceeded>
where
    F: Future,
{
    tokio::time::timeout(after, fut).await.map_err(|_| {
        tracing::warn!(operation, timeout_ms = after.as_millis() as u64, "Operation timed out");
        DeadlineExceeded { operation, after }
    })
}
