//! Reload trigger: tells the proxy to pick up a new configuration.
//!
//! # Data Flow
//! ```text
//! manager (after persist)
//!     → ReloadTrigger::trigger(changed paths)   bounded by reload.timeout_secs
//!         graceful: fsync + wait for the watcher to see the writes (best effort)
//!         hard:     graceful + run hard_command
//!     → Ok(outcome) | Err(ReloadError)  → rollback on error or timeout
//! ```
//!
//! # Design Decisions
//! - Narrow trait so tests can inject failing or hanging triggers
//! - The proxy gives no handshake; a missing acknowledgement is reported as
//!   `Unconfirmed`, not as a failure

pub mod watch;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use watch::FileWatchTrigger;

/// What the trigger could observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing changed on disk, nothing to reload.
    NoChanges,
    /// The file watcher saw every changed path.
    Acknowledged,
    /// Files are durable but no acknowledgement arrived in time.
    Unconfirmed,
    /// The hard-reload command completed.
    Restarted,
}

impl ReloadOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoChanges => "no_changes",
            Self::Acknowledged => "acknowledged",
            Self::Unconfirmed => "unconfirmed",
            Self::Restarted => "restarted",
        }
    }
}

/// Reload failures. Each one sends the mutation down the rollback path.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("reload command failed: {0}")]
    Command(String),

    #[error("reload i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reload rejected: {0}")]
    Rejected(String),
}

/// Signals the external proxy to re-read its configuration.
#[async_trait]
pub trait ReloadTrigger: Send + Sync {
    async fn trigger(&self, changed: &[PathBuf]) -> Result<ReloadOutcome, ReloadError>;
}
