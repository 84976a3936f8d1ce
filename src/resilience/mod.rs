//! Resilience helpers for calls that leave the process.
//!
//! # Data Flow
//! ```text
//! reload trigger / certificate observer / connectivity check
//!     → timeouts.rs (single-digit-second deadline)
//!     → Ok(output) | DeadlineExceeded
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - A timeout is its own error, distinct from the wrapped call's failures

pub mod timeouts;

pub use timeouts::{with_deadline, DeadlineExceeded};
