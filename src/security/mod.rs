//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Admin request:
//!     → auth (bearer key from the trusted gateway)
//!     → actor headers (identity + pre-verified permission)
//!     → manager: permission check, then rate_limit.rs (per-actor window)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a missing or malformed actor is rejected
//! - Authorization decisions are made upstream; only the verdict is consumed

pub mod rate_limit;

pub use rate_limit::{RateLimiter, Throttled};
