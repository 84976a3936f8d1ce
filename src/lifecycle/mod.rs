//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → audit sink → reload trigger → manager → background tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting admin requests → stop background tasks → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: audit sink before the manager so the first mutation is audited
//! - A mutation already running finishes on its own task; shutdown does not cancel it
//! - Shutdown has timeout: background tasks get a bounded drain

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{spawn_background, start_services, Services, StartupError};
