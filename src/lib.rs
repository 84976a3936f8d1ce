//! Control plane for a reverse proxy's routing configuration.
//!
//! Operators change routes, middleware, certificate bindings and static
//! settings through the [`manager::ConfigManager`]; every accepted change is
//! validated, backed up, audited, rate limited and reversible.

// Data model and checks
pub mod error;
pub mod routing;
pub mod tree;
pub mod validator;

// Storage
pub mod backup;
pub mod repository;

// Orchestration
pub mod audit;
pub mod certificates;
pub mod manager;
pub mod reload;

// Surfaces
pub mod admin;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ControlConfig;
pub use error::ControlError;
pub use lifecycle::Shutdown;
pub use manager::{Actor, ConfigManager};
