//! Control-plane configuration subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControlConfig (validated, immutable)
//!     → passed by reference into the manager, server and background tasks
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    AdminConfig, AuditConfig, AuditSinkKind, BackupConfig, CertificatesConfig, ControlConfig,
    ObservabilityConfig, RateLimitConfig, ReloadConfig, ReloadMode, StorageConfig,
};
