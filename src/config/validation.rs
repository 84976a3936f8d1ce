//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, timeouts single-digit seconds)
//! - Check mode-specific requirements (hard reload needs a command)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControlConfig → Result<(), Vec<ConfigValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AuditSinkKind, ControlConfig, ReloadMode};

const MAX_RETENTION_DAYS: u32 = 3650;
const MAX_SAFETY_EXEMPTION_HOURS: u32 = 8760;
const MAX_EXPIRY_WINDOW_DAYS: u32 = 365;

/// One problem in the control-plane configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a loaded configuration.
pub fn validate_config(config: &ControlConfig) -> Result<(), Vec<ConfigValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &'static str, message: &str| {
        errors.push(ConfigValidationError {
            field,
            message: message.to_string(),
        })
    };

    if config.storage.config_dir.as_os_str().is_empty() {
        fail("storage.config_dir", "must not be empty");
    }

    if config.rate_limit.window_secs == 0 {
        fail("rate_limit.window_secs", "must be greater than zero");
    }
    if config.rate_limit.max_mutations == 0 {
        fail("rate_limit.max_mutations", "must be greater than zero");
    }

    if config.backup.max_snapshots == 0 {
        fail("backup.max_snapshots", "must keep at least one snapshot");
    }
    if !(1..=MAX_RETENTION_DAYS).contains(&config.backup.max_age_days) {
        fail("backup.max_age_days", "must be between 1 and 3650");
    }
    if !(24..=MAX_SAFETY_EXEMPTION_HOURS).contains(&config.backup.safety_exemption_hours) {
        fail("backup.safety_exemption_hours", "must be between 24 and 8760");
    }

    if !(1..=9).contains(&config.reload.timeout_secs) {
        fail("reload.timeout_secs", "must be between 1 and 9 seconds");
    }
    if config.reload.settle_ms >= config.reload.timeout_secs.saturating_mul(1000) {
        fail("reload.settle_ms", "must be shorter than reload.timeout_secs");
    }
    if config.reload.mode == ReloadMode::Hard
        && config
            .reload
            .hard_command
            .as_ref()
            .map_or(true, |cmd| cmd.first().map_or(true, |prog| prog.trim().is_empty()))
    {
        fail("reload.hard_command", "required when reload.mode = \"hard\"");
    }

    if config.audit.sink != AuditSinkKind::Memory && config.audit.path.trim().is_empty() {
        fail("audit.path", "must not be empty");
    }

    if config.certificates.poll_interval_secs == 0 {
        fail("certificates.poll_interval_secs", "must be greater than zero");
    }
    if !(1..=MAX_EXPIRY_WINDOW_DAYS).contains(&config.certificates.expiry_window_days) {
        fail("certificates.expiry_window_days", "must be between 1 and 365");
    }
    if !(1..=9).contains(&config.certificates.observe_timeout_secs) {
        fail("certificates.observe_timeout_secs", "must be between 1 and 9 seconds");
    }

    if config.admin.api_key.trim().is_empty() {
        fail("admin.api_key", "must not be empty");
    }
    if config.admin.bind_address.parse::<SocketAddr>().is_err() {
        fail("admin.bind_address", "must be a socket address such as 127.0.0.1:8081");
    }
    if config.admin.request_timeout_secs == 0 {
        fail("admin.request_timeout_secs", "must be greater than zero");
    }
    if !(1..=9).contains(&config.admin.connectivity_timeout_secs) {
        fail("admin.connectivity_timeout_secs", "must be between 1 and 9 seconds");
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        fail("observability.metrics_address", "must be a socket address");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
