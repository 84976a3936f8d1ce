//! Error types shared across the control plane.
//!
//! # Design Decisions
//! - Validation and conflict errors carry the full violation list so operators
//!   get actionable detail
//! - Infrastructure failures are collapsed into `ControlError::Failed` with a
//!   correlation reference; the detail lives only in the audit sink

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Category of a single validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Document is not parseable as TOML or as the expected shape.
    Syntax,
    /// A required top-level section is absent.
    MissingSection,
    /// A required field is absent.
    MissingField,
    /// A field is present but its value is unacceptable.
    InvalidValue,
    /// A match rule does not parse under the rule grammar.
    InvalidRule,
    /// A reference (middleware, entry point, resolver) does not resolve.
    UnresolvedReference,
    /// A name that must be unique appears more than once.
    Duplicate,
    /// Two overlapping routes share the same priority.
    AmbiguousPriority,
}

impl ViolationKind {
    /// Conflict kinds surface as `ControlError::Conflict` instead of `Validation`.
    pub fn is_conflict(self) -> bool {
        matches!(
            self,
            Self::UnresolvedReference | Self::Duplicate | Self::AmbiguousPriority
        )
    }
}

/// One finding produced by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Location inside the tree, e.g. `routes[api].middlewares[0]`.
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Resource types addressed by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Route,
    Middleware,
    Certificate,
    Settings,
    Snapshot,
    Connectivity,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Middleware => "middleware",
            Self::Certificate => "certificate",
            Self::Settings => "settings",
            Self::Snapshot => "snapshot",
            Self::Connectivity => "connectivity",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse category of an infrastructure failure reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Backup,
    Storage,
    ReloadTimeout,
    Reload,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Backup => "backup",
            Self::Storage => "storage",
            Self::ReloadTimeout => "reload timeout",
            Self::Reload => "reload",
            Self::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Error returned by every public manager operation.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("validation failed: {}", join_violations(.0))]
    Validation(Vec<Violation>),

    #[error("conflict: {}", join_violations(.0))]
    Conflict(Vec<Violation>),

    #[error("rate limit exceeded for actor `{actor}`, retry in {}s", .retry_after.as_secs().max(1))]
    RateLimitExceeded { actor: String, retry_after: Duration },

    #[error("actor `{0}` is not permitted to change the configuration")]
    Forbidden(String),

    #[error("{resource} `{id}` not found")]
    NotFound { resource: ResourceKind, id: String },

    #[error("operation failed ({kind}); see audit reference {reference}")]
    Failed { kind: FailureKind, reference: Uuid },
}

impl ControlError {
    /// Split a violation list into a conflict or validation error.
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.iter().any(|v| v.kind.is_conflict()) {
            Self::Conflict(violations)
        } else {
            Self::Validation(violations)
        }
    }

    pub fn conflict(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict(vec![Violation::new(ViolationKind::Duplicate, path, message)])
    }

    pub fn not_found(resource: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Violations attached to the error, if any.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation(v) | Self::Conflict(v) => v,
            _ => &[],
        }
    }

    /// Short machine-readable code used in audit records and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict_error",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound { .. } => "not_found",
            Self::Failed { kind, .. } => match kind {
                FailureKind::Backup => "backup_error",
                FailureKind::ReloadTimeout => "reload_timeout",
                FailureKind::Storage => "storage_error",
                FailureKind::Reload => "reload_error",
                FailureKind::Internal => "internal_error",
            },
        }
    }
}

pub(crate) fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
