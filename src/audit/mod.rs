//! Audit logging for configuration changes.
//!
//! Every mutating call ends in exactly one record: who did what, to which
//! resource, with a before/after summary and the outcome.
//!
//! # Responsibilities
//! - Define the audit record and its action/outcome vocabulary
//! - Append records to a pluggable sink (JSON lines, SQLite, memory)
//! - Escalate sink failures without failing the audited operation
//!
//! # Design Decisions
//! - Append-only: sinks expose `append` and `recent`, nothing else
//! - `AuditLogger::log` never returns an error; a failed append raises an
//!   alert (log target `audit_alert`, counter, alert count) instead

pub mod jsonl;
pub mod memory;
pub mod sqlite;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{AuditConfig, AuditSinkKind};
use crate::error::ResourceKind;
use crate::observability::metrics;

pub use jsonl::JsonlAuditSink;
pub use memory::MemoryAuditSink;
pub use sqlite::SqliteAuditSink;

/// Errors raised by audit sinks.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("audit encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Rejected before any side effect (forbidden, rate limited).
    Denied,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }
}

/// Auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "route.create")]
    RouteCreate,
    #[serde(rename = "route.update")]
    RouteUpdate,
    #[serde(rename = "route.delete")]
    RouteDelete,
    #[serde(rename = "middleware.create")]
    MiddlewareCreate,
    #[serde(rename = "middleware.update")]
    MiddlewareUpdate,
    #[serde(rename = "middleware.delete")]
    MiddlewareDelete,
    #[serde(rename = "certificate.request")]
    CertificateRequest,
    #[serde(rename = "certificate.revoke")]
    CertificateRevoke,
    #[serde(rename = "certificate.reconcile")]
    CertificateReconcile,
    #[serde(rename = "settings.update")]
    SettingsUpdate,
    #[serde(rename = "backup.create")]
    BackupCreate,
    #[serde(rename = "backup.restore")]
    BackupRestore,
    #[serde(rename = "connectivity.test")]
    ConnectivityTest,
}

impl AuditAction {
    pub const ALL: [AuditAction; 13] = [
        Self::RouteCreate,
        Self::RouteUpdate,
        Self::RouteDelete,
        Self::MiddlewareCreate,
        Self::MiddlewareUpdate,
        Self::MiddlewareDelete,
        Self::CertificateRequest,
        Self::CertificateRevoke,
        Self::CertificateReconcile,
        Self::SettingsUpdate,
        Self::BackupCreate,
        Self::BackupRestore,
        Self::ConnectivityTest,
    ];

    /// Label used in records and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RouteCreate => "route.create",
            Self::RouteUpdate => "route.update",
            Self::RouteDelete => "route.delete",
            Self::MiddlewareCreate => "middleware.create",
            Self::MiddlewareUpdate => "middleware.update",
            Self::MiddlewareDelete => "middleware.delete",
            Self::CertificateRequest => "certificate.request",
            Self::CertificateRevoke => "certificate.revoke",
            Self::CertificateReconcile => "certificate.reconcile",
            Self::SettingsUpdate => "settings.update",
            Self::BackupCreate => "backup.create",
            Self::BackupRestore => "backup.restore",
            Self::ConnectivityTest => "connectivity.test",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == label)
    }

    /// Resource type the action operates on.
    pub fn resource(self) -> ResourceKind {
        match self {
            Self::RouteCreate | Self::RouteUpdate | Self::RouteDelete => ResourceKind::Route,
            Self::MiddlewareCreate | Self::MiddlewareUpdate | Self::MiddlewareDelete => {
                ResourceKind::Middleware
            }
            Self::CertificateRequest | Self::CertificateRevoke | Self::CertificateReconcile => {
                ResourceKind::Certificate
            }
            Self::SettingsUpdate => ResourceKind::Settings,
            Self::BackupCreate | Self::BackupRestore => ResourceKind::Snapshot,
            Self::ConnectivityTest => ResourceKind::Connectivity,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Shared by every log line and error reference of one call.
    pub correlation_id: Uuid,
    pub actor: String,
    pub action: AuditAction,
    pub resource_type: ResourceKind,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Pre-mutation snapshot taken for this call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
}

impl AuditRecord {
    /// A `success` record; adjust with the builder methods.
    pub fn new(
        correlation_id: Uuid,
        actor: impl Into<String>,
        action: AuditAction,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id,
            actor: actor.into(),
            action,
            resource_type: action.resource(),
            resource_id: resource_id.into(),
            before: None,
            after: None,
            outcome: AuditOutcome::Success,
            error_detail: None,
            snapshot_id: None,
        }
    }

    pub fn with_before(mut self, before: Option<serde_json::Value>) -> Self {
        self.before = before;
        self
    }

    pub fn with_after(mut self, after: Option<serde_json::Value>) -> Self {
        self.after = after;
        self
    }

    pub fn with_snapshot(mut self, snapshot_id: Option<String>) -> Self {
        self.snapshot_id = snapshot_id;
        self
    }

    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.outcome = AuditOutcome::Failure;
        self.error_detail = Some(detail.into());
        self
    }

    pub fn denied(mut self, detail: impl Into<String>) -> Self {
        self.outcome = AuditOutcome::Denied;
        self.error_detail = Some(detail.into());
        self
    }
}

/// Storage backend for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Up to `limit` records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError>;
}

/// Open the sink selected in the control-plane configuration.
pub async fn open_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, AuditError> {
    let sink: Arc<dyn AuditSink> = match config.sink {
        AuditSinkKind::Jsonl => Arc::new(JsonlAuditSink::new(&config.path)),
        AuditSinkKind::Sqlite => Arc::new(SqliteAuditSink::connect(&config.path).await?),
        AuditSinkKind::Memory => Arc::new(MemoryAuditSink::default()),
    };
    tracing::info!(sink = ?config.sink, path = %config.path, "Audit sink opened");
    Ok(sink)
}

/// Front door for audit writes.
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    alerts: AtomicU64,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            alerts: AtomicU64::new(0),
        }
    }

    /// Append `record`; a sink failure is escalated, never returned.
    pub async fn log(&self, record: AuditRecord) {
        tracing::info!(
            target: "audit",
            correlation_id = %record.correlation_id,
            actor = %record.actor,
            action = record.action.as_str(),
            resource = %record.resource_id,
            outcome = record.outcome.as_str(),
            "Audit record"
        );

        if let Err(e) = self.sink.append(&record).await {
            self.alerts.fetch_add(1, Ordering::Relaxed);
            metrics::record_audit_failure();
            tracing::error!(
                target: "audit_alert",
                correlation_id = %record.correlation_id,
                action = record.action.as_str(),
                outcome = record.outcome.as_str(),
                error = %e,
                "Failed to write audit record"
            );
        }
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        self.sink.recent(limit).await
    }

    /// Audit writes that failed since startup.
    pub fn alert_count(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_labels_round_trip() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, serde_json::Value::String(action.as_str().to_string()));
        }
        assert_eq!(AuditAction::ConnectivityTest.resource(), ResourceKind::Connectivity);
    }

    #[tokio::test]
    async fn test_sink_failure_raises_alert() {
        let sink = Arc::new(MemoryAuditSink::default());
        let logger = AuditLogger::new(sink.clone());

        logger
            .log(AuditRecord::new(Uuid::new_v4(), "alice", AuditAction::RouteCreate, "api"))
            .await;
        assert_eq!(logger.alert_count(), 0);

        sink.set_failing(true);
        logger
            .log(AuditRecord::new(Uuid::new_v4(), "alice", AuditAction::RouteDelete, "api"))
            .await;
        assert_eq!(logger.alert_count(), 1);
        assert_eq!(sink.records().await.len(), 1);
    }
}
