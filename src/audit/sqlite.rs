//! Relational audit store on SQLite.
//!
//! # Schema
//! ```text
//! audit_log(id, timestamp, correlation_id, actor, action,
//!           resource_type, resource_id, details, outcome)
//! ```
//! `details` is a JSON object holding the before/after summary, the error
//! detail and the snapshot id. Rows are only ever inserted.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{AuditAction, AuditError, AuditOutcome, AuditRecord, AuditSink};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize, Default)]
struct Details {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<String>,
}

type Row = (String, String, String, String, String, String, String, String, String);

#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    /// Open (or create) the database at `path`; `:memory:` gives a private
    /// in-memory database.
    pub async fn connect(path: &str) -> Result<Self, AuditError> {
        let pool = if path == ":memory:" {
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let uri = format!(
                "file:proxy-control-audit-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );
            let options = SqliteConnectOptions::new()
                .filename(&uri)
                .shared_cache(true)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(4)
                .acquire_timeout(ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await?
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id             TEXT PRIMARY KEY,
                timestamp      TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                actor          TEXT NOT NULL,
                action         TEXT NOT NULL,
                resource_type  TEXT NOT NULL,
                resource_id    TEXT NOT NULL,
                details        TEXT NOT NULL,
                outcome        TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS audit_log_timestamp ON audit_log (timestamp)")
            .execute(&pool)
            .await?;

        tracing::info!(path = %path, "Audit database connected");
        Ok(Self { pool })
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let details = Details {
            before: record.before.clone(),
            after: record.after.clone(),
            error_detail: record.error_detail.clone(),
            snapshot_id: record.snapshot_id.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO audit_log
            (id, timestamp, correlation_id, actor, action, resource_type, resource_id, details, outcome)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        .bind(record.correlation_id.to_string())
        .bind(&record.actor)
        .bind(record.action.as_str())
        .bind(record.resource_type.as_str())
        .bind(&record.resource_id)
        .bind(serde_json::to_string(&details)?)
        .bind(record.outcome.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT id, timestamp, correlation_id, actor, action, resource_type, resource_id, details, outcome
            FROM audit_log
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_row).collect()
    }
}

fn decode_row(row: Row) -> Result<AuditRecord, AuditError> {
    let (id, timestamp, correlation_id, actor, action, resource_type, resource_id, details, outcome) = row;
    let corrupt = |what: &str, value: &str| AuditError::Unavailable(format!("corrupt audit row: {what} `{value}`"));

    let details: Details = serde_json::from_str(&details)?;
    Ok(AuditRecord {
        id: Uuid::parse_str(&id).map_err(|_| corrupt("id", &id))?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| corrupt("timestamp", &timestamp))?,
        correlation_id: Uuid::parse_str(&correlation_id)
            .map_err(|_| corrupt("correlation_id", &correlation_id))?,
        actor,
        action: AuditAction::parse(&action).ok_or_else(|| corrupt("action", &action))?,
        resource_type: serde_json::from_value(serde_json::Value::String(resource_type.clone()))
            .map_err(|_| corrupt("resource_type", &resource_type))?,
        resource_id,
        before: details.before,
        after: details.after,
        outcome: serde_json::from_value::<AuditOutcome>(serde_json::Value::String(outcome.clone()))
            .map_err(|_| corrupt("outcome", &outcome))?,
        error_detail: details.error_detail,
        snapshot_id: details.snapshot_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let sink = SqliteAuditSink::connect(":memory:").await.unwrap();

        let first = AuditRecord::new(Uuid::new_v4(), "alice", AuditAction::MiddlewareCreate, "auth")
            .with_after(Some(serde_json::json!({ "type": "basic-auth" })))
            .with_snapshot(Some("20260101T000000000000Z".into()));
        sink.append(&first).await.unwrap();

        let mut second = AuditRecord::new(Uuid::new_v4(), "bob", AuditAction::BackupRestore, "snap")
            .denied("rate limit exceeded");
        second.timestamp = first.timestamp + chrono::Duration::seconds(1);
        sink.append(&second).await.unwrap();

        let recent = sink.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].actor, "bob");
        assert_eq!(recent[0].outcome, AuditOutcome::Denied);
        assert_eq!(recent[1].id, first.id);
        assert_eq!(recent[1].after, first.after);
        assert_eq!(recent[1].snapshot_id, first.snapshot_id);
    }
}
