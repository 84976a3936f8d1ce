//! The transactional mutation protocol.
//!
//! Every step returns an explicit outcome; `run_locked` inspects it and
//! decides between commit and rollback.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinError;
use uuid::Uuid;

use super::{Actor, ConfigManager, ManagerInner};
use crate::audit::{AuditAction, AuditOutcome, AuditRecord};
use crate::backup::{BackupError, SnapshotTrigger};
use crate::error::{ControlError, FailureKind};
use crate::observability::metrics;
use crate::reload::{ReloadError, ReloadOutcome};
use crate::repository::RepositoryError;
use crate::resilience::{with_deadline, DeadlineExceeded};
use crate::tree::ConfigTree;
use crate::validator;

/// Result of applying a change to the candidate tree.
pub(crate) struct Applied<R> {
    pub value: R,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl<R> Applied<R> {
    pub fn new(value: R) -> Self {
        Self {
            value,
            before: None,
            after: None,
        }
    }

    pub fn before<T: serde::Serialize>(mut self, before: Option<&T>) -> Self {
        self.before = before.and_then(|b| summarize("before", b));
        self
    }

    pub fn after<T: serde::Serialize>(mut self, after: Option<&T>) -> Self {
        self.after = after.and_then(|a| summarize("after", a));
        self
    }
}

/// Audit summary of `value`; an encoding failure is logged and the summary left out.
pub(crate) fn summarize<T: serde::Serialize>(field: &'static str, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(field, error = %e, "Audit summary could not be encoded; omitted");
            None
        }
    }
}

/// Why a protocol step stopped the mutation.
#[derive(Debug)]
pub(crate) enum StepFailure {
    /// The change itself is unacceptable; nothing was written.
    Rejected(ControlError),
    Backup(BackupError),
    /// Reading the live tree failed; nothing was written.
    Load(RepositoryError),
    /// Writing failed part-way; needs rollback.
    Storage(RepositoryError),
    ReloadTimeout(DeadlineExceeded),
    Reload(ReloadError),
}

impl StepFailure {
    fn needs_rollback(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::ReloadTimeout(_) | Self::Reload(_))
    }

    pub(crate) fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected(_) => FailureKind::Internal,
            Self::Backup(_) => FailureKind::Backup,
            Self::Load(_) | Self::Storage(_) => FailureKind::Storage,
            Self::ReloadTimeout(_) => FailureKind::ReloadTimeout,
            Self::Reload(_) => FailureKind::Reload,
        }
    }

    pub(crate) fn detail(&self) -> String {
        match self {
            Self::Rejected(e) => e.to_string(),
            Self::Backup(e) => format!("backup: {e}"),
            Self::Load(e) => format!("load: {e}"),
            Self::Storage(e) => format!("storage: {e}"),
            Self::ReloadTimeout(e) => format!("reload: {e}"),
            Self::Reload(e) => format!("reload: {e}"),
        }
    }

    fn into_error(self, reference: Uuid) -> ControlError {
        match self {
            Self::Rejected(e) => e,
            other => ControlError::Failed {
                kind: other.kind(),
                reference,
            },
        }
    }
}

/// Bookkeeping for one protocol run.
#[derive(Clone)]
pub(crate) struct Call {
    pub correlation_id: Uuid,
    pub actor: Actor,
    pub action: AuditAction,
    pub resource_id: String,
    pub started: Instant,
}

impl Call {
    pub fn new(actor: &Actor, action: AuditAction, resource_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            actor: actor.clone(),
            action,
            resource_id: resource_id.into(),
            started: Instant::now(),
        }
    }

    pub fn record(&self) -> AuditRecord {
        AuditRecord::new(self.correlation_id, &self.actor.id, self.action, &self.resource_id)
    }

    pub fn finish(&self, outcome: AuditOutcome) {
        metrics::record_mutation(self.action.as_str(), outcome.as_str(), self.started.elapsed());
    }
}

impl ConfigManager {
    /// Authorization and rate limiting. A rejection has no side effect
    /// besides its `denied` audit record.
    pub(crate) async fn admit(&self, call: &Call, rate_limited: bool) -> Result<(), ControlError> {
        let inner = &self.inner;

        let rejection = if !call.actor.permitted {
            Some(ControlError::Forbidden(call.actor.id.clone()))
        } else if rate_limited {
            inner
                .limiter
                .check(&call.actor.id)
                .err()
                .map(|t| ControlError::RateLimitExceeded {
                    actor: call.actor.id.clone(),
                    retry_after: t.retry_after,
                })
        } else {
            None
        };

        match rejection {
            None => Ok(()),
            Some(err) => {
                tracing::warn!(
                    correlation_id = %call.correlation_id,
                    actor = %call.actor.id,
                    action = call.action.as_str(),
                    error = %err,
                    "Mutation denied"
                );
                inner.audit.log(call.record().denied(err.to_string())).await;
                call.finish(AuditOutcome::Denied);
                Err(err)
            }
        }
    }

    /// Run the full protocol for a tree mutation.
    pub(crate) async fn mutate<R, F>(
        &self,
        actor: &Actor,
        action: AuditAction,
        resource_id: impl Into<String>,
        rate_limited: bool,
        apply: F,
    ) -> Result<R, ControlError>
    where
        R: Send + 'static,
        F: FnOnce(&mut ConfigTree) -> Result<Applied<R>, ControlError> + Send + 'static,
    {
        let call = Call::new(actor, action, resource_id);
        self.admit(&call, rate_limited).await?;

        let inner = self.inner.clone();
        let fallback = call.clone();
        match tokio::spawn(async move { inner.run_locked(call, apply).await }).await {
            Ok(result) => result,
            Err(e) => Err(self.inner.task_lost(&fallback, e).await),
        }
    }
}

impl ManagerInner {
    async fn run_locked<R, F>(self: Arc<Self>, call: Call, apply: F) -> Result<R, ControlError>
    where
        F: FnOnce(&mut ConfigTree) -> Result<Applied<R>, ControlError>,
    {
        let _guard = self.lock.lock().await;

        // step 2: pre-mutation snapshot
        let snapshot = match self.backups.snapshot(SnapshotTrigger::PreMutation).await {
            Ok(manifest) => manifest,
            Err(e) => return Err(self.abort(&call, None, StepFailure::Backup(e)).await),
        };
        let snapshot_id = Some(snapshot.id.clone());

        // step 3: current tree from disk, change applied to a copy
        let current = match self.repository.load().await {
            Ok(tree) => tree,
            Err(e) => return Err(self.abort(&call, snapshot_id, StepFailure::Load(e)).await),
        };
        if **self.live.load() != current {
            tracing::warn!(
                correlation_id = %call.correlation_id,
                "Configuration on disk drifted from the live tree; using disk"
            );
        }

        let mut candidate = current.clone();
        let applied = match apply(&mut candidate) {
            Ok(applied) => applied,
            Err(e) => return Err(self.abort(&call, snapshot_id, StepFailure::Rejected(e)).await),
        };

        // step 4: whole-tree validation
        if let Err(violations) = validator::validate(&candidate) {
            let err = ControlError::from_violations(violations);
            return Err(self.abort(&call, snapshot_id, StepFailure::Rejected(err)).await);
        }

        // step 5: persist
        let changed = match self.repository.persist(&candidate).await {
            Ok(changed) => changed,
            Err(e) => return Err(self.abort(&call, snapshot_id, StepFailure::Storage(e)).await),
        };

        // step 6: reload
        if let Err(failure) = self.signal_reload(&changed).await {
            return Err(self.abort(&call, snapshot_id, failure).await);
        }

        // step 7: commit
        metrics::set_certificate_counts(&candidate.certificates.status_counts());
        self.live.store(Arc::new(candidate));

        tracing::info!(
            correlation_id = %call.correlation_id,
            actor = %call.actor.id,
            action = call.action.as_str(),
            resource = %call.resource_id,
            files = changed.len(),
            "Mutation committed"
        );

        let record = call
            .record()
            .with_before(applied.before)
            .with_after(applied.after)
            .with_snapshot(snapshot_id);
        self.audit.log(record).await;
        call.finish(AuditOutcome::Success);

        Ok(applied.value)
    }

    /// A protocol task that panicked still ends in one failure record.
    pub(crate) async fn task_lost(&self, call: &Call, err: JoinError) -> ControlError {
        tracing::error!(
            correlation_id = %call.correlation_id,
            action = call.action.as_str(),
            error = %err,
            "Mutation task failed"
        );
        self.audit
            .log(call.record().failed(format!("internal: {err}")))
            .await;
        call.finish(AuditOutcome::Failure);
        ControlError::Failed {
            kind: FailureKind::Internal,
            reference: call.correlation_id,
        }
    }

    /// Reload step, bounded by the configured timeout.
    pub(crate) async fn signal_reload(&self, changed: &[std::path::PathBuf]) -> Result<ReloadOutcome, StepFailure> {
        match with_deadline("reload", self.options.reload_timeout, self.reload.trigger(changed)).await {
            Ok(Ok(outcome)) => {
                tracing::debug!(outcome = outcome.as_str(), "Reload step finished");
                Ok(outcome)
            }
            Ok(Err(e)) => Err(StepFailure::Reload(e)),
            Err(e) => Err(StepFailure::ReloadTimeout(e)),
        }
    }

    /// Stop the mutation: roll back when files were touched, audit the
    /// failure and map it to the caller-facing error.
    pub(crate) async fn abort(&self, call: &Call, snapshot_id: Option<String>, failure: StepFailure) -> ControlError {
        if failure.needs_rollback() {
            if let Some(id) = snapshot_id.as_deref() {
                self.rollback(call, id).await;
            }
        }

        let detail = failure.detail();
        match &failure {
            StepFailure::Rejected(_) => tracing::info!(
                correlation_id = %call.correlation_id,
                action = call.action.as_str(),
                error = %detail,
                "Mutation rejected"
            ),
            _ => tracing::error!(
                correlation_id = %call.correlation_id,
                action = call.action.as_str(),
                error = %detail,
                "Mutation failed"
            ),
        }

        self.audit
            .log(call.record().with_snapshot(snapshot_id).failed(detail))
            .await;
        call.finish(AuditOutcome::Failure);
        failure.into_error(call.correlation_id)
    }

    /// Put the pre-mutation snapshot back and re-signal the proxy.
    ///
    /// Automatic rollback takes no safety snapshot; the failed state is
    /// already described by the audit record.
    pub(crate) async fn rollback(&self, call: &Call, snapshot_id: &str) {
        metrics::record_rollback();
        match self.backups.restore_files(snapshot_id).await {
            Ok(restored) => {
                if let Err(failure) = self.signal_reload(&restored).await {
                    tracing::error!(
                        correlation_id = %call.correlation_id,
                        error = %failure.detail(),
                        "Reload after rollback failed"
                    );
                }
                tracing::warn!(
                    correlation_id = %call.correlation_id,
                    snapshot = snapshot_id,
                    files = restored.len(),
                    "Rolled back to pre-mutation snapshot"
                );
            }
            Err(e) => {
                tracing::error!(
                    correlation_id = %call.correlation_id,
                    snapshot = snapshot_id,
                    error = %e,
                    "Rollback failed; configuration directory needs manual restore"
                );
            }
        }

        match self.repository.load().await {
            Ok(tree) => self.live.store(Arc::new(tree)),
            Err(e) => tracing::error!(error = %e, "Failed to reload tree after rollback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::{AuditSinkKind, ControlConfig};
    use crate::reload::{ReloadError, ReloadTrigger};
    use crate::tree::Route;

    struct Accept;

    #[async_trait]
    impl ReloadTrigger for Accept {
        async fn trigger(&self, _changed: &[PathBuf]) -> Result<ReloadOutcome, ReloadError> {
            Ok(ReloadOutcome::Acknowledged)
        }
    }

    async fn manager(dir: &tempfile::TempDir) -> (ConfigManager, Arc<MemoryAuditSink>) {
        let mut config = ControlConfig::default();
        config.storage.config_dir = dir.path().join("config");
        config.audit.sink = AuditSinkKind::Memory;
        let sink = Arc::new(MemoryAuditSink::default());
        let manager = ConfigManager::open(&config, Arc::new(Accept), sink.clone())
            .await
            .unwrap();
        (manager, sink)
    }

    #[tokio::test]
    async fn test_panicking_change_still_audited() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, sink) = manager(&dir).await;
        let actor = Actor::new("alice", true);

        let err = manager
            .mutate(&actor, AuditAction::RouteCreate, "api", true, |_tree| -> Result<Applied<()>, ControlError> {
                panic!("apply blew up")
            })
            .await
            .unwrap_err();
        let reference = match err {
            ControlError::Failed {
                kind: FailureKind::Internal,
                reference,
            } => reference,
            other => panic!("expected internal failure, got {other:?}"),
        };

        let records = sink.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert_eq!(records[0].correlation_id, reference);

        // the lock was released with the task
        manager
            .create_route(&actor, Route::new("api", "Host(`a.com`)", "svc"))
            .await
            .unwrap();
    }

    #[test]
    fn test_unencodable_summary_is_omitted() {
        use std::collections::HashMap;

        // JSON object keys must be strings
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], "x");
        let applied = Applied::new(()).before(Some(&bad)).after(Some(&"fine"));
        assert!(applied.before.is_none());
        assert_eq!(applied.after, Some(Value::from("fine")));
    }
}
