//! Mutating operations exposed by the manager.

use std::sync::Arc;

use chrono::Utc;

use super::protocol::{summarize, Applied, Call};
use super::{Actor, ConfigManager};
use crate::audit::{AuditAction, AuditOutcome};
use crate::backup::{BackupError, SnapshotManifest, SnapshotTrigger};
use crate::certificates::{self, ObservedCertificate, StatusChange};
use crate::error::{ControlError, FailureKind, ResourceKind, Violation, ViolationKind};
use crate::observability::metrics;
use crate::tree::{
    Certificate, CertificateRequest, Middleware, Route, StaticSettings, DEFAULT_MIDDLEWARE_DOCUMENT,
    DEFAULT_ROUTE_DOCUMENT,
};
use crate::validator;

fn check(violations: Vec<Violation>) -> Result<(), ControlError> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ControlError::from_violations(violations))
    }
}

impl ConfigManager {
    pub async fn create_route(&self, actor: &Actor, route: Route) -> Result<Route, ControlError> {
        let name = route.name.clone();
        self.mutate(actor, AuditAction::RouteCreate, name, true, move |tree| {
            check(validator::validate_route(&route))?;
            if tree.routes.contains(&route.name) {
                return Err(ControlError::conflict(
                    format!("routes[{}]", route.name),
                    format!("route `{}` already exists", route.name),
                ));
            }
            tree.routes.insert(DEFAULT_ROUTE_DOCUMENT, route.clone());
            Ok(Applied::new(route.clone()).after(Some(&route)))
        })
        .await
    }

    /// Replace route `name`; `route.name` may differ to rename it.
    pub async fn update_route(&self, actor: &Actor, name: &str, route: Route) -> Result<Route, ControlError> {
        let name = name.to_string();
        self.mutate(actor, AuditAction::RouteUpdate, name.clone(), true, move |tree| {
            check(validator::validate_route(&route))?;
            if route.name != name && tree.routes.contains(&route.name) {
                return Err(ControlError::conflict(
                    format!("routes[{}]", route.name),
                    format!("cannot rename `{name}`: route `{}` already exists", route.name),
                ));
            }
            let before = tree
                .routes
                .replace(&name, route.clone())
                .ok_or_else(|| ControlError::not_found(ResourceKind::Route, &name))?;
            Ok(Applied::new(route.clone()).before(Some(&before)).after(Some(&route)))
        })
        .await
    }

    pub async fn delete_route(&self, actor: &Actor, name: &str) -> Result<Route, ControlError> {
        let name = name.to_string();
        self.mutate(actor, AuditAction::RouteDelete, name.clone(), true, move |tree| {
            let removed = tree
                .routes
                .remove(&name)
                .ok_or_else(|| ControlError::not_found(ResourceKind::Route, &name))?;
            Ok(Applied::new(removed.clone()).before(Some(&removed)))
        })
        .await
    }

    pub async fn create_middleware(&self, actor: &Actor, middleware: Middleware) -> Result<Middleware, ControlError> {
        let name = middleware.name.clone();
        self.mutate(actor, AuditAction::MiddlewareCreate, name, true, move |tree| {
            check(validator::validate_middleware(&middleware))?;
            if tree.middlewares.contains(&middleware.name) {
                return Err(ControlError::conflict(
                    format!("middlewares[{}]", middleware.name),
                    format!("middleware `{}` already exists", middleware.name),
                ));
            }
            tree.middlewares
                .insert(DEFAULT_MIDDLEWARE_DOCUMENT, middleware.clone());
            Ok(Applied::new(middleware.clone()).after(Some(&middleware)))
        })
        .await
    }

    /// Replace middleware `name`. Renaming one that routes still reference
    /// fails tree validation as a conflict.
    pub async fn update_middleware(
        &self,
        actor: &Actor,
        name: &str,
        middleware: Middleware,
    ) -> Result<Middleware, ControlError> {
        let name = name.to_string();
        self.mutate(actor, AuditAction::MiddlewareUpdate, name.clone(), true, move |tree| {
            check(validator::validate_middleware(&middleware))?;
            if middleware.name != name && tree.middlewares.contains(&middleware.name) {
                return Err(ControlError::conflict(
                    format!("middlewares[{}]", middleware.name),
                    format!("cannot rename `{name}`: middleware `{}` already exists", middleware.name),
                ));
            }
            let before = tree
                .middlewares
                .replace(&name, middleware.clone())
                .ok_or_else(|| ControlError::not_found(ResourceKind::Middleware, &name))?;
            Ok(Applied::new(middleware.clone())
                .before(Some(&before))
                .after(Some(&middleware)))
        })
        .await
    }

    pub async fn delete_middleware(&self, actor: &Actor, name: &str) -> Result<Middleware, ControlError> {
        let name = name.to_string();
        self.mutate(actor, AuditAction::MiddlewareDelete, name.clone(), true, move |tree| {
            let users = tree.routes_using_middleware(&name);
            if !users.is_empty() {
                return Err(ControlError::Conflict(vec![Violation::new(
                    ViolationKind::UnresolvedReference,
                    format!("middlewares[{name}]"),
                    format!("still referenced by routes: {}", users.join(", ")),
                )]));
            }
            let removed = tree
                .middlewares
                .remove(&name)
                .ok_or_else(|| ControlError::not_found(ResourceKind::Middleware, &name))?;
            Ok(Applied::new(removed.clone()).before(Some(&removed)))
        })
        .await
    }

    /// Register a `pending` certificate. Issuance is observed later.
    pub async fn request_certificate(
        &self,
        actor: &Actor,
        request: CertificateRequest,
    ) -> Result<Certificate, ControlError> {
        let cert = request.into_pending(Utc::now());
        let domain = cert.domain.clone();
        self.mutate(actor, AuditAction::CertificateRequest, domain, true, move |tree| {
            check(validator::validate_certificate(&cert))?;
            if tree.certificates.get(&cert.domain).is_some() {
                return Err(ControlError::conflict(
                    format!("certificates[{}]", cert.domain),
                    format!("a certificate for `{}` is already registered", cert.domain),
                ));
            }
            tree.certificates.certificates.push(cert.clone());
            Ok(Applied::new(cert.clone()).after(Some(&cert)))
        })
        .await
    }

    pub async fn revoke_certificate(&self, actor: &Actor, domain: &str) -> Result<Certificate, ControlError> {
        let domain = domain.to_ascii_lowercase();
        self.mutate(actor, AuditAction::CertificateRevoke, domain.clone(), true, move |tree| {
            let removed = tree
                .certificates
                .remove(&domain)
                .ok_or_else(|| ControlError::not_found(ResourceKind::Certificate, &domain))?;
            Ok(Applied::new(removed.clone()).before(Some(&removed)))
        })
        .await
    }

    /// Apply observed certificate state. Runs as the system actor and is not
    /// rate limited; a round that changes nothing writes nothing.
    pub async fn reconcile_certificates(
        &self,
        observed: Vec<ObservedCertificate>,
    ) -> Result<Vec<StatusChange>, ControlError> {
        let window = self.inner.options.expiry_window;
        let now = Utc::now();

        let mut preview = self.inner.live.load().certificates.clone();
        if certificates::reconcile(&mut preview, &observed, now, window).is_empty() {
            metrics::set_certificate_counts(&preview.status_counts());
            return Ok(Vec::new());
        }

        self.mutate(&Actor::system(), AuditAction::CertificateReconcile, "registry", false, move |tree| {
            let before = tree.certificates.clone();
            let changes = certificates::reconcile(&mut tree.certificates, &observed, now, window);
            let after = changes.clone();
            Ok(Applied::new(changes).before(Some(&before.status_counts())).after(Some(&after)))
        })
        .await
    }

    pub async fn update_settings(&self, actor: &Actor, settings: StaticSettings) -> Result<StaticSettings, ControlError> {
        self.mutate(actor, AuditAction::SettingsUpdate, "static", true, move |tree| {
            check(validator::validate_settings(&settings))?;
            let before = std::mem::replace(&mut tree.settings, settings.clone());
            Ok(Applied::new(settings.clone()).before(Some(&before)).after(Some(&settings)))
        })
        .await
    }

    /// Take a manual snapshot of the live configuration.
    pub async fn create_snapshot(&self, actor: &Actor) -> Result<SnapshotManifest, ControlError> {
        let call = Call::new(actor, AuditAction::BackupCreate, "backups");
        self.admit(&call, true).await?;

        let inner = self.inner.clone();
        let fallback = call.clone();
        let task = tokio::spawn(async move {
            let _guard = inner.lock.lock().await;
            match inner.backups.snapshot(SnapshotTrigger::Manual).await {
                Ok(manifest) => {
                    let record = call
                        .record()
                        .with_after(summarize("after", &manifest))
                        .with_snapshot(Some(manifest.id.clone()));
                    inner.audit.log(record).await;
                    call.finish(AuditOutcome::Success);
                    tracing::info!(snapshot = %manifest.id, files = manifest.files.len(), "Manual snapshot created");
                    Ok(manifest)
                }
                Err(e) => {
                    tracing::error!(correlation_id = %call.correlation_id, error = %e, "Manual snapshot failed");
                    inner.audit.log(call.record().failed(format!("backup: {e}"))).await;
                    call.finish(AuditOutcome::Failure);
                    Err(ControlError::Failed {
                        kind: FailureKind::Backup,
                        reference: call.correlation_id,
                    })
                }
            }
        });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(self.inner.task_lost(&fallback, e).await),
        }
    }

    /// Restore snapshot `id` over the live configuration.
    ///
    /// A safety snapshot of the current state is taken first; if the restored
    /// tree cannot be loaded or the reload fails, the safety snapshot is put
    /// back.
    pub async fn restore(&self, actor: &Actor, id: &str) -> Result<SnapshotManifest, ControlError> {
        let call = Call::new(actor, AuditAction::BackupRestore, id);
        self.admit(&call, true).await?;

        let inner = self.inner.clone();
        let id = id.to_string();
        let fallback = call.clone();
        let task = tokio::spawn(async move {
            let _guard = inner.lock.lock().await;

            let target = match inner.backups.get(&id).await {
                Ok(manifest) => manifest,
                Err(BackupError::NotFound(_)) => {
                    let err = ControlError::not_found(ResourceKind::Snapshot, &id);
                    inner.audit.log(call.record().failed(err.to_string())).await;
                    call.finish(AuditOutcome::Failure);
                    return Err(err);
                }
                Err(e) => return Err(fail(&inner, &call, None, FailureKind::Backup, format!("backup: {e}")).await),
            };

            let safety = match inner.backups.snapshot(SnapshotTrigger::PreRestoreSafety).await {
                Ok(manifest) => manifest,
                Err(e) => return Err(fail(&inner, &call, None, FailureKind::Backup, format!("backup: {e}")).await),
            };
            let safety_id = Some(safety.id.clone());

            // verification failures leave the live tree untouched
            let restored = match inner.backups.restore_files(&target.id).await {
                Ok(paths) => paths,
                Err(e @ (BackupError::Corrupt { .. } | BackupError::Manifest(_))) => {
                    return Err(fail(&inner, &call, safety_id, FailureKind::Backup, format!("backup: {e}")).await)
                }
                Err(e) => {
                    inner.rollback(&call, &safety.id).await;
                    return Err(fail(&inner, &call, safety_id, FailureKind::Storage, format!("storage: {e}")).await);
                }
            };

            let tree = match inner.repository.load().await {
                Ok(tree) => tree,
                Err(e) => {
                    inner.rollback(&call, &safety.id).await;
                    return Err(fail(&inner, &call, safety_id, FailureKind::Storage, format!("restored tree: {e}")).await);
                }
            };

            if let Err(failure) = inner.signal_reload(&restored).await {
                let kind = failure.kind();
                let detail = failure.detail();
                inner.rollback(&call, &safety.id).await;
                return Err(fail(&inner, &call, safety_id, kind, detail).await);
            }

            metrics::set_certificate_counts(&tree.certificates.status_counts());
            inner.live.store(Arc::new(tree));

            tracing::info!(
                correlation_id = %call.correlation_id,
                snapshot = %target.id,
                safety_snapshot = %safety.id,
                files = restored.len(),
                "Snapshot restored"
            );
            let record = call
                .record()
                .with_after(Some(serde_json::json!({
                    "restored": target.id,
                    "files": restored.len(),
                })))
                .with_snapshot(safety_id);
            inner.audit.log(record).await;
            call.finish(AuditOutcome::Success);
            Ok(target)
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(self.inner.task_lost(&fallback, e).await),
        }
    }
}

/// Audit and report an infrastructure failure outside the tree protocol.
async fn fail(
    inner: &super::ManagerInner,
    call: &Call,
    snapshot_id: Option<String>,
    kind: FailureKind,
    detail: String,
) -> ControlError {
    tracing::error!(
        correlation_id = %call.correlation_id,
        action = call.action.as_str(),
        error = %detail,
        "Operation failed"
    );
    inner
        .audit
        .log(call.record().with_snapshot(snapshot_id).failed(detail))
        .await;
    call.finish(AuditOutcome::Failure);
    ControlError::Failed {
        kind,
        reference: call.correlation_id,
    }
}
