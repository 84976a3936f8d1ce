//! Configuration manager: the only writer of the configuration repository.
//!
//! # Data Flow
//! ```text
//! mutating call (actor, change)
//!     → authorize            forbidden  → denied audit record
//!     → rate limiter         throttled  → denied audit record
//!     → spawned task, repository lock held from here on:
//!         backup snapshot (pre-mutation)
//!         → load tree from disk, apply change to a copy
//!         → validate full tree        violations → failure audit, no write
//!         → persist changed documents
//!         → reload trigger (bounded)  failure    → restore snapshot, failure audit
//!         → swap live tree, success audit
//!
//! reads → live tree (ArcSwap), no lock
//! ```
//!
//! # Design Decisions
//! - One `tokio::sync::Mutex` serializes every mutation, backup and restore
//! - The locked section runs in its own task so a dropped caller cannot cancel
//!   a mutation halfway through
//! - Infrastructure failures surface as `ControlError::Failed` carrying the
//!   correlation id; the detail is written to the audit record only

mod connectivity;
mod operations;
mod protocol;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditLogger, AuditRecord, AuditSink};
use crate::backup::{BackupStore, RetentionPolicy, SnapshotManifest};
use crate::config::ControlConfig;
use crate::error::{ControlError, FailureKind};
use crate::observability::metrics;
use crate::reload::ReloadTrigger;
use crate::repository::{Repository, RepositoryError};
use crate::routing::{RequestAttrs, RouteTable};
use crate::security::RateLimiter;
use crate::tree::{Certificate, ConfigTree, Middleware, Route, StaticSettings};

pub use connectivity::ConnectivityReport;

/// Identity of a caller plus the authorization decision made upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub id: String,
    pub permitted: bool,
}

impl Actor {
    pub const SYSTEM_ID: &'static str = "system";

    pub fn new(id: impl Into<String>, permitted: bool) -> Self {
        Self {
            id: id.into(),
            permitted,
        }
    }

    /// The control plane itself (certificate reconciliation).
    pub fn system() -> Self {
        Self::new(Self::SYSTEM_ID, true)
    }
}

/// Timing knobs for external calls made by the manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub reload_timeout: Duration,
    pub expiry_window: chrono::Duration,
    pub connectivity_timeout: Duration,
}

impl ManagerOptions {
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            reload_timeout: Duration::from_secs(config.reload.timeout_secs),
            expiry_window: chrono::Duration::days(i64::from(config.certificates.expiry_window_days)),
            connectivity_timeout: Duration::from_secs(config.admin.connectivity_timeout_secs),
        }
    }
}

/// Counters reported by the admin status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub routes: usize,
    pub middlewares: usize,
    pub certificates: usize,
    pub entry_points: usize,
    pub audit_alerts: u64,
    pub rate_limited_actors: usize,
}

pub(crate) struct ManagerInner {
    pub(crate) repository: Repository,
    pub(crate) backups: BackupStore,
    pub(crate) limiter: RateLimiter,
    pub(crate) reload: Arc<dyn ReloadTrigger>,
    pub(crate) audit: AuditLogger,
    pub(crate) live: ArcSwap<ConfigTree>,
    pub(crate) lock: Mutex<()>,
    pub(crate) options: ManagerOptions,
}

/// Cheaply cloneable handle to the manager.
#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<ManagerInner>,
}

impl ConfigManager {
    /// Open the repository described by `config`, creating it when empty.
    pub async fn open(
        config: &ControlConfig,
        reload: Arc<dyn ReloadTrigger>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self, RepositoryError> {
        let repository = Repository::new(&config.storage.config_dir);
        let tree = repository.init().await?;

        let policy = RetentionPolicy {
            max_snapshots: config.backup.max_snapshots,
            max_age: chrono::Duration::days(i64::from(config.backup.max_age_days)),
            safety_exemption: chrono::Duration::hours(i64::from(config.backup.safety_exemption_hours)),
        };
        let backups = BackupStore::new(repository.clone(), config.storage.backup_dir(), policy);
        let limiter = RateLimiter::new(
            Duration::from_secs(config.rate_limit.window_secs),
            config.rate_limit.max_mutations,
        );

        metrics::set_certificate_counts(&tree.certificates.status_counts());
        tracing::info!(
            root = %repository.root().display(),
            routes = tree.routes.len(),
            middlewares = tree.middlewares.len(),
            certificates = tree.certificates.certificates.len(),
            "Configuration manager ready"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                repository,
                backups,
                limiter,
                reload,
                audit: AuditLogger::new(audit_sink),
                live: ArcSwap::from_pointee(tree),
                lock: Mutex::new(()),
                options: ManagerOptions::from_config(config),
            }),
        })
    }

    pub fn repository(&self) -> &Repository {
        &self.inner.repository
    }

    /// The live tree. Cheap; never blocks on a running mutation.
    pub fn tree(&self) -> Arc<ConfigTree> {
        self.inner.live.load_full()
    }

    pub fn list_routes(&self) -> Vec<Route> {
        self.inner.live.load().routes.iter().cloned().collect()
    }

    pub fn get_route(&self, name: &str) -> Result<Route, ControlError> {
        self.inner
            .live
            .load()
            .routes
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::not_found(crate::error::ResourceKind::Route, name))
    }

    pub fn list_middlewares(&self) -> Vec<Middleware> {
        self.inner.live.load().middlewares.iter().cloned().collect()
    }

    pub fn get_middleware(&self, name: &str) -> Result<Middleware, ControlError> {
        self.inner
            .live
            .load()
            .middlewares
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::not_found(crate::error::ResourceKind::Middleware, name))
    }

    pub fn list_certificates(&self) -> Vec<Certificate> {
        self.inner.live.load().certificates.certificates.clone()
    }

    pub fn get_certificate(&self, domain: &str) -> Result<Certificate, ControlError> {
        self.inner
            .live
            .load()
            .certificates
            .get(domain)
            .cloned()
            .ok_or_else(|| ControlError::not_found(crate::error::ResourceKind::Certificate, domain))
    }

    pub fn settings(&self) -> StaticSettings {
        self.inner.live.load().settings.clone()
    }

    /// Route that would serve `req` on `entry_point` under the live tree.
    pub fn match_request(&self, entry_point: Option<&str>, req: &RequestAttrs) -> Option<Route> {
        let tree = self.inner.live.load();
        RouteTable::from_tree(&tree).match_request(entry_point, req).cloned()
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotManifest>, ControlError> {
        self.inner.backups.list().await.map_err(|e| {
            let reference = Uuid::new_v4();
            tracing::error!(reference = %reference, error = %e, "Failed to list snapshots");
            ControlError::Failed {
                kind: FailureKind::Backup,
                reference,
            }
        })
    }

    /// Newest `limit` audit records.
    pub async fn audit_trail(&self, limit: usize) -> Result<Vec<AuditRecord>, ControlError> {
        self.inner.audit.recent(limit).await.map_err(|e| {
            let reference = Uuid::new_v4();
            tracing::error!(reference = %reference, error = %e, "Failed to read audit trail");
            ControlError::Failed {
                kind: FailureKind::Internal,
                reference,
            }
        })
    }

    pub fn status(&self) -> ManagerStatus {
        let tree = self.inner.live.load();
        ManagerStatus {
            routes: tree.routes.len(),
            middlewares: tree.middlewares.len(),
            certificates: tree.certificates.certificates.len(),
            entry_points: tree.settings.entry_points.len(),
            audit_alerts: self.inner.audit.alert_count(),
            rate_limited_actors: self.inner.limiter.tracked_actors(),
        }
    }

    /// Drop limiter state for actors idle longer than the window.
    pub fn purge_idle_actors(&self) -> usize {
        self.inner.limiter.purge_idle()
    }
}
