//! Backup/restore store.
//!
//! # Responsibilities
//! - Copy every live configuration file into an immutable, checksummed snapshot
//! - Restore a snapshot over the live tree after verifying it
//! - Prune snapshots beyond the retention count or age
//!
//! # Data Flow
//! ```text
//! snapshot: live files → backups/.tmp-<id>/files/... + manifest.json
//!               → rename to backups/<id>/ (complete or absent)
//!               → prune
//!
//! restore:  backups/<id>/manifest.json → read + verify every file
//!               → write_atomic changed files, remove files not in snapshot
//! ```
//!
//! # Design Decisions
//! - Snapshot directories are never modified after the rename
//! - Verification happens before the first live file is touched
//! - Safety snapshots are exempt from pruning for a grace period
//! - Callers hold the repository lock; the store itself does not lock

pub mod manifest;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;

use crate::observability::metrics;
use crate::repository::{atomic::sync_dir, is_config_path, write_atomic, Repository, RepositoryError};

pub use manifest::{is_valid_snapshot_id, ManifestEntry, SnapshotManifest, SnapshotTrigger};

const MANIFEST_FILE: &str = "manifest.json";
const FILES_DIR: &str = "files";
const STAGING_PREFIX: &str = ".tmp-";

/// Errors raised by the backup store.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("snapshot `{0}` not found")]
    NotFound(String),

    #[error("snapshot `{id}` failed verification: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("manifest encoding: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl BackupError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// How long snapshots are kept.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Newest non-exempt snapshots always kept.
    pub max_snapshots: usize,
    /// Snapshots older than this are pruned even within the count.
    pub max_age: chrono::Duration,
    /// Grace period during which safety snapshots are never pruned.
    pub safety_exemption: chrono::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_snapshots: 10,
            max_age: chrono::Duration::days(30),
            safety_exemption: chrono::Duration::hours(24),
        }
    }
}

/// Versioned snapshot store under `<config_dir>/backups`.
#[derive(Debug, Clone)]
pub struct BackupStore {
    repository: Repository,
    dir: PathBuf,
    policy: RetentionPolicy,
}

impl BackupStore {
    pub fn new(repository: Repository, dir: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            repository,
            dir: dir.into(),
            policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Capture the live tree now, then prune. The new snapshot itself is
    /// never pruned by this call.
    pub async fn snapshot(&self, trigger: SnapshotTrigger) -> Result<SnapshotManifest, BackupError> {
        let manifest = self.snapshot_at(trigger, Utc::now()).await?;
        if let Err(e) = self.prune(Utc::now(), Some(&manifest.id)).await {
            tracing::warn!(error = %e, "Snapshot pruning failed");
        }
        Ok(manifest)
    }

    /// Capture the live tree with an explicit creation time. Does not prune.
    pub async fn snapshot_at(
        &self,
        trigger: SnapshotTrigger,
        created_at: DateTime<Utc>,
    ) -> Result<SnapshotManifest, BackupError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BackupError::io(&self.dir, e))?;

        let id = self.unused_id(created_at).await;
        let staging = self.dir.join(format!("{STAGING_PREFIX}{id}"));

        let result = self.stage(&staging, &id, trigger, created_at).await;
        let manifest = match result {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        };

        let target = self.dir.join(&id);
        fs::rename(&staging, &target)
            .await
            .map_err(|e| BackupError::io(&target, e))?;
        sync_dir(&self.dir).await;

        tracing::info!(
            snapshot = %manifest.id,
            trigger = manifest.trigger.as_str(),
            files = manifest.files.len(),
            "Snapshot created"
        );
        Ok(manifest)
    }

    async fn stage(
        &self,
        staging: &Path,
        id: &str,
        trigger: SnapshotTrigger,
        created_at: DateTime<Utc>,
    ) -> Result<SnapshotManifest, BackupError> {
        let mut files = Vec::new();
        for relative in self.repository.config_files().await? {
            let bytes = self.repository.read_file(&relative).await?;
            let dest = staging.join(FILES_DIR).join(&relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BackupError::io(parent, e))?;
            }
            write_atomic(&dest, &bytes)
                .await
                .map_err(|e| BackupError::io(&dest, e))?;
            files.push(ManifestEntry::for_contents(relative, &bytes));
        }

        let manifest = SnapshotManifest {
            id: id.to_string(),
            created_at,
            trigger,
            retention_expiry: self.retention_expiry(trigger, created_at),
            files,
        };
        let path = staging.join(MANIFEST_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(&manifest)?)
            .await
            .map_err(|e| BackupError::io(&path, e))?;
        Ok(manifest)
    }

    fn retention_expiry(&self, trigger: SnapshotTrigger, created_at: DateTime<Utc>) -> DateTime<Utc> {
        let mut keep = self.policy.max_age;
        if trigger == SnapshotTrigger::PreRestoreSafety && self.policy.safety_exemption > keep {
            keep = self.policy.safety_exemption;
        }
        created_at
            .checked_add_signed(keep)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    async fn unused_id(&self, created_at: DateTime<Utc>) -> String {
        let base = created_at.format("%Y%m%dT%H%M%S%6fZ").to_string();
        let mut id = base.clone();
        let mut n = 1;
        while fs::try_exists(self.dir.join(&id)).await.unwrap_or(false) {
            id = format!("{base}-{n}");
            n += 1;
        }
        id
    }

    /// All complete snapshots, newest first.
    pub async fn list(&self) -> Result<Vec<SnapshotManifest>, BackupError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(&self.dir, e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let Some(id) = name.to_str() else { continue };
            if !is_valid_snapshot_id(id) {
                continue;
            }
            match self.get(id).await {
                Ok(manifest) => out.push(manifest),
                Err(e) => tracing::warn!(snapshot = id, error = %e, "Skipping unreadable snapshot"),
            }
        }

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }

    /// Manifest of one snapshot.
    pub async fn get(&self, id: &str) -> Result<SnapshotManifest, BackupError> {
        if !is_valid_snapshot_id(id) {
            return Err(BackupError::NotFound(id.to_string()));
        }
        let path = self.dir.join(id).join(MANIFEST_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(id.to_string()))
            }
            Err(e) => return Err(BackupError::io(&path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Overwrite the live tree with snapshot `id`.
    ///
    /// Every file is verified first; on a mismatch nothing is written.
    /// Returns the absolute paths touched.
    pub async fn restore_files(&self, id: &str) -> Result<Vec<PathBuf>, BackupError> {
        let manifest = self.get(id).await?;
        let snapshot_dir = self.dir.join(id).join(FILES_DIR);

        let mut verified = Vec::with_capacity(manifest.files.len());
        for entry in &manifest.files {
            if !is_config_path(&entry.path) {
                return Err(BackupError::Corrupt {
                    id: id.to_string(),
                    reason: format!("unexpected path `{}`", entry.path),
                });
            }
            let path = snapshot_dir.join(&entry.path);
            let bytes = fs::read(&path).await.map_err(|e| BackupError::Corrupt {
                id: id.to_string(),
                reason: format!("{}: {e}", entry.path),
            })?;
            if !entry.verify(&bytes) {
                return Err(BackupError::Corrupt {
                    id: id.to_string(),
                    reason: format!("checksum mismatch for `{}`", entry.path),
                });
            }
            verified.push((entry.path.as_str(), bytes));
        }

        let mut changed = Vec::new();
        for (relative, bytes) in &verified {
            let live = self.repository.resolve(relative);
            if fs::read(&live).await.ok().as_deref() == Some(bytes.as_slice()) {
                continue;
            }
            write_atomic(&live, bytes)
                .await
                .map_err(|e| BackupError::io(&live, e))?;
            changed.push(live);
        }

        for relative in self.repository.config_files().await? {
            if !verified.iter().any(|(p, _)| *p == relative) {
                let live = self.repository.resolve(&relative);
                fs::remove_file(&live)
                    .await
                    .map_err(|e| BackupError::io(&live, e))?;
                changed.push(live);
            }
        }

        tracing::info!(snapshot = id, files = changed.len(), "Snapshot restored");
        Ok(changed)
    }

    /// Remove snapshots outside the retention policy as of `now`.
    ///
    /// Returns the ids removed.
    pub async fn prune_at(&self, now: DateTime<Utc>) -> Result<Vec<String>, BackupError> {
        self.prune(now, None).await
    }

    async fn prune(&self, now: DateTime<Utc>, keep: Option<&str>) -> Result<Vec<String>, BackupError> {
        self.remove_stale_staging().await;

        let mut kept = 0usize;
        let mut removed = Vec::new();
        for manifest in self.list().await? {
            if keep == Some(manifest.id.as_str()) {
                kept += 1;
                continue;
            }
            if self.is_exempt(&manifest, now) {
                continue;
            }
            if now < manifest.retention_expiry && kept < self.policy.max_snapshots {
                kept += 1;
                continue;
            }

            let path = self.dir.join(&manifest.id);
            fs::remove_dir_all(&path)
                .await
                .map_err(|e| BackupError::io(&path, e))?;
            tracing::debug!(snapshot = %manifest.id, "Pruned snapshot");
            removed.push(manifest.id);
        }

        if !removed.is_empty() {
            metrics::record_snapshots_pruned(removed.len());
        }
        Ok(removed)
    }

    /// Safety snapshots inside their grace period.
    fn is_exempt(&self, manifest: &SnapshotManifest, now: DateTime<Utc>) -> bool {
        if manifest.trigger != SnapshotTrigger::PreRestoreSafety {
            return false;
        }
        manifest
            .created_at
            .checked_add_signed(self.policy.safety_exemption)
            .map_or(true, |until| now < until)
    }

    /// Staging directories left behind by an interrupted snapshot.
    async fn remove_stale_staging(&self) {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(STAGING_PREFIX));
            if is_staging {
                let _ = fs::remove_dir_all(entry.path()).await;
            }
        }
    }
}
