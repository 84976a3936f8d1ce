//! Snapshot manifest format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotTrigger {
    /// Operator asked for it.
    Manual,
    /// Taken by the manager before applying a change.
    PreMutation,
    /// Taken right before an operator restore overwrites the live tree.
    PreRestoreSafety,
}

impl SnapshotTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::PreMutation => "pre-mutation",
            Self::PreRestoreSafety => "pre-restore-safety",
        }
    }
}

/// One file captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ManifestEntry {
    /// Path relative to the configuration directory.
    pub path: String,
    /// Lowercase hex SHA-256 of the file contents.
    pub sha256: String,
    pub size: u64,
}

impl ManifestEntry {
    pub fn for_contents(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            sha256: sha256_hex(bytes),
            size: bytes.len() as u64,
        }
    }

    /// True if `bytes` are exactly what was captured.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.size && sha256_hex(bytes) == self.sha256
    }
}

/// `manifest.json` of a snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SnapshotManifest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub trigger: SnapshotTrigger,
    /// After this instant the snapshot may be pruned regardless of count.
    pub retention_expiry: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Snapshot ids are timestamps with an optional `-n` collision suffix.
pub fn is_valid_snapshot_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !id.starts_with('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_verification() {
        let entry = ManifestEntry::for_contents("static.toml", b"[entry_points]");
        assert_eq!(entry.sha256.len(), 64);
        assert!(entry.verify(b"[entry_points]"));
        assert!(!entry.verify(b"[entry_points] "));
    }

    #[test]
    fn test_snapshot_ids() {
        assert!(is_valid_snapshot_id("20260101T120000123456Z"));
        assert!(is_valid_snapshot_id("20260101T120000123456Z-2"));
        assert!(!is_valid_snapshot_id("../etc"));
        assert!(!is_valid_snapshot_id(".tmp-x"));
        assert!(!is_valid_snapshot_id(""));
    }

    #[test]
    fn test_trigger_labels() {
        let json = serde_json::to_string(&SnapshotTrigger::PreRestoreSafety).unwrap();
        assert_eq!(json, "\"pre-restore-safety\"");
        assert_eq!(SnapshotTrigger::PreMutation.as_str(), "pre-mutation");
    }
}
