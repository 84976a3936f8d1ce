//! Sources of observed certificate state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use super::ObservedCertificate;

#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("failed to read certificate status {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed certificate status {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reports the certificate state the proxy has recorded.
#[async_trait]
pub trait CertificateObserver: Send + Sync {
    async fn observe(&self) -> Result<Vec<ObservedCertificate>, ObserveError>;
}

/// Reads a JSON array of `{domain, issued_at, expires_at, revoked}` written
/// by the proxy.
#[derive(Debug, Clone)]
pub struct StatusFileObserver {
    path: PathBuf,
}

impl StatusFileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CertificateObserver for StatusFileObserver {
    async fn observe(&self) -> Result<Vec<ObservedCertificate>, ObserveError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // nothing issued yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ObserveError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| ObserveError::Decode {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_observes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let observer = StatusFileObserver::new(dir.path().join("acme-status.json"));
        assert!(observer.observe().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_status_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme-status.json");
        std::fs::write(
            &path,
            r#"[
                {"domain": "api.example.com", "issued_at": "2026-01-01T00:00:00Z", "expires_at": "2026-04-01T00:00:00Z"},
                {"domain": "old.example.com", "revoked": true}
            ]"#,
        )
        .unwrap();

        let observed = StatusFileObserver::new(&path).observe().await.unwrap();
        assert_eq!(observed.len(), 2);
        assert!(observed[0].expires_at.is_some());
        assert!(!observed[0].revoked);
        assert!(observed[1].revoked);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme-status.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = StatusFileObserver::new(&path).observe().await.unwrap_err();
        assert!(matches!(err, ObserveError::Decode { .. }));
    }
}
