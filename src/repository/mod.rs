//! Configuration repository.
//!
//! # Responsibilities
//! - Read the on-disk configuration directory into a `ConfigTree`
//! - Render a tree back into TOML documents and write the ones that changed
//! - Enumerate live configuration files for snapshots and restores
//!
//! # Data Flow
//! ```text
//! load:    static.toml ─┐
//!          certificates.toml ─┼─→ parse_document (syntax, section, shape) → ConfigTree
//!          routes/*.toml ─────┤
//!          middlewares/*.toml ┘
//!
//! persist: ConfigTree → render (relpath → text)
//!              → compare with disk
//!              → write_atomic (changed only), remove stale documents
//! ```
//!
//! # Design Decisions
//! - Exactly one writer: only the configuration manager calls `persist`
//! - Every write is a whole-file atomic replacement, so the proxy and readers
//!   never observe a half-written document
//! - Unchanged documents are not rewritten, which keeps reloads quiet

pub mod atomic;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::error::{join_violations, Violation, ViolationKind};
use crate::tree::{
    CertificateRegistry, ConfigTree, Document, DocumentSet, Middleware, Route, StaticSettings,
};
use crate::validator::{parse_document, DocumentKind};

pub use atomic::write_atomic;

pub const STATIC_FILE: &str = "static.toml";
pub const CERTIFICATES_FILE: &str = "certificates.toml";
pub const ROUTES_DIR: &str = "routes";
pub const MIDDLEWARES_DIR: &str = "middlewares";

/// Errors raised by the repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration documents: {}", join_violations(.0))]
    Invalid(Vec<Violation>),

    #[error("failed to render {path}: {source}")]
    Render {
        path: String,
        #[source]
        source: toml::ser::Error,
    },
}

impl RepositoryError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RoutesDocument {
    routes: Vec<Route>,
}

#[derive(Serialize, Deserialize)]
struct MiddlewaresDocument {
    middlewares: Vec<Middleware>,
}

/// Handle on the configuration directory.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a repository-relative document path.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Create the directory layout and a bootstrap tree if nothing exists yet.
    ///
    /// Returns the tree now on disk.
    pub async fn init(&self) -> Result<ConfigTree, RepositoryError> {
        for dir in [ROUTES_DIR, MIDDLEWARES_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| RepositoryError::io(&path, e))?;
        }

        if fs::try_exists(self.root.join(STATIC_FILE)).await.unwrap_or(false) {
            return self.load().await;
        }

        let tree = ConfigTree::bootstrap();
        self.persist(&tree).await?;
        tracing::info!(root = %self.root.display(), "Initialized configuration repository");
        Ok(tree)
    }

    /// Read the whole tree from disk.
    pub async fn load(&self) -> Result<ConfigTree, RepositoryError> {
        let mut violations = Vec::new();

        let settings = match self.read_text(STATIC_FILE).await? {
            Some(text) => parse_document::<StaticSettings>(DocumentKind::Static, STATIC_FILE, &text)
                .map_err(|v| violations.extend(v))
                .ok(),
            None => {
                violations.push(Violation::new(
                    ViolationKind::MissingSection,
                    STATIC_FILE,
                    "static settings document is missing",
                ));
                None
            }
        };

        let certificates = match self.read_text(CERTIFICATES_FILE).await? {
            Some(text) => parse_document::<CertificateRegistry>(
                DocumentKind::Certificates,
                CERTIFICATES_FILE,
                &text,
            )
            .map_err(|v| violations.extend(v))
            .ok(),
            None => Some(CertificateRegistry::default()),
        };

        let mut route_docs = Vec::new();
        for path in self.list_dir(ROUTES_DIR).await? {
            if let Some(text) = self.read_text(&path).await? {
                match parse_document::<RoutesDocument>(DocumentKind::Routes, &path, &text) {
                    Ok(doc) => route_docs.push(Document {
                        path,
                        items: doc.routes,
                    }),
                    Err(v) => violations.extend(v),
                }
            }
        }

        let mut middleware_docs = Vec::new();
        for path in self.list_dir(MIDDLEWARES_DIR).await? {
            if let Some(text) = self.read_text(&path).await? {
                match parse_document::<MiddlewaresDocument>(DocumentKind::Middlewares, &path, &text) {
                    Ok(doc) => middleware_docs.push(Document {
                        path,
                        items: doc.middlewares,
                    }),
                    Err(v) => violations.extend(v),
                }
            }
        }

        match (settings, certificates) {
            (Some(settings), Some(certificates)) if violations.is_empty() => Ok(ConfigTree {
                settings,
                routes: DocumentSet::from_documents(route_docs),
                middlewares: DocumentSet::from_documents(middleware_docs),
                certificates,
            }),
            _ => Err(RepositoryError::Invalid(violations)),
        }
    }

    /// Render every document of `tree` as `relative path → TOML text`.
    pub fn render(tree: &ConfigTree) -> Result<BTreeMap<String, String>, RepositoryError> {
        let mut out = BTreeMap::new();
        out.insert(STATIC_FILE.to_string(), to_toml(STATIC_FILE, &tree.settings)?);
        out.insert(
            CERTIFICATES_FILE.to_string(),
            to_toml(CERTIFICATES_FILE, &tree.certificates)?,
        );
        for doc in tree.routes.documents() {
            let body = RoutesDocument {
                routes: doc.items.clone(),
            };
            out.insert(doc.path.clone(), to_toml(&doc.path, &body)?);
        }
        for doc in tree.middlewares.documents() {
            let body = MiddlewaresDocument {
                middlewares: doc.items.clone(),
            };
            out.insert(doc.path.clone(), to_toml(&doc.path, &body)?);
        }
        Ok(out)
    }

    /// Write the documents of `tree` that differ from disk.
    ///
    /// Documents on disk that `tree` no longer has are removed. Returns the
    /// absolute paths touched.
    pub async fn persist(&self, tree: &ConfigTree) -> Result<Vec<PathBuf>, RepositoryError> {
        let rendered = Self::render(tree)?;
        let mut changed = Vec::new();

        for (relative, text) in &rendered {
            let path = self.resolve(relative);
            let current = match fs::read(&path).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(RepositoryError::io(&path, e)),
            };
            if current.as_deref() == Some(text.as_bytes()) {
                continue;
            }
            write_atomic(&path, text.as_bytes())
                .await
                .map_err(|e| RepositoryError::io(&path, e))?;
            changed.push(path);
        }

        for relative in self.config_files().await? {
            if !rendered.contains_key(&relative) {
                let path = self.resolve(&relative);
                fs::remove_file(&path)
                    .await
                    .map_err(|e| RepositoryError::io(&path, e))?;
                changed.push(path);
            }
        }

        if !changed.is_empty() {
            tracing::debug!(files = changed.len(), "Persisted configuration documents");
        }
        Ok(changed)
    }

    /// Relative paths of every live configuration file, sorted.
    pub async fn config_files(&self) -> Result<Vec<String>, RepositoryError> {
        let mut files = Vec::new();
        for name in [STATIC_FILE, CERTIFICATES_FILE] {
            if fs::try_exists(self.root.join(name)).await.unwrap_or(false) {
                files.push(name.to_string());
            }
        }
        files.extend(self.list_dir(ROUTES_DIR).await?);
        files.extend(self.list_dir(MIDDLEWARES_DIR).await?);
        files.sort();
        Ok(files)
    }

    /// Read one live configuration file.
    pub async fn read_file(&self, relative: &str) -> Result<Vec<u8>, RepositoryError> {
        let path = self.resolve(relative);
        fs::read(&path).await.map_err(|e| RepositoryError::io(&path, e))
    }

    async fn read_text(&self, relative: &str) -> Result<Option<String>, RepositoryError> {
        let path = self.resolve(relative);
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::io(&path, e)),
        }
    }

    /// `*.toml` files directly inside `dir`, as relative paths.
    async fn list_dir(&self, dir: &str) -> Result<Vec<String>, RepositoryError> {
        let path = self.root.join(dir);
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RepositoryError::io(&path, e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RepositoryError::io(&path, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".toml") && !name.starts_with('.') {
                out.push(format!("{dir}/{name}"));
            }
        }
        out.sort();
        Ok(out)
    }
}

/// True for relative paths the repository owns (`static.toml`,
/// `certificates.toml`, `routes/*.toml`, `middlewares/*.toml`).
pub fn is_config_path(relative: &str) -> bool {
    if relative == STATIC_FILE || relative == CERTIFICATES_FILE {
        return true;
    }
    match relative.split_once('/') {
        Some((dir, name)) => {
            (dir == ROUTES_DIR || dir == MIDDLEWARES_DIR)
                && name.ends_with(".toml")
                && !name.starts_with('.')
                && !name.contains(['/', '\\'])
                && name != ".."
        }
        None => false,
    }
}

fn to_toml<T: Serialize>(path: &str, value: &T) -> Result<String, RepositoryError> {
    toml::to_string(value).map_err(|source| RepositoryError::Render {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{MiddlewareKind, DEFAULT_MIDDLEWARE_DOCUMENT, DEFAULT_ROUTE_DOCUMENT};

    fn sample_tree() -> ConfigTree {
        let mut tree = ConfigTree::bootstrap();
        let mut config = toml::Table::new();
        config.insert("scheme".into(), toml::Value::String("https".into()));
        tree.middlewares.insert(
            DEFAULT_MIDDLEWARE_DOCUMENT,
            Middleware::new("to-https", MiddlewareKind::RedirectScheme, config),
        );
        tree.routes.insert(
            DEFAULT_ROUTE_DOCUMENT,
            Route::new("api", "Host(`api.example.com`)", "api-svc")
                .with_priority(10)
                .with_middleware("to-https")
                .with_entry_point("websecure"),
        );
        tree
    }

    #[tokio::test]
    async fn test_init_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());

        let tree = repo.init().await.unwrap();
        assert_eq!(tree, ConfigTree::bootstrap());
        assert_eq!(repo.load().await.unwrap(), tree);
        assert_eq!(
            repo.config_files().await.unwrap(),
            vec![
                "certificates.toml".to_string(),
                "middlewares/default.toml".to_string(),
                "routes/default.toml".to_string(),
                "static.toml".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_persist_writes_only_changed_documents() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());
        repo.init().await.unwrap();

        let tree = sample_tree();
        let changed = repo.persist(&tree).await.unwrap();
        assert_eq!(changed.len(), 2); // route and middleware documents
        assert_eq!(repo.load().await.unwrap(), tree);

        assert!(repo.persist(&tree).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_reports_missing_section() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());
        repo.init().await.unwrap();
        std::fs::write(dir.path().join("routes/broken.toml"), "[other]\nkey = 1\n").unwrap();

        match repo.load().await {
            Err(RepositoryError::Invalid(v)) => {
                assert_eq!(v[0].kind, ViolationKind::MissingSection);
                assert_eq!(v[0].path, "routes/broken.toml");
            }
            other => panic!("expected invalid documents, got {other:?}"),
        }
    }

    #[test]
    fn test_config_paths() {
        assert!(is_config_path("static.toml"));
        assert!(is_config_path("routes/api.toml"));
        assert!(!is_config_path("routes/../static.toml"));
        assert!(!is_config_path("backups/x/manifest.json"));
        assert!(!is_config_path("/etc/passwd"));
    }
}
