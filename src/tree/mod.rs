//! Configuration tree data model.
//!
//! # Data Flow
//! ```text
//! <config_dir>/static.toml        → StaticSettings
//! <config_dir>/routes/*.toml      → DocumentSet<Route>
//! <config_dir>/middlewares/*.toml → DocumentSet<Middleware>
//! <config_dir>/certificates.toml  → CertificateRegistry
//!     → ConfigTree (immutable snapshot, shared via Arc)
//! ```
//!
//! # Design Decisions
//! - The tree is a plain value; mutations clone it, edit the copy and swap the
//!   whole thing in (copy-on-write)
//! - Routes and middleware remember the document they were loaded from so
//!   writes go back to the same file
//! - Duplicate names across documents are representable on purpose; the
//!   validator is what rejects them

pub mod certificate;
pub mod middleware;
pub mod route;
pub mod settings;

use serde::{Deserialize, Serialize};

pub use certificate::{Certificate, CertificateRegistry, CertificateRequest, CertificateStatus};
pub use middleware::{Middleware, MiddlewareKind, MiddlewareSpec};
pub use route::Route;
pub use settings::{CertResolver, EntryPoint, StaticSettings};

/// Relative path of the default route document.
pub const DEFAULT_ROUTE_DOCUMENT: &str = "routes/default.toml";

/// Relative path of the default middleware document.
pub const DEFAULT_MIDDLEWARE_DOCUMENT: &str = "middlewares/default.toml";

/// Entities addressed by a unique name.
pub trait Named {
    fn name(&self) -> &str;
}

/// One on-disk document and the entries it defines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    /// Path relative to the configuration directory.
    pub path: String,
    pub items: Vec<T>,
}

/// Entries of one kind spread over one or more documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSet<T> {
    documents: Vec<Document<T>>,
}

impl<T> Default for DocumentSet<T> {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
        }
    }
}

impl<T: Named> DocumentSet<T> {
    pub fn from_documents(mut documents: Vec<Document<T>>) -> Self {
        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Self { documents }
    }

    pub fn documents(&self) -> &[Document<T>] {
        &self.documents
    }

    /// All entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.documents.iter().flat_map(|d| d.items.iter())
    }

    pub fn len(&self) -> usize {
        self.documents.iter().map(|d| d.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.iter().find(|item| item.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append an entry to `document`, creating the document when needed.
    pub fn insert(&mut self, document: &str, item: T) {
        match self.documents.iter_mut().find(|d| d.path == document) {
            Some(doc) => doc.items.push(item),
            None => {
                self.documents.push(Document {
                    path: document.to_string(),
                    items: vec![item],
                });
                self.documents.sort_by(|a, b| a.path.cmp(&b.path));
            }
        }
    }

    /// Replace the entry named `name` in place, keeping its document and position.
    pub fn replace(&mut self, name: &str, item: T) -> Option<T> {
        for doc in &mut self.documents {
            if let Some(slot) = doc.items.iter_mut().find(|i| i.name() == name) {
                return Some(std::mem::replace(slot, item));
            }
        }
        None
    }

    /// Remove the first entry named `name`.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        for doc in &mut self.documents {
            if let Some(idx) = doc.items.iter().position(|i| i.name() == name) {
                return Some(doc.items.remove(idx));
            }
        }
        None
    }
}

/// Full configuration tree as read from, and written to, the repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigTree {
    pub settings: StaticSettings,
    pub routes: DocumentSet<Route>,
    pub middlewares: DocumentSet<Middleware>,
    pub certificates: CertificateRegistry,
}

impl ConfigTree {
    /// A minimal tree with default static settings and nothing else.
    pub fn bootstrap() -> Self {
        Self {
            settings: StaticSettings::default(),
            routes: DocumentSet::from_documents(vec![Document {
                path: DEFAULT_ROUTE_DOCUMENT.to_string(),
                items: Vec::new(),
            }]),
            middlewares: DocumentSet::from_documents(vec![Document {
                path: DEFAULT_MIDDLEWARE_DOCUMENT.to_string(),
                items: Vec::new(),
            }]),
            certificates: CertificateRegistry::default(),
        }
    }

    /// Names of routes whose middleware chain references `middleware`.
    pub fn routes_using_middleware(&self, middleware: &str) -> Vec<String> {
        self.routes
            .iter()
            .filter(|r| r.middlewares.iter().any(|m| m == middleware))
            .map(|r| r.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str) -> Route {
        Route::new(name, "PathPrefix(`/`)", "svc")
    }

    #[test]
    fn test_insert_creates_document_once() {
        let mut set = DocumentSet::default();
        set.insert(DEFAULT_ROUTE_DOCUMENT, route("a"));
        set.insert(DEFAULT_ROUTE_DOCUMENT, route("b"));
        set.insert("routes/extra.toml", route("c"));

        assert_eq!(set.documents().len(), 2);
        assert_eq!(set.len(), 3);
        // sorted by path: default.toml < extra.toml
        assert_eq!(set.documents()[0].path, DEFAULT_ROUTE_DOCUMENT);
    }

    #[test]
    fn test_replace_keeps_document() {
        let mut set = DocumentSet::from_documents(vec![Document {
            path: "routes/extra.toml".into(),
            items: vec![route("a"), route("b")],
        }]);
        let mut updated = route("b");
        updated.priority = 7;

        let old = set.replace("b", updated).unwrap();
        assert_eq!(old.priority, 0);
        assert_eq!(set.documents()[0].items[1].priority, 7);
        assert!(set.replace("missing", route("x")).is_none());
    }

    #[test]
    fn test_remove_returns_entry() {
        let mut set = DocumentSet::default();
        set.insert(DEFAULT_ROUTE_DOCUMENT, route("a"));
        assert!(set.remove("a").is_some());
        assert!(set.is_empty());
        // the document itself stays so the file is rewritten empty
        assert_eq!(set.documents().len(), 1);
    }
}
