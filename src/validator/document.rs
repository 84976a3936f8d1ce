//! Document-level checks on raw TOML.
//!
//! # Data Flow
//! ```text
//! file text
//!     → toml::Table           (syntax)
//!     → validate_document     (required top-level section)
//!     → typed document        (shape)
//! ```

use serde::de::DeserializeOwned;

use crate::error::{Violation, ViolationKind};

/// The document families persisted in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Static,
    Routes,
    Middlewares,
    Certificates,
}

impl DocumentKind {
    /// Top-level key every document of this kind must define.
    pub fn required_section(self) -> &'static str {
        match self {
            Self::Static => "entry_points",
            Self::Routes => "routes",
            Self::Middlewares => "middlewares",
            Self::Certificates => "certificates",
        }
    }
}

/// Check that `table` carries the section required for `kind`.
pub fn validate_document(kind: DocumentKind, path: &str, table: &toml::Table) -> Vec<Violation> {
    let section = kind.required_section();
    if table.contains_key(section) {
        Vec::new()
    } else {
        vec![Violation::new(
            ViolationKind::MissingSection,
            path,
            format!("required section `{section}` is missing"),
        )]
    }
}

/// Parse, section-check and decode one document.
pub fn parse_document<T: DeserializeOwned>(
    kind: DocumentKind,
    path: &str,
    text: &str,
) -> Result<T, Vec<Violation>> {
    let table: toml::Table = toml::from_str(text)
        .map_err(|e| vec![Violation::new(ViolationKind::Syntax, path, e.message().trim().to_string())])?;

    let violations = validate_document(kind, path, &table);
    if !violations.is_empty() {
        return Err(violations);
    }

    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| {
            vec![Violation::new(ViolationKind::Syntax, path, e.message().trim().to_string())]
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::StaticSettings;

    #[test]
    fn test_missing_section_reported() {
        let err = parse_document::<StaticSettings>(DocumentKind::Static, "static.toml", "[other]\nx = 1")
            .unwrap_err();
        assert_eq!(err[0].kind, ViolationKind::MissingSection);
        assert!(err[0].message.contains("entry_points"));
    }

    #[test]
    fn test_syntax_error_reported() {
        let err = parse_document::<StaticSettings>(DocumentKind::Static, "static.toml", "entry_points = [")
            .unwrap_err();
        assert_eq!(err[0].kind, ViolationKind::Syntax);
        assert_eq!(err[0].path, "static.toml");
    }

    #[test]
    fn test_valid_document_decodes() {
        let settings: StaticSettings = parse_document(
            DocumentKind::Static,
            "static.toml",
            "[entry_points.web]\naddress = \":8080\"",
        )
        .unwrap();
        assert_eq!(settings.entry_points["web"].address, ":8080");
    }
}
