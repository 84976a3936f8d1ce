//! Certificate registry entries.
//!
//! # States
//! - Pending: requested, CA exchange not yet observed
//! - Valid: issued and outside the pre-expiry window
//! - Expiring: inside the pre-expiry window
//! - Expired: past `expires_at` without an observed renewal
//! - Revoked: revocation observed
//!
//! # State Transitions
//! ```text
//! Pending  → Valid:    issuance observed
//! Valid    → Expiring: now >= expires_at - window
//! Expiring → Valid:    renewal observed (new expires_at outside the window)
//! Expiring → Expired:  now >= expires_at
//! Expired  → Valid:    late renewal observed
//! any      → Revoked:  revocation observed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a certificate binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Pending,
    Valid,
    Expiring,
    Expired,
    Revoked,
}

impl CertificateStatus {
    pub const ALL: [CertificateStatus; 5] = [
        Self::Pending,
        Self::Valid,
        Self::Expiring,
        Self::Expired,
        Self::Revoked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Expiring => "expiring",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A certificate binding tracked by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Certificate {
    /// Primary domain.
    pub domain: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_names: Vec<String>,

    pub status: CertificateStatus,

    /// Resolver the proxy uses to obtain the certificate.
    pub resolver: String,

    /// Contact address passed along with the issuance request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    pub requested_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Operator request registering a new certificate binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CertificateRequest {
    pub domain: String,
    #[serde(default)]
    pub alternate_names: Vec<String>,
    pub resolver: String,
    #[serde(default)]
    pub contact: Option<String>,
}

impl CertificateRequest {
    /// Build the `pending` registry entry for this request.
    pub fn into_pending(self, now: DateTime<Utc>) -> Certificate {
        Certificate {
            domain: self.domain.to_ascii_lowercase(),
            alternate_names: self
                .alternate_names
                .into_iter()
                .map(|n| n.to_ascii_lowercase())
                .collect(),
            status: CertificateStatus::Pending,
            resolver: self.resolver,
            contact: self.contact,
            requested_at: now,
            issued_at: None,
            expires_at: None,
        }
    }
}

/// The certificate registry document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CertificateRegistry {
    pub certificates: Vec<Certificate>,
}

impl CertificateRegistry {
    pub fn get(&self, domain: &str) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|c| c.domain.eq_ignore_ascii_case(domain))
    }

    pub fn get_mut(&mut self, domain: &str) -> Option<&mut Certificate> {
        self.certificates
            .iter_mut()
            .find(|c| c.domain.eq_ignore_ascii_case(domain))
    }

    pub fn remove(&mut self, domain: &str) -> Option<Certificate> {
        let idx = self
            .certificates
            .iter()
            .position(|c| c.domain.eq_ignore_ascii_case(domain))?;
        Some(self.certificates.remove(idx))
    }

    /// Count of entries per status, in `CertificateStatus::ALL` order.
    pub fn status_counts(&self) -> Vec<(CertificateStatus, usize)> {
        CertificateStatus::ALL
            .iter()
            .map(|s| (*s, self.certificates.iter().filter(|c| c.status == *s).count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_from_request() {
        let now = Utc::now();
        let cert = CertificateRequest {
            domain: "API.Example.com".into(),
            alternate_names: vec!["WWW.example.com".into()],
            resolver: "letsencrypt".into(),
            contact: Some("ops@example.com".into()),
        }
        .into_pending(now);

        assert_eq!(cert.domain, "api.example.com");
        assert_eq!(cert.alternate_names, vec!["www.example.com"]);
        assert_eq!(cert.status, CertificateStatus::Pending);
        assert_eq!(cert.requested_at, now);
        assert!(cert.expires_at.is_none());
    }

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let mut registry = CertificateRegistry::default();
        registry.certificates.push(
            CertificateRequest {
                domain: "a.example.com".into(),
                alternate_names: vec![],
                resolver: "le".into(),
                contact: None,
            }
            .into_pending(Utc::now()),
        );
        assert!(registry.get("A.EXAMPLE.COM").is_some());
        assert!(registry.remove("a.example.com").is_some());
        assert!(registry.certificates.is_empty());
    }

    #[test]
    fn test_registry_toml_round_trip() {
        let mut registry = CertificateRegistry::default();
        registry.certificates.push(
            CertificateRequest {
                domain: "a.example.com".into(),
                alternate_names: vec![],
                resolver: "le".into(),
                contact: None,
            }
            .into_pending(Utc::now()),
        );
        let text = toml::to_string_pretty(&registry).unwrap();
        assert!(text.contains("status = \"pending\""));
        let back: CertificateRegistry = toml::from_str(&text).unwrap();
        assert_eq!(back, registry);
    }
}
