//! Certificate status reconciliation.
//!
//! Issuance happens inside the proxy's own CA exchange. The control plane only
//! writes the request and reconciles the registry against what the proxy
//! reports.
//!
//! # Data Flow
//! ```text
//! CertificateMonitor (every poll_interval_secs)
//!     → CertificateObserver::observe()        bounded by observe_timeout_secs
//!     → ConfigManager::reconcile_certificates
//!         → reconcile(registry, observed, now, window)   pure
//!         → mutation protocol (system actor) when anything changed
//! ```
//!
//! # Design Decisions
//! - The transition function is pure so lifecycle rules are testable without I/O
//! - `Revoked` is terminal; a revoked binding is only left by deleting it
//! - Observations for domains not in the registry are ignored

pub mod monitor;
pub mod observer;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::tree::{Certificate, CertificateRegistry, CertificateStatus};

pub use monitor::CertificateMonitor;
pub use observer::{CertificateObserver, ObserveError, StatusFileObserver};

/// Certificate state as recorded by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedCertificate {
    pub domain: String,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

/// One registry entry whose recorded state changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub domain: String,
    pub from: CertificateStatus,
    pub to: CertificateStatus,
}

/// Status `cert` should have given the latest observation.
pub fn next_status(
    cert: &Certificate,
    observed: Option<&ObservedCertificate>,
    now: DateTime<Utc>,
    window: Duration,
) -> CertificateStatus {
    if cert.status == CertificateStatus::Revoked || observed.is_some_and(|o| o.revoked) {
        return CertificateStatus::Revoked;
    }

    let issued = observed.and_then(|o| o.issued_at).or(cert.issued_at);
    let expires = observed.and_then(|o| o.expires_at).or(cert.expires_at);

    match (issued, expires) {
        (None, None) => cert.status,
        (_, None) => CertificateStatus::Valid,
        (_, Some(expires)) if now >= expires => CertificateStatus::Expired,
        (_, Some(expires)) if expires.checked_sub_signed(window).map_or(true, |from| now >= from) => {
            CertificateStatus::Expiring
        }
        (_, Some(_)) => CertificateStatus::Valid,
    }
}

/// Apply observations to `registry` in place and report what changed.
pub fn reconcile(
    registry: &mut CertificateRegistry,
    observed: &[ObservedCertificate],
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<StatusChange> {
    let mut changes = Vec::new();

    for cert in &mut registry.certificates {
        let seen = observed
            .iter()
            .find(|o| o.domain.eq_ignore_ascii_case(&cert.domain));

        let status = next_status(cert, seen, now, window);
        let mut touched = status != cert.status;

        if let Some(seen) = seen.filter(|_| status != CertificateStatus::Revoked) {
            if seen.issued_at.is_some() && seen.issued_at != cert.issued_at {
                cert.issued_at = seen.issued_at;
                touched = true;
            }
            if seen.expires_at.is_some() && seen.expires_at != cert.expires_at {
                cert.expires_at = seen.expires_at;
                touched = true;
            }
        }

        if touched {
            changes.push(StatusChange {
                domain: cert.domain.clone(),
                from: cert.status,
                to: status,
            });
            cert.status = status;
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::CertificateRequest;

    fn pending(domain: &str, now: DateTime<Utc>) -> Certificate {
        CertificateRequest {
            domain: domain.into(),
            alternate_names: Vec::new(),
            resolver: "letsencrypt".into(),
            contact: None,
        }
        .into_pending(now)
    }

    fn issued(domain: &str, now: DateTime<Utc>, days_left: i64) -> ObservedCertificate {
        ObservedCertificate {
            domain: domain.into(),
            issued_at: Some(now - Duration::days(1)),
            expires_at: Some(now + Duration::days(days_left)),
            revoked: false,
        }
    }

    #[test]
    fn test_pending_stays_pending_without_observation() {
        let now = Utc::now();
        let cert = pending("api.example.com", now);
        assert_eq!(next_status(&cert, None, now, Duration::days(30)), CertificateStatus::Pending);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let now = Utc::now();
        let window = Duration::days(30);
        let cert = pending("api.example.com", now);

        let fresh = issued("api.example.com", now, 90);
        assert_eq!(next_status(&cert, Some(&fresh), now, window), CertificateStatus::Valid);

        let close = issued("api.example.com", now, 10);
        assert_eq!(next_status(&cert, Some(&close), now, window), CertificateStatus::Expiring);

        let gone = issued("api.example.com", now, -1);
        assert_eq!(next_status(&cert, Some(&gone), now, window), CertificateStatus::Expired);

        let revoked = ObservedCertificate {
            revoked: true,
            ..fresh
        };
        assert_eq!(next_status(&cert, Some(&revoked), now, window), CertificateStatus::Revoked);
    }

    #[test]
    fn test_revoked_is_terminal() {
        let now = Utc::now();
        let mut cert = pending("api.example.com", now);
        cert.status = CertificateStatus::Revoked;
        let fresh = issued("api.example.com", now, 90);
        assert_eq!(
            next_status(&cert, Some(&fresh), now, Duration::days(30)),
            CertificateStatus::Revoked
        );
    }

    #[test]
    fn test_reconcile_records_renewal() {
        let now = Utc::now();
        let window = Duration::days(30);
        let mut registry = CertificateRegistry {
            certificates: vec![pending("api.example.com", now), pending("www.example.com", now)],
        };

        let changes = reconcile(&mut registry, &[issued("API.example.com", now, 10)], now, window);
        assert_eq!(
            changes,
            vec![StatusChange {
                domain: "api.example.com".into(),
                from: CertificateStatus::Pending,
                to: CertificateStatus::Expiring,
            }]
        );

        // renewal pushes expiry out of the window
        let changes = reconcile(&mut registry, &[issued("api.example.com", now, 90)], now, window);
        assert_eq!(changes[0].from, CertificateStatus::Expiring);
        assert_eq!(changes[0].to, CertificateStatus::Valid);
        assert_eq!(registry.get("www.example.com").unwrap().status, CertificateStatus::Pending);

        // same observation again changes nothing
        assert!(reconcile(&mut registry, &[issued("api.example.com", now, 90)], now, window).is_empty());
    }

    #[test]
    fn test_oversized_window_does_not_overflow() {
        let now = Utc::now();
        let cert = pending("api.example.com", now);
        let fresh = issued("api.example.com", now, 90);
        let window = Duration::days(i64::from(u32::MAX));
        assert_eq!(next_status(&cert, Some(&fresh), now, window), CertificateStatus::Expiring);
    }
}
