//! Connectivity "test" operation: can the control plane reach a backend?
//!
//! Rate limited and audited like any mutation, but never touches the
//! repository or takes the lock.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpStream;
use url::Url;

use super::protocol::{summarize, Call};
use super::{Actor, ConfigManager};
use crate::audit::{AuditAction, AuditOutcome};
use crate::error::{ControlError, Violation, ViolationKind};
use crate::resilience::with_deadline;

/// Result of one TCP reachability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityReport {
    pub target: String,
    pub address: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `host:port` to dial for `target`, which is a URL or a bare `host:port`.
pub(crate) fn dial_address(target: &str) -> Option<String> {
    let target = target.trim();
    let url = if target.contains("://") {
        Url::parse(target).ok()?
    } else {
        Url::parse(&format!("tcp://{target}")).ok()?
    };

    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    if host.contains(':') {
        Some(format!("[{}]:{port}", host.trim_matches(['[', ']'])))
    } else {
        Some(format!("{host}:{port}"))
    }
}

async fn dial(address: &str, timeout: Duration) -> (bool, Option<u64>, Option<String>) {
    let started = Instant::now();
    match with_deadline("connectivity check", timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => (true, Some(started.elapsed().as_millis() as u64), None),
        Ok(Err(e)) => (false, None, Some(e.to_string())),
        Err(e) => (false, None, Some(e.to_string())),
    }
}

impl ConfigManager {
    /// Check `target` with a TCP connect bounded by the connectivity timeout.
    pub async fn test_connectivity(&self, actor: &Actor, target: &str) -> Result<ConnectivityReport, ControlError> {
        let call = Call::new(actor, AuditAction::ConnectivityTest, target);
        self.admit(&call, true).await?;

        let Some(address) = dial_address(target) else {
            let err = ControlError::Validation(vec![Violation::new(
                ViolationKind::InvalidValue,
                "target",
                format!("`{target}` is not a URL or host:port with a known port"),
            )]);
            self.inner.audit.log(call.record().failed(err.to_string())).await;
            call.finish(AuditOutcome::Failure);
            return Err(err);
        };

        let (reachable, latency_ms, error) = dial(&address, self.inner.options.connectivity_timeout).await;
        let report = ConnectivityReport {
            target: target.to_string(),
            address,
            reachable,
            latency_ms,
            error,
        };

        tracing::info!(
            correlation_id = %call.correlation_id,
            actor = %call.actor.id,
            address = %report.address,
            reachable,
            "Connectivity test"
        );
        let record = call.record().with_after(summarize("after", &report));
        self.inner.audit.log(record).await;
        call.finish(AuditOutcome::Success);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_address_forms() {
        assert_eq!(dial_address("http://svc.internal").as_deref(), Some("svc.internal:80"));
        assert_eq!(dial_address("https://svc.internal:8443/health").as_deref(), Some("svc.internal:8443"));
        assert_eq!(dial_address("10.0.0.5:5432").as_deref(), Some("10.0.0.5:5432"));
        assert_eq!(dial_address("[::1]:9000").as_deref(), Some("[::1]:9000"));
        assert_eq!(dial_address("no-port-here"), None);
        assert_eq!(dial_address(""), None);
    }

    #[tokio::test]
    async fn test_dial_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (reachable, latency, error) = dial(&addr, Duration::from_secs(2)).await;
        assert!(reachable);
        assert!(latency.is_some());
        assert!(error.is_none());
    }
}
