//! Metrics collection and exposition.
//!
//! # Metrics
//! - `control_mutations_total` (counter): mutating calls by action, outcome
//! - `control_mutation_duration_seconds` (histogram): protocol latency by action
//! - `control_rate_limited_total` (counter): limiter rejections
//! - `control_rollbacks_total` (counter): automatic restores after a failure
//! - `control_audit_failures_total` (counter): audit records that could not be written
//! - `control_snapshots_pruned_total` (counter): snapshots removed by retention
//! - `control_certificates` (gauge): registry entries by status
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via `observability.metrics_address`

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::tree::CertificateStatus;

const MUTATIONS_TOTAL: &str = "control_mutations_total";
const MUTATION_DURATION: &str = "control_mutation_duration_seconds";
const RATE_LIMITED_TOTAL: &str = "control_rate_limited_total";
const ROLLBACKS_TOTAL: &str = "control_rollbacks_total";
const AUDIT_FAILURES_TOTAL: &str = "control_audit_failures_total";
const SNAPSHOTS_PRUNED_TOTAL: &str = "control_snapshots_pruned_total";
const CERTIFICATES: &str = "control_certificates";

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

/// Records the outcome and latency of one mutating call.
pub fn record_mutation(action: &'static str, outcome: &'static str, elapsed: Duration) {
    counter!(MUTATIONS_TOTAL, "action" => action, "outcome" => outcome).increment(1);
    histogram!(MUTATION_DURATION, "action" => action).record(elapsed.as_secs_f64());
}

pub fn record_rate_limited() {
    counter!(RATE_LIMITED_TOTAL).increment(1);
}

pub fn record_rollback() {
    counter!(ROLLBACKS_TOTAL).increment(1);
}

pub fn record_audit_failure() {
    counter!(AUDIT_FAILURES_TOTAL).increment(1);
}

pub fn record_snapshots_pruned(count: usize) {
    counter!(SNAPSHOTS_PRUNED_TOTAL).increment(count as u64);
}

/// Publishes the certificate registry breakdown.
pub fn set_certificate_counts(counts: &[(CertificateStatus, usize)]) {
    for (status, count) in counts {
        gauge!(CERTIFICATES, "status" => status.as_str()).set(*count as f64);
    }
}
