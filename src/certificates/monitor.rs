//! Periodic certificate status polling.
//!
//! # Responsibilities
//! - Poll the observer on a fixed interval
//! - Feed observations to the manager for reconciliation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use super::CertificateObserver;
use crate::config::CertificatesConfig;
use crate::manager::ConfigManager;
use crate::resilience::with_deadline;

pub struct CertificateMonitor {
    manager: ConfigManager,
    observer: Arc<dyn CertificateObserver>,
    interval: Duration,
    timeout: Duration,
}

impl CertificateMonitor {
    pub fn new(manager: ConfigManager, observer: Arc<dyn CertificateObserver>, config: &CertificatesConfig) -> Self {
        Self {
            manager,
            observer,
            interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.observe_timeout_secs),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Certificate monitor starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Certificate monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One observe + reconcile round. Failures are logged and retried next tick.
    pub async fn poll_once(&self) {
        let observed = match with_deadline("certificate observation", self.timeout, self.observer.observe()).await {
            Ok(Ok(observed)) => observed,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Certificate observation failed");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Certificate observation failed");
                return;
            }
        };

        match self.manager.reconcile_certificates(observed).await {
            Ok(changes) if changes.is_empty() => {
                tracing::debug!("Certificate registry up to date");
            }
            Ok(changes) => {
                for change in &changes {
                    tracing::info!(
                        domain = %change.domain,
                        from = change.from.as_str(),
                        to = change.to.as_str(),
                        "Certificate status changed"
                    );
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Certificate reconciliation failed");
            }
        }
    }
}
