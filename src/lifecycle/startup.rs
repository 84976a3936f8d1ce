//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the audit sink, reload trigger and configuration manager
//! - Start background tasks (certificate monitor, limiter maintenance)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time;

use super::Shutdown;
use crate::audit::{self, AuditError};
use crate::certificates::{CertificateMonitor, CertificateObserver, StatusFileObserver};
use crate::config::ControlConfig;
use crate::manager::ConfigManager;
use crate::reload::{FileWatchTrigger, ReloadTrigger};
use crate::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open audit sink: {0}")]
    Audit(#[from] AuditError),

    #[error("failed to open configuration repository: {0}")]
    Repository(#[from] RepositoryError),
}

/// Long-lived components built at startup.
#[derive(Clone)]
pub struct Services {
    pub manager: ConfigManager,
    pub observer: Option<Arc<dyn CertificateObserver>>,
}

pub async fn start_services(config: &ControlConfig) -> Result<Services, StartupError> {
    let sink = audit::open_sink(&config.audit).await?;

    // the directory has to exist before the watcher can attach to it
    tokio::fs::create_dir_all(&config.storage.config_dir)
        .await
        .map_err(|source| RepositoryError::Io {
            path: config.storage.config_dir.clone(),
            source,
        })?;
    let reload: Arc<dyn ReloadTrigger> = Arc::new(FileWatchTrigger::start(&config.storage.config_dir, &config.reload));

    let manager = ConfigManager::open(config, reload, sink).await?;

    let observer = config
        .certificates
        .status_file
        .as_ref()
        .map(|path| Arc::new(StatusFileObserver::new(path)) as Arc<dyn CertificateObserver>);

    Ok(Services { manager, observer })
}

/// Spawn the certificate monitor (when a status file is configured) and the
/// rate-limiter maintenance loop.
pub fn spawn_background(services: &Services, config: &ControlConfig, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    match &services.observer {
        Some(observer) => {
            let monitor = CertificateMonitor::new(services.manager.clone(), observer.clone(), &config.certificates);
            tasks.push(tokio::spawn(monitor.run(shutdown.subscribe())));
        }
        None => tracing::info!("No certificate status file configured; certificate monitor disabled"),
    }

    let manager = services.manager.clone();
    let interval = Duration::from_secs(config.rate_limit.purge_interval_secs.max(1));
    let mut stop = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = manager.purge_idle_actors();
                    if purged > 0 {
                        tracing::debug!(purged, "Purged idle rate-limit entries");
                    }
                }
                _ = stop.recv() => break,
            }
        }
    }));

    tasks
}
