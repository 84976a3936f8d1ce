//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::TcpListener;

use proxy_control::audit::{AuditRecord, MemoryAuditSink};
use proxy_control::config::{AuditSinkKind, ControlConfig};
use proxy_control::manager::{Actor, ConfigManager};
use proxy_control::reload::{ReloadError, ReloadOutcome, ReloadTrigger};
use proxy_control::tree::{Middleware, MiddlewareKind, Route};

/// Reload trigger whose behaviour tests can switch at runtime.
#[derive(Default)]
pub struct FakeReloadTrigger {
    calls: AtomicUsize,
    fail: AtomicBool,
    hang: AtomicBool,
}

impl FakeReloadTrigger {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReloadTrigger for FakeReloadTrigger {
    async fn trigger(&self, _changed: &[PathBuf]) -> Result<ReloadOutcome, ReloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ReloadError::Rejected("proxy refused the configuration".into()));
        }
        Ok(ReloadOutcome::Acknowledged)
    }
}

/// A manager over a fresh temporary configuration directory.
pub struct Harness {
    pub dir: TempDir,
    pub config: ControlConfig,
    pub manager: ConfigManager,
    pub reload: Arc<FakeReloadTrigger>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut ControlConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ControlConfig::default();
        config.storage.config_dir = dir.path().join("config");
        config.storage.backup_dir = Some(dir.path().join("backups"));
        config.audit.sink = AuditSinkKind::Memory;
        config.reload.timeout_secs = 1;
        config.reload.settle_ms = 0;
        adjust(&mut config);

        let reload = Arc::new(FakeReloadTrigger::default());
        let audit = Arc::new(MemoryAuditSink::default());
        let manager = ConfigManager::open(&config, reload.clone(), audit.clone())
            .await
            .unwrap();

        Self {
            dir,
            config,
            manager,
            reload,
            audit,
        }
    }

    /// Every live configuration file and its bytes.
    pub async fn disk_state(&self) -> BTreeMap<String, Vec<u8>> {
        let repository = self.manager.repository();
        let mut out = BTreeMap::new();
        for relative in repository.config_files().await.unwrap() {
            let bytes = repository.read_file(&relative).await.unwrap();
            out.insert(relative, bytes);
        }
        out
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.audit.records().await
    }
}

pub fn operator() -> Actor {
    Actor::new("alice", true)
}

pub fn api_route() -> Route {
    Route::new("api", "Host(`api.example.com`) && PathPrefix(`/v1`)", "api-service")
        .with_entry_point("websecure")
        .with_priority(10)
}

pub fn rate_limit_middleware(name: &str) -> Middleware {
    let config: toml::Table = toml::from_str("average = 100\nperiod = \"1m\"\nburst = 50\n").unwrap();
    Middleware::new(name, MiddlewareKind::RateLimit, config)
}

/// A TCP listener that accepts and immediately drops connections.
pub async fn start_tcp_sink() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    addr
}
