//! Control-plane configuration schema.
//!
//! These are the settings of the control plane itself, not the routing
//! configuration it manages. All types derive Serde traits for
//! deserialization from the TOML settings file; every section has defaults so
//! a minimal file works.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControlConfig {
    /// Where the managed configuration tree lives.
    pub storage: StorageConfig,

    /// Per-actor mutation limits.
    pub rate_limit: RateLimitConfig,

    /// Snapshot retention.
    pub backup: BackupConfig,

    /// How the proxy is told to pick up changes.
    pub reload: ReloadConfig,

    /// Audit sink selection.
    pub audit: AuditConfig,

    /// Certificate status observation.
    pub certificates: CertificatesConfig,

    /// Admin API listener.
    pub admin: AdminConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory the proxy watches (static.toml, routes/, middlewares/ ...).
    pub config_dir: PathBuf,

    /// Snapshot directory (default: `<config_dir>/backups`).
    pub backup_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("./proxy-config"),
            backup_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("backups"))
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sliding window length in seconds.
    pub window_secs: u64,

    /// Mutating calls allowed per actor per window.
    pub max_mutations: usize,

    /// How often idle actors are forgotten.
    pub purge_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_mutations: 5,
            purge_interval_secs: 300,
        }
    }
}

/// Snapshot retention configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Newest snapshots always kept.
    pub max_snapshots: usize,

    /// Snapshots older than this are pruned.
    pub max_age_days: u32,

    /// Grace period for pre-restore safety snapshots.
    pub safety_exemption_hours: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 10,
            max_age_days: 30,
            safety_exemption_hours: 24,
        }
    }
}

/// Reload mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// File-watch pickup; in-flight connections are kept.
    #[default]
    Graceful,
    /// Run `hard_command` after the write; may drop connections.
    Hard,
}

/// Reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub mode: ReloadMode,

    /// Upper bound for one reload, in seconds. Exceeding it rolls the change back.
    pub timeout_secs: u64,

    /// How long to wait for the watcher to observe the write, in milliseconds.
    pub settle_ms: u64,

    /// Command (program + args) run in hard mode.
    pub hard_command: Option<Vec<String>>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            mode: ReloadMode::Graceful,
            timeout_secs: 5,
            settle_ms: 500,
            hard_command: None,
        }
    }
}

/// Audit sink kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    #[default]
    Jsonl,
    Sqlite,
    Memory,
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub sink: AuditSinkKind,

    /// JSON-lines file or SQLite database path.
    pub path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Jsonl,
            path: "./audit/audit.jsonl".to_string(),
        }
    }
}

/// Certificate observation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificatesConfig {
    /// JSON status document the proxy maintains; polling is off when unset.
    pub status_file: Option<PathBuf>,

    /// Seconds between polls.
    pub poll_interval_secs: u64,

    /// Pre-expiry window in days.
    pub expiry_window_days: u32,

    /// Upper bound for one observation, in seconds.
    pub observe_timeout_secs: u64,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            status_file: None,
            poll_interval_secs: 60,
            expiry_window_days: 30,
            observe_timeout_secs: 5,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// API key the trusted gateway presents (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Optional TLS for the admin listener.
    pub tls: Option<TlsConfig>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size.
    pub max_body_bytes: usize,

    /// Upper bound for a connectivity test, in seconds.
    pub connectivity_timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
            tls: None,
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
            connectivity_timeout_secs: 3,
        }
    }
}

/// TLS configuration for the admin listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
