//! Routing-configuration control plane.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                     PROXY CONTROL                         │
//!                 │                                                           │
//!   Admin request │  ┌─────────┐   ┌─────────────┐   ┌───────────────────┐   │
//!   ──────────────┼─▶│  admin  │──▶│ rate limit  │──▶│  ConfigManager    │   │
//!                 │  │  (axum) │   │ (per actor) │   │  (one writer)     │   │
//!                 │  └─────────┘   └─────────────┘   └─────────┬─────────┘   │
//!                 │                                            │             │
//!                 │      backup ◀── snapshot ──────────────────┤             │
//!                 │      validator ◀── candidate tree ─────────┤             │
//!                 │      repository ◀── persist ───────────────┤             │
//!                 │      reload trigger ◀── changed files ─────┤             │
//!                 │      audit sink ◀── record ────────────────┘             │
//!                 │                                                           │
//!                 │  certificate monitor ── observe ──▶ reconcile             │
//!                 └──────────────────────────────────────────────────────────┘
//!                                  │ files                ▲ status file
//!                                  ▼                      │
//!                           reverse proxy (watches config_dir, talks to the CA)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tokio::net::TcpListener;

use proxy_control::admin::{setup_admin_router, AdminState};
use proxy_control::config::load_or_default;
use proxy_control::lifecycle::{spawn_background, start_services, wait_for_signal, Shutdown};
use proxy_control::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "proxy-control")]
#[command(about = "Control plane for reverse-proxy routing configuration", long_about = None)]
struct Args {
    /// Control-plane settings file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Create the configuration directory with a bootstrap tree and exit.
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!("proxy-control v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        config_dir = %config.storage.config_dir.display(),
        reload_mode = ?config.reload.mode,
        rate_limit = config.rate_limit.max_mutations,
        window_secs = config.rate_limit.window_secs,
        "Configuration loaded"
    );

    if config.admin.api_key == "CHANGE_ME_IN_PRODUCTION" {
        tracing::warn!("admin.api_key is still the default value");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = start_services(&config).await?;

    if args.init {
        let tree = services.manager.tree();
        tracing::info!(
            routes = tree.routes.len(),
            middlewares = tree.middlewares.len(),
            "Repository initialized"
        );
        return Ok(());
    }

    let shutdown = Shutdown::new();
    let tasks = spawn_background(&services, &config, &shutdown);

    let state = AdminState::new(services.manager.clone(), &config.admin.api_key);
    let app = setup_admin_router(state, &config.admin);
    let addr: SocketAddr = config.admin.bind_address.parse()?;

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.trigger();
        });
    }

    match &config.admin.tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
            let handle = axum_server::Handle::new();
            let stopper = handle.clone();
            let stop = shutdown.signalled();
            tokio::spawn(async move {
                stop.await;
                stopper.graceful_shutdown(Some(Duration::from_secs(10)));
            });

            tracing::info!(address = %addr, "Admin API listening (TLS)");
            axum_server::bind_rustls(addr, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(address = %listener.local_addr()?, "Admin API listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.signalled())
                .await?;
        }
    }

    shutdown.trigger();
    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            tracing::warn!("Background task did not stop in time");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
