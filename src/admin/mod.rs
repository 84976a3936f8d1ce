//! Admin API: a thin HTTP mapping onto the configuration manager.
//!
//! # Data Flow
//! ```text
//! request
//!     → TraceLayer → TimeoutLayer → RequestBodyLimitLayer
//!     → auth.rs (bearer key)          401 on mismatch
//!     → Caller extractor (X-Actor-Id, X-Actor-Permitted)
//!     → handlers.rs → ConfigManager
//!     → error.rs (ControlError → 422/409/429/403/404/500)
//! ```
//!
//! # Design Decisions
//! - The gateway in front has already authenticated the user; this API only
//!   trusts the gateway's bearer key and forwards the actor headers
//! - Handlers contain no logic beyond request/response mapping

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::AdminConfig;
use crate::manager::ConfigManager;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub manager: ConfigManager,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(manager: ConfigManager, api_key: &str) -> Self {
        Self {
            manager,
            api_key: Arc::from(api_key),
        }
    }
}

#[allow(deprecated)]
pub fn setup_admin_router(state: AdminState, config: &AdminConfig) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/tree", get(get_tree))
        .route("/admin/routes", get(list_routes).post(create_route))
        .route(
            "/admin/routes/{name}",
            get(get_route).put(update_route).delete(delete_route),
        )
        .route("/admin/match", post(match_request))
        .route("/admin/middlewares", get(list_middlewares).post(create_middleware))
        .route(
            "/admin/middlewares/{name}",
            get(get_middleware).put(update_middleware).delete(delete_middleware),
        )
        .route("/admin/certificates", get(list_certificates).post(request_certificate))
        .route(
            "/admin/certificates/{domain}",
            get(get_certificate).delete(revoke_certificate),
        )
        .route("/admin/settings", get(get_settings).put(update_settings))
        .route("/admin/backups", get(list_backups).post(create_backup))
        .route("/admin/backups/{id}/restore", post(restore_backup))
        .route("/admin/connectivity", post(test_connectivity))
        .route("/admin/audit", get(get_audit))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}
