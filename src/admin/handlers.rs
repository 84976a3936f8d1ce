use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::auth::Caller;
use super::error::ApiError;
use super::AdminState;
use crate::audit::AuditRecord;
use crate::backup::SnapshotManifest;
use crate::manager::{ConnectivityReport, ManagerStatus};
use crate::routing::RequestAttrs;
use crate::tree::{Certificate, CertificateRequest, ConfigTree, Middleware, Route, StaticSettings};

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    #[serde(flatten)]
    pub manager: ManagerStatus,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        manager: state.manager.status(),
    })
}

pub async fn get_tree(State(state): State<AdminState>) -> Json<ConfigTree> {
    Json(state.manager.tree().as_ref().clone())
}

// routes

pub async fn list_routes(State(state): State<AdminState>) -> Json<Vec<Route>> {
    Json(state.manager.list_routes())
}

pub async fn get_route(State(state): State<AdminState>, Path(name): Path<String>) -> ApiResult<Route> {
    Ok(Json(state.manager.get_route(&name)?))
}

pub async fn create_route(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Json(route): Json<Route>,
) -> Result<(StatusCode, Json<Route>), ApiError> {
    let created = state.manager.create_route(&actor, route).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_route(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Path(name): Path<String>,
    Json(route): Json<Route>,
) -> ApiResult<Route> {
    Ok(Json(state.manager.update_route(&actor, &name, route).await?))
}

pub async fn delete_route(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Path(name): Path<String>,
) -> ApiResult<Route> {
    Ok(Json(state.manager.delete_route(&actor, &name).await?))
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(flatten)]
    pub request: RequestAttrs,
}

#[derive(Serialize)]
pub struct MatchResponse {
    pub matched: Option<Route>,
}

pub async fn match_request(
    State(state): State<AdminState>,
    Json(body): Json<MatchRequest>,
) -> Json<MatchResponse> {
    let matched = state
        .manager
        .match_request(body.entry_point.as_deref(), &body.request);
    Json(MatchResponse { matched })
}

// middlewares

pub async fn list_middlewares(State(state): State<AdminState>) -> Json<Vec<Middleware>> {
    Json(state.manager.list_middlewares())
}

pub async fn get_middleware(State(state): State<AdminState>, Path(name): Path<String>) -> ApiResult<Middleware> {
    Ok(Json(state.manager.get_middleware(&name)?))
}

pub async fn create_middleware(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Json(middleware): Json<Middleware>,
) -> Result<(StatusCode, Json<Middleware>), ApiError> {
    let created = state.manager.create_middleware(&actor, middleware).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_middleware(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Path(name): Path<String>,
    Json(middleware): Json<Middleware>,
) -> ApiResult<Middleware> {
    Ok(Json(state.manager.update_middleware(&actor, &name, middleware).await?))
}

pub async fn delete_middleware(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Path(name): Path<String>,
) -> ApiResult<Middleware> {
    Ok(Json(state.manager.delete_middleware(&actor, &name).await?))
}

// certificates

pub async fn list_certificates(State(state): State<AdminState>) -> Json<Vec<Certificate>> {
    Json(state.manager.list_certificates())
}

pub async fn get_certificate(State(state): State<AdminState>, Path(domain): Path<String>) -> ApiResult<Certificate> {
    Ok(Json(state.manager.get_certificate(&domain)?))
}

pub async fn request_certificate(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Json(request): Json<CertificateRequest>,
) -> Result<(StatusCode, Json<Certificate>), ApiError> {
    let cert = state.manager.request_certificate(&actor, request).await?;
    Ok((StatusCode::ACCEPTED, Json(cert)))
}

pub async fn revoke_certificate(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Path(domain): Path<String>,
) -> ApiResult<Certificate> {
    Ok(Json(state.manager.revoke_certificate(&actor, &domain).await?))
}

// settings

pub async fn get_settings(State(state): State<AdminState>) -> Json<StaticSettings> {
    Json(state.manager.settings())
}

pub async fn update_settings(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Json(settings): Json<StaticSettings>,
) -> ApiResult<StaticSettings> {
    Ok(Json(state.manager.update_settings(&actor, settings).await?))
}

// backups

pub async fn list_backups(State(state): State<AdminState>) -> ApiResult<Vec<SnapshotManifest>> {
    Ok(Json(state.manager.list_snapshots().await?))
}

pub async fn create_backup(
    State(state): State<AdminState>,
    Caller(actor): Caller,
) -> Result<(StatusCode, Json<SnapshotManifest>), ApiError> {
    let manifest = state.manager.create_snapshot(&actor).await?;
    Ok((StatusCode::CREATED, Json(manifest)))
}

pub async fn restore_backup(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Path(id): Path<String>,
) -> ApiResult<SnapshotManifest> {
    Ok(Json(state.manager.restore(&actor, &id).await?))
}

// connectivity & audit

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub target: String,
}

pub async fn test_connectivity(
    State(state): State<AdminState>,
    Caller(actor): Caller,
    Json(body): Json<ConnectivityRequest>,
) -> ApiResult<ConnectivityReport> {
    Ok(Json(state.manager.test_connectivity(&actor, &body.target).await?))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    50
}

pub async fn get_audit(State(state): State<AdminState>, Query(query): Query<AuditQuery>) -> ApiResult<Vec<AuditRecord>> {
    let limit = query.limit.clamp(1, 1000);
    Ok(Json(state.manager.audit_trail(limit).await?))
}
