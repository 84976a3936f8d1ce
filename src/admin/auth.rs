use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use super::error::ApiError;
use super::AdminState;
use crate::manager::Actor;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_PERMITTED_HEADER: &str = "x-actor-permitted";

pub async fn admin_auth_middleware(
    State(state): State<AdminState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    if let Some(auth_val) = auth_header {
        if auth_val == format!("Bearer {}", state.api_key) {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!(path = %request.uri().path(), "Rejected admin request with bad credentials");
    Err(StatusCode::UNAUTHORIZED)
}

/// The actor a request acts for, as asserted by the trusted gateway.
#[derive(Debug, Clone)]
pub struct Caller(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::bad_request("missing X-Actor-Id header"))?;

        // absent or unparseable means "not permitted"
        let permitted = parts
            .headers
            .get(ACTOR_PERMITTED_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        Ok(Caller(Actor::new(id, permitted)))
    }
}
