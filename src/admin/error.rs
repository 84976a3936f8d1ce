//! HTTP mapping of control-plane errors.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ControlError, Violation};

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "no_violations")]
    violations: &'a [Violation],
    #[serde(skip_serializing_if = "Option::is_none")]
    reference: Option<Uuid>,
}

fn no_violations(violations: &&[Violation]) -> bool {
    violations.is_empty()
}

/// Error returned by admin handlers.
#[derive(Debug)]
pub enum ApiError {
    Control(ControlError),
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self::Control(err)
    }
}

pub fn status_for(err: &ControlError) -> StatusCode {
    match err {
        ControlError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::Conflict(_) => StatusCode::CONFLICT,
        ControlError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        ControlError::Forbidden(_) => StatusCode::FORBIDDEN,
        ControlError::NotFound { .. } => StatusCode::NOT_FOUND,
        ControlError::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::BadRequest(message) => {
                let body = ErrorBody {
                    error: "bad_request",
                    message,
                    violations: &[],
                    reference: None,
                };
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            Self::Control(err) => err,
        };

        let reference = match &err {
            ControlError::Failed { reference, .. } => Some(*reference),
            _ => None,
        };
        let body = ErrorBody {
            error: err.code(),
            message: err.to_string(),
            violations: err.violations(),
            reference,
        };
        let mut response = (status_for(&err), Json(body)).into_response();

        if let ControlError::RateLimitExceeded { retry_after, .. } = &err {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::{FailureKind, ResourceKind, ViolationKind};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ControlError::Validation(vec![Violation::new(ViolationKind::InvalidRule, "r", "m")]),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ControlError::conflict("routes[a]", "exists"), StatusCode::CONFLICT),
            (ControlError::Forbidden("bob".into()), StatusCode::FORBIDDEN),
            (ControlError::not_found(ResourceKind::Route, "x"), StatusCode::NOT_FOUND),
            (
                ControlError::Failed {
                    kind: FailureKind::ReloadTimeout,
                    reference: Uuid::new_v4(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status);
        }
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError::from(ControlError::RateLimitExceeded {
            actor: "alice".into(),
            retry_after: Duration::from_millis(12_500),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
    }
}
