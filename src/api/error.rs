use crate::{
    error::{AuthorizationError, Error},
    validation::Violation,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};
use utoipa::ToSchema;

/// Message for every failed login, whatever the cause.
pub const AUTHENTICATION_FAILED: &str = "invalid email or password";

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

/// An [`Error`] rendered for HTTP callers.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn body(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: error.to_string(),
        message: message.into(),
        violations: Vec::new(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            Error::Validation(errors) => {
                let body = ErrorBody {
                    error: "validation_failed".to_string(),
                    message: "request is invalid".to_string(),
                    violations: errors.violations().to_vec(),
                };
                (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
            }
            Error::Authentication(err) => {
                debug!("authentication failed: {err}");
                body(StatusCode::UNAUTHORIZED, "authentication_failed", AUTHENTICATION_FAILED)
            }
            Error::Authorization(err) => {
                let (status, code) = match &err {
                    AuthorizationError::InvalidClient => (StatusCode::UNAUTHORIZED, "invalid_client"),
                    AuthorizationError::InvalidGrant => (StatusCode::BAD_REQUEST, "invalid_grant"),
                    AuthorizationError::RedirectMismatch => {
                        (StatusCode::BAD_REQUEST, "redirect_uri_mismatch")
                    }
                    AuthorizationError::InvalidRequest(_) => {
                        (StatusCode::BAD_REQUEST, "invalid_request")
                    }
                    AuthorizationError::UnsupportedGrantType(_) => {
                        (StatusCode::BAD_REQUEST, "unsupported_grant_type")
                    }
                    AuthorizationError::UnsupportedResponseType(_) => {
                        (StatusCode::BAD_REQUEST, "unsupported_response_type")
                    }
                };
                body(status, code, err.to_string())
            }
            Error::Token(err) => {
                debug!("bearer token rejected: {err}");
                body(StatusCode::UNAUTHORIZED, "invalid_token", err.to_string())
            }
            Error::AlreadyExists => body(StatusCode::CONFLICT, "already_exists", "resource already exists"),
            Error::AlreadyProvisioned => body(
                StatusCode::CONFLICT,
                "already_provisioned",
                "system is already provisioned",
            ),
            Error::NotProvisioned => body(
                StatusCode::SERVICE_UNAVAILABLE,
                "not_provisioned",
                "system is not provisioned",
            ),
            Error::Unavailable => body(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "service temporarily unavailable",
            ),
            Error::Internal(err) => {
                error!("internal error: {err:#}");
                body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error",
                )
            }
        }
    }
}
