use crate::{
    api::{
        authn::{Authenticated, Client},
        error::{ApiError, ErrorBody},
    },
    engine::{
        accounts::{LoginUserPayload, RegisterUserPayload},
        Engine, TokenPair, UserView,
    },
};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(Default, Deserialize, ToSchema)]
pub struct LogoutPayload {
    /// End only the session holding this refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for LogoutPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutPayload")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterUserPayload,
    responses (
        (status = 201, description = "Account created", body = UserView),
        (status = 409, description = "Email already registered", body = ErrorBody),
        (status = 422, description = "Invalid payload", body = ErrorBody),
    ),
    tag = "auth",
)]
#[instrument(skip_all)]
pub async fn register(
    engine: Extension<Engine>,
    Json(payload): Json<RegisterUserPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user = engine.register_user(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginUserPayload,
    responses (
        (status = 200, description = "Root application token pair", body = TokenPair),
        (status = 401, description = "Invalid email or password", body = ErrorBody),
        (status = 422, description = "Invalid payload", body = ErrorBody),
        (status = 503, description = "System not provisioned", body = ErrorBody),
    ),
    tag = "auth",
)]
#[instrument(skip_all)]
pub async fn login(
    engine: Extension<Engine>,
    Client(client): Client,
    Json(payload): Json<LoginUserPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let pair = engine.login_user(payload, client).await?;
    Ok(Json(pair))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    request_body = LogoutPayload,
    responses (
        (status = 204, description = "Sessions ended"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth",
)]
/// Without a refresh token every session of the caller ends.
#[instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn logout(
    engine: Extension<Engine>,
    auth: Authenticated,
    payload: Option<Json<LogoutPayload>>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token = payload
        .and_then(|Json(payload)| payload.refresh_token)
        .filter(|token| !token.is_empty())
        .map(SecretString::from);
    engine
        .logout_user(auth.user_id(), refresh_token.as_ref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
