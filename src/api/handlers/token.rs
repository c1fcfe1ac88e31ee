use crate::{
    api::{
        authn::Client,
        error::{ApiError, ErrorBody},
    },
    engine::{authorization::TokenRequest, Engine, TokenPair},
    error::{AuthorizationError, Error},
};
use axum::{
    async_trait,
    extract::{Extension, FromRequest, Request},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
    Form, Json,
};
use tracing::instrument;

/// A token request posted either as a form or as JSON.
#[derive(Debug)]
pub struct TokenForm(pub TokenRequest);

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

#[async_trait]
impl<S> FromRequest<S> for TokenForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let request = if is_form(req.headers()) {
            Form::<TokenRequest>::from_request(req, state)
                .await
                .map(|Form(request)| request)
                .map_err(|rejection| rejection.body_text())
        } else {
            Json::<TokenRequest>::from_request(req, state)
                .await
                .map(|Json(request)| request)
                .map_err(|rejection| rejection.body_text())
        };
        request
            .map(Self)
            .map_err(|message| ApiError(Error::Authorization(AuthorizationError::InvalidRequest(message))))
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/token",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses (
        (status = 200, description = "Token pair for the client application", body = TokenPair),
        (status = 400, description = "Invalid or reused code, unsupported grant type", body = ErrorBody),
        (status = 401, description = "Unknown client or wrong secret", body = ErrorBody),
        (status = 422, description = "Missing parameters", body = ErrorBody),
    ),
    tag = "oauth2",
)]
/// Redeem an authorization code.
#[instrument(skip_all)]
pub async fn token(
    engine: Extension<Engine>,
    Client(client): Client,
    TokenForm(request): TokenForm,
) -> Result<impl IntoResponse, ApiError> {
    let pair = engine.exchange(&request, client).await?;
    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
        ],
        Json(pair),
    ))
}
