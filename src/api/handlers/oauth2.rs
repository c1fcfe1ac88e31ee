use crate::{
    api::{
        authn::Authenticated,
        error::{ApiError, ErrorBody},
    },
    engine::{authorization::AuthorizeRequest, Engine},
};
use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Redirect},
};
use tracing::instrument;

#[utoipa::path(
    get,
    path = "/api/v1/auth/oauth2",
    params(AuthorizeRequest),
    responses (
        (status = 303, description = "Redirect to the client with `code` and `state`"),
        (status = 400, description = "Unknown redirect URI or unsupported response type", body = ErrorBody),
        (status = 401, description = "Unknown client or invalid bearer token", body = ErrorBody),
        (status = 422, description = "Missing parameters", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "oauth2",
)]
/// Issue an authorization code for the signed-in user.
#[instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn authorize(
    engine: Extension<Engine>,
    auth: Authenticated,
    Query(request): Query<AuthorizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let grant = engine.authorize(auth.user_id(), &request).await?;
    Ok(Redirect::to(&grant.redirect_uri))
}
