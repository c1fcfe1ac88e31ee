use crate::{
    api::{
        authn::Authenticated,
        error::{ApiError, ErrorBody},
    },
    engine::{
        apps::{CreateAppPayload, CreatedApp},
        Engine,
    },
};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/api/v1/apps",
    request_body = CreateAppPayload,
    responses (
        (status = 201, description = "Application registered; the client secret is shown once", body = CreatedApp),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 409, description = "Domain already registered", body = ErrorBody),
        (status = 422, description = "Invalid payload", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "apps",
)]
#[instrument(skip_all, fields(user_id = %auth.user_id()))]
pub async fn create(
    engine: Extension<Engine>,
    auth: Authenticated,
    Json(payload): Json<CreateAppPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let created = engine.create_app(auth.user_id(), payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
