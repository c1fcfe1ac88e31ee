use crate::{
    api::error::{ApiError, ErrorBody},
    engine::{
        provisioning::{ConfigurePayload, ProvisionedSystem},
        Engine,
    },
};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/api/v1/config/configure",
    request_body = ConfigurePayload,
    responses (
        (status = 201, description = "Root user and root application created", body = ProvisionedSystem),
        (status = 409, description = "System already provisioned", body = ErrorBody),
        (status = 422, description = "Invalid payload", body = ErrorBody),
    ),
    tag = "config",
)]
/// One-time bootstrap of the root user and root application.
#[instrument(skip_all)]
pub async fn configure(
    engine: Extension<Engine>,
    Json(payload): Json<ConfigurePayload>,
) -> Result<impl IntoResponse, ApiError> {
    let system = engine.configure(payload).await?;
    Ok((StatusCode::CREATED, Json(system)))
}
