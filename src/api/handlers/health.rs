use crate::GIT_COMMIT_HASH;
use axum::{
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

pub(crate) fn short_commit(hash: &str) -> &str {
    hash.get(0..7).unwrap_or("")
}

#[utoipa::path(
    get,
    path = "/health",
    responses (
        (status = 200, description = "Service is running", body = Health)
    ),
    tag = "health",
)]
/// Report build information.
pub async fn health() -> impl IntoResponse {
    let body = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let mut headers = HeaderMap::new();
    let app = format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(GIT_COMMIT_HASH)
    );
    if let Ok(value) = HeaderValue::from_str(&app) {
        headers.insert("X-App", value);
    }

    (headers, Json(body))
}
