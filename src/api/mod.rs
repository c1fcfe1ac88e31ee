use crate::engine::Engine;
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, field::Empty, info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod authn;
pub mod error;
pub mod handlers;
pub mod openapi;

use handlers::{apps, auth, configure, health, oauth2, token};

pub use openapi::openapi;

const REQUEST_ID: &str = "x-request-id";

/// Every route with the request-id, tracing and CORS layers applied.
#[must_use]
pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/oauth2", get(oauth2::authorize))
        .route("/api/v1/auth/token", post(token::token))
        .route("/api/v1/apps", post(apps::create))
        .route("/api/v1/config/configure", post(configure::configure))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(engine)),
        )
}

/// Serve the API until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn new(port: u16, engine: Engine) -> Result<()> {
    let app = router(engine);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Gracefully shutdown"),
            Err(err) => {
                error!("failed to listen for shutdown signal: {err}");
                std::future::pending::<()>().await;
            }
        }
    })
    .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = request.uri().path(),
        request_id,
        user_id = Empty,
    )
}
