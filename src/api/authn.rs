use crate::{
    api::error::ApiError,
    engine::{ClientInfo, Engine},
    error::Error,
    token::{TokenClaims, TokenError},
};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::net::{IpAddr, SocketAddr};
use tracing::Span;
use uuid::Uuid;

/// Claims of a verified root application bearer token.
#[derive(Debug, Clone)]
pub struct Authenticated(pub TokenClaims);

impl Authenticated {
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.0.identity.user_id
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

fn engine(parts: &Parts) -> Result<&Engine, ApiError> {
    parts
        .extensions
        .get::<Engine>()
        .ok_or_else(|| ApiError(Error::Internal(anyhow::anyhow!("engine extension missing"))))
}

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let engine = engine(parts)?;
        let token = bearer(&parts.headers).ok_or(ApiError(Error::Token(TokenError::MalformedToken)))?;
        let claims = engine.verify_access_token(token).await?;
        Span::current().record("user_id", tracing::field::display(claims.identity.user_id));
        Ok(Self(claims))
    }
}

/// User agent and address of the caller, honoring proxy headers first.
#[derive(Debug, Clone, Default)]
pub struct Client(pub ClientInfo);

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());
    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for Client
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let client_ip = forwarded_ip(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });
        Ok(Self(ClientInfo {
            user_agent,
            client_ip,
        }))
    }
}
