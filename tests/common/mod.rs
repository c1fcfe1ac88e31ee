#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tessera::{
    credentials::Argon2Hasher,
    engine::{
        accounts::RegisterUserPayload,
        apps::{AppDetails, CreateAppPayload},
        provisioning::ConfigurePayload,
        Engine, EngineConfig, ManualClock,
    },
    secret::{SecretReference, SecretResolver},
    store::MemoryStore,
    token::{SigningAlgorithm, SigningProfile, TokenCodec},
};

pub const ROOT_KEY: &str = "literal://tessera-root-signing-secret";
pub const APP_KEY: &str = "literal://photo-share-signing-secret";
pub const PASSWORD: &str = "Abc123!@";

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn start() -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(1_700_000_000, 0).context("bad timestamp")
}

pub fn harness() -> Result<Harness> {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()?));
    let root_jwt = SigningProfile {
        algorithm: SigningAlgorithm::HS256,
        signing_ref: SecretReference::parse(ROOT_KEY)?,
        verifying_ref: None,
        lifetime: Duration::minutes(15),
    };
    let config = EngineConfig::new(root_jwt).with_issuer("idp.tessera.dev");
    let engine = Engine::new(
        store.clone(),
        TokenCodec::new(SecretResolver::with_defaults()),
        Arc::new(Argon2Hasher::low_cost()?),
        config,
    )
    .with_clock(clock.clone());
    Ok(Harness {
        engine,
        store,
        clock,
    })
}

pub fn user(name: &str, email: &str) -> RegisterUserPayload {
    RegisterUserPayload {
        name: name.to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        avatar: None,
    }
}

pub fn configure_payload() -> ConfigurePayload {
    ConfigurePayload {
        root_user: user("Root Admin", "root@tessera.dev"),
        root_app: AppDetails {
            name: "Tessera".to_string(),
            domain: "tessera.dev".to_string(),
            landing_url: "https://tessera.dev".to_string(),
            logo: None,
            redirect_uris: vec!["https://tessera.dev/callback".to_string()],
            success_callback_url: "https://tessera.dev/ok".to_string(),
            error_callback_url: "https://tessera.dev/error".to_string(),
        },
    }
}

pub fn app_payload(domain: &str) -> CreateAppPayload {
    CreateAppPayload {
        details: AppDetails {
            name: "Photo Share".to_string(),
            domain: domain.to_string(),
            landing_url: format!("https://{domain}"),
            logo: None,
            redirect_uris: vec![format!("https://{domain}/oauth/callback")],
            success_callback_url: format!("https://{domain}/ok"),
            error_callback_url: format!("https://{domain}/error"),
        },
        jwt_algorithm: "HS512".to_string(),
        jwt_secret_ref: APP_KEY.to_string(),
        jwt_verify_ref: None,
        jwt_lifetime: "1h".to_string(),
        refresh_token_lifetime: "30d".to_string(),
    }
}

/// Value of `name` in the query string of `url`.
pub fn query_param(url: &str, name: &str) -> Result<String> {
    let url = url::Url::parse(url)?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .with_context(|| format!("{name} missing from {url}"))
}
