//! The identity provider's operations.
//!
//! [`Engine`] ties together the [`Store`], the [`TokenCodec`] and the
//! [`CredentialVerifier`]. Its operations are grouped by concern:
//!
//! - [`accounts`]: register, login, logout and bearer token checks for the root
//!   application (the provider acting as its own client).
//! - [`authorization`]: the OAuth2 authorization code flow for third party apps.
//! - [`apps`]: app registration.
//! - [`provisioning`]: the one-time bootstrap of the root user and root application.
//!
//! The engine holds no mutable state of its own; every durable record lives in the
//! store and every store call is bounded by the configured [`Deadline`].

pub mod accounts;
pub mod apps;
pub mod authorization;
pub mod provisioning;

use crate::{
    credentials::{CredentialHasher, CredentialVerifier},
    secret::SecretReference,
    error::Error,
    store::{AppRecord, Deadline, Store, User},
    token::{Identity, SigningProfile, TokenCodec},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{
    fmt,
    net::IpAddr,
    sync::{Arc, Mutex, PoisonError},
};
use utoipa::ToSchema;
use uuid::Uuid;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";
pub const DEFAULT_ISSUER: &str = "localhost:8080";

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settings of the root application and the engine itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Issuer of tokens minted by the code exchange.
    pub issuer: String,
    pub root_jwt: SigningProfile,
    pub root_refresh_token_lifetime: Duration,
    pub deadline: Deadline,
}

impl EngineConfig {
    #[must_use]
    pub fn new(root_jwt: SigningProfile) -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            root_jwt,
            root_refresh_token_lifetime: Duration::days(30),
            deadline: Deadline::default(),
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_root_refresh_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.root_refresh_token_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Who is calling, recorded on new sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub client_ip: Option<IpAddr>,
}

/// An access token with its refresh token.
#[derive(Serialize, ToSchema)]
pub struct TokenPair {
    pub token_type: String,
    pub access_token: String,
    pub access_token_expiry: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expiry: DateTime<Utc>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish_non_exhaustive()
    }
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            is_root: user.is_root,
            created_at: user.created_at,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    codec: TokenCodec,
    bearer_codec: TokenCodec,
    credentials: CredentialVerifier,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("codec", &self.codec)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Bearer tokens presented to the provider itself are only accepted when they
    /// name the root application's verification key.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        codec: TokenCodec,
        hasher: Arc<dyn CredentialHasher>,
        config: EngineConfig,
    ) -> Self {
        let credentials = CredentialVerifier::new(store.clone(), hasher, config.deadline);
        let bearer_codec = codec
            .clone()
            .with_trusted_references([config.root_jwt.verification_ref().clone()]);
        Self {
            store,
            codec,
            bearer_codec,
            credentials,
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialVerifier {
        &self.credentials
    }

    /// The key reference bearer tokens must carry.
    #[must_use]
    pub fn root_key_reference(&self) -> &SecretReference {
        self.config.root_jwt.verification_ref()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn root_app(&self) -> crate::error::Result<AppRecord> {
        self.deadline()
            .run("find_root_app", self.store.find_root_app())
            .await?
            .ok_or(Error::NotProvisioned)
    }

    fn deadline(&self) -> Deadline {
        self.config.deadline
    }
}

pub(crate) fn identity_of(user: &User) -> Identity {
    Identity {
        user_id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        avatar: user.avatar.clone(),
    }
}

/// `len` bytes from the OS generator, hex encoded.
pub(crate) fn random_hex(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random bytes")?;
    Ok(hex::encode(bytes))
}

/// Refresh tokens and authorization codes are stored by digest only.
pub(crate) fn digest(value: &str) -> Vec<u8> {
    Sha256::digest(value.as_bytes()).to_vec()
}

/// Compare secrets without an early exit on the first differing byte.
pub(crate) fn secrets_match(given: &str, expected: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_hex_has_requested_entropy() -> Result<()> {
        let a = random_hex(32)?;
        let b = random_hex(32)?;
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        Ok(())
    }

    #[test]
    fn secrets_match_is_exact() {
        assert!(secrets_match("s3cret", "s3cret"));
        assert!(!secrets_match("s3cret", "s3cret "));
        assert!(!secrets_match("", "s3cret"));
    }

    #[test]
    fn manual_clock_moves_on_request() -> anyhow::Result<()> {
        let start = test_support::start()?;
        let clock = ManualClock::new(start);
        clock.advance(Duration::minutes(10));
        assert_eq!(clock.now(), start + Duration::minutes(10));
        clock.set(start);
        assert_eq!(clock.now(), start);
        Ok(())
    }
}
