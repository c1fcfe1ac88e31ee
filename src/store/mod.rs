//! Persistence boundary: records and the [`Store`] operations the engines need.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;

use crate::token::SigningProfile;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::{future::Future, net::IpAddr, time::Duration as StdDuration};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Upper bound applied to every call into a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(StdDuration);

impl Deadline {
    #[must_use]
    pub fn new(timeout: StdDuration) -> Self {
        Self(timeout)
    }

    #[must_use]
    pub fn timeout(&self) -> StdDuration {
        self.0
    }

    /// Await `call`, failing with [`StoreError::Timeout`] once the deadline passes.
    ///
    /// # Errors
    /// Returns the call's own error or [`StoreError::Timeout`].
    pub async fn run<T, F>(self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if let Ok(result) = tokio::time::timeout(self.0, call).await {
            result
        } else {
            warn!(operation, timeout_ms = self.0.as_millis(), "store call timed out");
            Err(StoreError::Timeout(operation))
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self(StdDuration::from_secs(5))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_root: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub landing_url: String,
    pub logo: Option<String>,
    pub owner_id: Uuid,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub app_id: Uuid,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uris: Vec<String>,
    pub jwt: SigningProfile,
    pub refresh_token_lifetime: Duration,
    pub success_callback_url: String,
    pub error_callback_url: String,
}

/// An app together with its OAuth configuration.
#[derive(Debug, Clone)]
pub struct AppRecord {
    pub app: App,
    pub oauth: OAuthConfig,
}

/// Only the SHA-256 of the code is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code_hash: Vec<u8>,
    pub app_id: Uuid,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Only the SHA-256 of the refresh token is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub app_id: Uuid,
    pub refresh_token_hash: Vec<u8>,
    pub user_agent: Option<String>,
    pub client_ip: Option<IpAddr>,
    pub expires_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The records written when the system is provisioned.
#[derive(Clone)]
pub struct Bootstrap {
    pub root_user: User,
    pub password_hash: String,
    pub root_app: App,
    pub oauth: OAuthConfig,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Insert the user and its password hash together; `Conflict` when the email is taken.
    async fn create_user(&self, user: &User, password_hash: &str) -> Result<(), StoreError>;

    async fn find_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError>;

    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Returns whether a session of `user_id` with that refresh token existed.
    async fn delete_session(
        &self,
        user_id: Uuid,
        refresh_token_hash: &[u8],
    ) -> Result<bool, StoreError>;

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn find_app_by_client_id(&self, client_id: &str)
        -> Result<Option<AppRecord>, StoreError>;

    /// Insert the app and its OAuth configuration atomically; `Conflict` on a taken client id.
    async fn create_app(&self, app: &App, oauth: &OAuthConfig) -> Result<(), StoreError>;

    async fn create_authorization_code(&self, code: &AuthorizationCode) -> Result<(), StoreError>;

    /// Atomically mark an unexpired, unredeemed code of `app_id` as redeemed at `now`.
    /// Concurrent callers for the same code see exactly one `Some`.
    async fn redeem_authorization_code(
        &self,
        code_hash: &[u8],
        app_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StoreError>;

    async fn find_root_app(&self) -> Result<Option<AppRecord>, StoreError>;

    /// Set the one-time bootstrap flag and insert the root user and root app with it.
    /// `false` when the flag was already set. On any error nothing is written, so a
    /// failed bootstrap can be retried.
    async fn claim_bootstrap(&self, bootstrap: &Bootstrap) -> Result<bool, StoreError>;
}
