//! Email and password accounts: registration and login checks.

mod hasher;
mod password;

pub use self::hasher::{Argon2Hasher, CredentialHasher};
pub use self::password::{
    check_password, LOWERCASE, MIN_PASSWORD_LENGTH, NUMBER, SPECIAL, SPECIAL_CHARACTERS, UPPERCASE,
};

use crate::{
    error::{AuthenticationError, Error, Result},
    store::{Deadline, Store, User},
    validation::{normalize_email, ValidationErrors},
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::{fmt, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub const MIN_NAME_LENGTH: usize = 5;

// Hashed once per process; only used to spend the same time on logins without a hash.
const DECOY_PASSWORD: &str = "tessera-decoy-password";

/// Details of a new account; the password is only ever held as a secret.
#[derive(Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: SecretString,
    pub avatar: Option<String>,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl NewAccount {
    /// Every field rule and every password rule, reported together.
    #[must_use]
    pub fn violations(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if errors.required("name", &self.name) {
            errors.alpha_space("name", &self.name);
            errors.min_chars("name", &self.name, MIN_NAME_LENGTH);
        }
        errors.email("email", self.email.trim());
        let password = self.password.expose_secret();
        if errors.required("password", password) {
            check_password("password", password, &mut errors);
        }
        if let Some(avatar) = self.avatar.as_deref() {
            errors.absolute_url("avatar", avatar);
        }

        errors
    }
}

/// Registers accounts and checks login credentials against stored hashes.
#[derive(Clone)]
pub struct CredentialVerifier {
    store: Arc<dyn Store>,
    hasher: Arc<dyn CredentialHasher>,
    deadline: Deadline,
    decoy_hash: Arc<OnceCell<String>>,
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, hasher: Arc<dyn CredentialHasher>, deadline: Deadline) -> Self {
        Self {
            store,
            hasher,
            deadline,
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Create an account with a fresh id, created at `now`.
    ///
    /// # Errors
    /// [`Error::Validation`] with every violation, [`Error::AlreadyExists`] when the
    /// email is taken, [`Error::Unavailable`] or [`Error::Internal`] on store failures.
    #[instrument(skip(self, account, now), fields(email = %account.email))]
    pub async fn register(&self, account: &NewAccount, now: DateTime<Utc>) -> Result<User> {
        let (user, hash) = self.prepare(account, false, now).await?;

        self.deadline
            .run("create_user", self.store.create_user(&user, &hash))
            .await?;

        debug!(user_id = %user.id, "account registered");
        Ok(user)
    }

    /// Validate `account` and hash its password without storing anything.
    /// `is_root` is only set during provisioning, which persists the user itself.
    ///
    /// # Errors
    /// As [`CredentialVerifier::register`].
    pub async fn prepare(
        &self,
        account: &NewAccount,
        is_root: bool,
        now: DateTime<Utc>,
    ) -> Result<(User, String)> {
        account.violations().into_result()?;

        let email = normalize_email(&account.email);
        let existing = self
            .deadline
            .run("find_user_by_email", self.store.find_user_by_email(&email))
            .await?;
        if existing.is_some() {
            debug!("email already registered");
            return Err(Error::AlreadyExists);
        }

        let hash = self
            .hasher
            .hash(&account.password)
            .await
            .context("failed to hash password")?;

        let user = User {
            id: Uuid::new_v4(),
            name: account.name.trim().to_string(),
            email,
            avatar: account.avatar.clone(),
            is_root,
            deactivated_at: None,
            created_at: now,
        };
        Ok((user, hash))
    }

    /// Check `email` and `password`. Unknown emails and wrong passwords fail the same way.
    ///
    /// # Errors
    /// [`Error::Validation`] for malformed input, [`Error::Authentication`] when the
    /// account cannot log in, [`Error::Unavailable`] or [`Error::Internal`] otherwise.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &SecretString) -> Result<User> {
        let mut errors = ValidationErrors::new();
        errors.email("email", email.trim());
        errors.required("password", password.expose_secret());
        errors.into_result()?;

        let email = normalize_email(email);
        let Some(user) = self
            .deadline
            .run("find_user_by_email", self.store.find_user_by_email(&email))
            .await?
        else {
            warn!("login for unknown email");
            self.verify_decoy(password).await;
            return Err(AuthenticationError::InvalidCredentials.into());
        };

        if user.deactivated_at.is_some() {
            warn!(user_id = %user.id, "login for deactivated account");
            return Err(AuthenticationError::DeactivatedAccount.into());
        }

        let Some(hash) = self
            .deadline
            .run("find_password_hash", self.store.find_password_hash(user.id))
            .await?
        else {
            warn!(user_id = %user.id, "login for account without password");
            self.verify_decoy(password).await;
            return Err(AuthenticationError::NoPasswordSet.into());
        };

        let matches = self
            .hasher
            .verify(password, &hash)
            .await
            .context("failed to verify password")?;
        if !matches {
            warn!(user_id = %user.id, "password mismatch");
            return Err(AuthenticationError::InvalidCredentials.into());
        }

        Ok(user)
    }

    /// Spend one hash verification so failures without a stored hash take as long
    /// as a wrong password.
    async fn verify_decoy(&self, password: &SecretString) {
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| async {
                self.hasher
                    .hash(&SecretString::from(DECOY_PASSWORD.to_string()))
                    .await
            })
            .await;
        let outcome = match decoy {
            Ok(hash) => self.hasher.verify(password, hash).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            warn!("decoy password verification failed: {err:#}");
        }
    }
}
