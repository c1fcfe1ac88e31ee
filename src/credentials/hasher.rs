use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::{Error as PasswordHashError, SaltString},
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
};
use async_trait::async_trait;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

/// One-way password hashing with constant-time comparison.
#[async_trait]
pub trait CredentialHasher: Send + Sync {
    async fn hash(&self, password: &SecretString) -> Result<String>;

    /// `Ok(false)` on mismatch, `Err` only when the stored hash is unusable.
    async fn verify(&self, password: &SecretString, hash: &str) -> Result<bool>;
}

/// Argon2id with a fixed work factor; hashing runs on the blocking pool.
#[derive(Clone, Debug)]
pub struct Argon2Hasher {
    params: Params,
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Hasher {
    #[must_use]
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Cheap parameters for tests and local development.
    ///
    /// # Errors
    /// Returns an error if the parameters are rejected by `argon2`.
    pub fn low_cost() -> Result<Self> {
        let params = Params::new(Params::MIN_M_COST * 2, 1, 1, None)
            .map_err(|e| anyhow!("invalid argon2 params: {e}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

#[async_trait]
impl CredentialHasher for Argon2Hasher {
    async fn hash(&self, password: &SecretString) -> Result<String> {
        let argon2 = self.argon2();
        let password = password.clone();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.expose_secret().as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| anyhow!("failed to hash password: {e}"))
        })
        .await
        .context("password hashing task failed")?
    }

    async fn verify(&self, password: &SecretString, hash: &str) -> Result<bool> {
        let argon2 = self.argon2();
        let password = password.clone();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || {
            let parsed =
                PasswordHash::new(&hash).map_err(|e| anyhow!("invalid password hash: {e}"))?;
            match argon2.verify_password(password.expose_secret().as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(PasswordHashError::Password) => Ok(false),
                Err(e) => Err(anyhow!("failed to verify password: {e}")),
            }
        })
        .await
        .context("password verification task failed")?
    }
}
