use super::{digest, identity_of, random_hex, ClientInfo, Engine, TokenPair, UserView, TOKEN_TYPE_BEARER};
use crate::{
    credentials::NewAccount,
    error::{Error, Result},
    store::Session,
    token::{TokenClaims, TokenError},
};
use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Bytes of entropy in a root application refresh token.
pub const LOGIN_REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Clone, Deserialize, ToSchema)]
pub struct RegisterUserPayload {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl fmt::Debug for RegisterUserPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterUserPayload")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl From<RegisterUserPayload> for NewAccount {
    fn from(payload: RegisterUserPayload) -> Self {
        Self {
            name: payload.name,
            email: payload.email,
            password: SecretString::from(payload.password),
            avatar: payload.avatar.filter(|avatar| !avatar.trim().is_empty()),
        }
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct LoginUserPayload {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for LoginUserPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginUserPayload")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Register a regular account.
    ///
    /// # Errors
    /// See [`crate::credentials::CredentialVerifier::register`].
    #[instrument(skip(self, payload))]
    pub async fn register_user(&self, payload: RegisterUserPayload) -> Result<UserView> {
        let user = self.credentials.register(&payload.into(), self.now()).await?;
        info!(user_id = %user.id, "user registered");
        Ok(UserView::from(&user))
    }

    /// Authenticate and issue a root application token pair.
    ///
    /// # Errors
    /// [`Error::NotProvisioned`] before the system is configured, otherwise see
    /// [`crate::credentials::CredentialVerifier::authenticate`].
    #[instrument(skip(self, payload, client), fields(email = %payload.email))]
    pub async fn login_user(&self, payload: LoginUserPayload, client: ClientInfo) -> Result<TokenPair> {
        let root = self.root_app().await?;

        let password = SecretString::from(payload.password);
        let user = self.credentials.authenticate(&payload.email, &password).await?;

        let now = self.now();
        let access = self
            .codec
            .sign_at(
                &self.config.root_jwt,
                &identity_of(&user),
                &root.app.domain,
                &root.app.domain,
                now,
            )
            .context("failed to sign root access token")?;

        let refresh_token = random_hex(LOGIN_REFRESH_TOKEN_BYTES)?;
        let refresh_token_expiry = now
            .checked_add_signed(self.config.root_refresh_token_lifetime)
            .context("refresh token expiry is out of range")?;
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            app_id: root.app.id,
            refresh_token_hash: digest(&refresh_token),
            user_agent: client.user_agent,
            client_ip: client.client_ip,
            expires_at: refresh_token_expiry,
            created_by: user.id,
            created_at: now,
        };
        self.deadline()
            .run("create_session", self.store.create_session(&session))
            .await?;

        info!(user_id = %user.id, session_id = %session.id, "user logged in");
        Ok(TokenPair {
            token_type: TOKEN_TYPE_BEARER.to_string(),
            access_token: access.token,
            access_token_expiry: access.expires_at,
            refresh_token,
            refresh_token_expiry,
        })
    }

    /// End one session of `user_id` when `refresh_token` is given, every session otherwise.
    /// Returns the number of sessions removed.
    ///
    /// # Errors
    /// [`Error::Unavailable`] or [`Error::Internal`] on store failures.
    #[instrument(skip(self, refresh_token))]
    pub async fn logout_user(
        &self,
        user_id: Uuid,
        refresh_token: Option<&SecretString>,
    ) -> Result<u64> {
        let removed = match refresh_token {
            Some(token) => {
                let hash = digest(token.expose_secret());
                let deleted = self
                    .deadline()
                    .run("delete_session", self.store.delete_session(user_id, &hash))
                    .await?;
                u64::from(deleted)
            }
            None => {
                self.deadline()
                    .run(
                        "delete_sessions_for_user",
                        self.store.delete_sessions_for_user(user_id),
                    )
                    .await?
            }
        };
        debug!(removed, "sessions removed");
        Ok(removed)
    }

    /// Verify a bearer token issued by [`Engine::login_user`]: root key, root domain as
    /// issuer and among the audiences.
    ///
    /// # Errors
    /// [`Error::Token`] when the token is not a valid root application token,
    /// [`Error::NotProvisioned`] before the system is configured.
    pub async fn verify_access_token(&self, token: &str) -> Result<TokenClaims> {
        let claims = self.bearer_codec.verify_at(token, self.now())?;
        let root = self.root_app().await?;
        if claims.iss != root.app.domain || !claims.has_audience(&root.app.domain) {
            warn!(iss = %claims.iss, "bearer token not issued for the root application");
            return Err(Error::Token(TokenError::InvalidAudience));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{engine, engine_with, ROOT_KEY};
    use super::*;
    use crate::{
        engine::{
            provisioning::{ConfigurePayload, RootAppPayload},
            Clock,
        },
        error::AuthenticationError,
        store::Store,
    };
    use anyhow::Result;
    use chrono::Duration;

    fn register(email: &str) -> RegisterUserPayload {
        RegisterUserPayload {
            name: "Katherine Johnson".to_string(),
            email: email.to_string(),
            password: "Abc123!@".to_string(),
            avatar: None,
        }
    }

    fn login(email: &str, password: &str) -> LoginUserPayload {
        LoginUserPayload {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    async fn provision(engine: &Engine) -> Result<()> {
        engine
            .configure(ConfigurePayload {
                root_user: register("root@tessera.dev"),
                root_app: RootAppPayload {
                    name: "Tessera".to_string(),
                    domain: "tessera.dev".to_string(),
                    landing_url: "https://tessera.dev".to_string(),
                    logo: None,
                    redirect_uris: vec!["https://tessera.dev/callback".to_string()],
                    success_callback_url: "https://tessera.dev/ok".to_string(),
                    error_callback_url: "https://tessera.dev/error".to_string(),
                },
            })
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn login_requires_provisioning() -> Result<()> {
        let (engine, _, _) = engine()?;
        engine.register_user(register("kj@example.com")).await?;
        let result = engine
            .login_user(login("kj@example.com", "Abc123!@"), ClientInfo::default())
            .await;
        assert!(matches!(result, Err(Error::NotProvisioned)));
        Ok(())
    }

    #[tokio::test]
    async fn login_issues_root_tokens_and_a_session() -> Result<()> {
        let (engine, store, clock) = engine()?;
        provision(&engine).await?;
        let user = engine.register_user(register("kj@example.com")).await?;

        let client = ClientInfo {
            user_agent: Some("curl/8.5".to_string()),
            client_ip: Some("203.0.113.9".parse()?),
        };
        let pair = engine.login_user(login("kj@example.com", "Abc123!@"), client).await?;

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.refresh_token.len(), LOGIN_REFRESH_TOKEN_BYTES * 2);
        assert_eq!(pair.access_token_expiry, clock.now() + Duration::minutes(15));
        assert_eq!(pair.refresh_token_expiry, clock.now() + Duration::days(7));

        let claims = engine.verify_access_token(&pair.access_token).await?;
        assert_eq!(claims.identity.user_id, user.id);
        assert_eq!(claims.iss, "tessera.dev");
        assert!(claims.has_audience("tessera.dev"));
        assert_eq!(claims.key_ref.as_str(), ROOT_KEY);

        let sessions = store.sessions_for_user(user.id).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_agent.as_deref(), Some("curl/8.5"));
        assert_eq!(sessions[0].refresh_token_hash, digest(&pair.refresh_token));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_is_indistinguishable_from_unknown_email() -> Result<()> {
        let (engine, _, _) = engine()?;
        provision(&engine).await?;
        engine.register_user(register("kj@example.com")).await?;

        let mut messages = Vec::new();
        for _ in 0..3 {
            let err = engine
                .login_user(login("kj@example.com", "Wrong123!"), ClientInfo::default())
                .await
                .err()
                .ok_or_else(|| anyhow::anyhow!("login should fail"))?;
            assert!(matches!(
                err,
                Error::Authentication(AuthenticationError::InvalidCredentials)
            ));
            messages.push(err.to_string());
        }
        let unknown = engine
            .login_user(login("nobody@example.com", "Wrong123!"), ClientInfo::default())
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("login should fail"))?;
        messages.push(unknown.to_string());

        assert!(messages.windows(2).all(|pair| pair[0] == pair[1]));
        Ok(())
    }

    #[tokio::test]
    async fn logout_removes_one_or_all_sessions() -> Result<()> {
        let (engine, store, _) = engine()?;
        provision(&engine).await?;
        let user = engine.register_user(register("kj@example.com")).await?;

        let first = engine
            .login_user(login("kj@example.com", "Abc123!@"), ClientInfo::default())
            .await?;
        engine
            .login_user(login("kj@example.com", "Abc123!@"), ClientInfo::default())
            .await?;
        engine
            .login_user(login("kj@example.com", "Abc123!@"), ClientInfo::default())
            .await?;
        assert_eq!(store.session_count(user.id).await, 3);

        let token = SecretString::from(first.refresh_token.clone());
        assert_eq!(engine.logout_user(user.id, Some(&token)).await?, 1);
        assert_eq!(engine.logout_user(user.id, Some(&token)).await?, 0);
        assert_eq!(store.session_count(user.id).await, 2);

        assert_eq!(engine.logout_user(user.id, None).await?, 2);
        assert_eq!(store.session_count(user.id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn bearer_tokens_expire_with_the_clock() -> Result<()> {
        let (engine, _, clock) = engine()?;
        provision(&engine).await?;
        engine.register_user(register("kj@example.com")).await?;
        let pair = engine
            .login_user(login("kj@example.com", "Abc123!@"), ClientInfo::default())
            .await?;

        clock.advance(Duration::minutes(15) - Duration::seconds(1));
        assert!(engine.verify_access_token(&pair.access_token).await.is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            engine.verify_access_token(&pair.access_token).await,
            Err(Error::Token(TokenError::Expired))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn root_key_tokens_for_other_audiences_are_refused() -> Result<()> {
        let (engine, _, clock) = engine()?;
        provision(&engine).await?;
        let user = engine.register_user(register("kj@example.com")).await?;

        let stored = engine
            .store
            .find_user_by_email("kj@example.com")
            .await?
            .ok_or_else(|| anyhow::anyhow!("user missing"))?;
        for (audience, issuer) in [
            ("photos.example.com", "tessera.dev"),
            ("tessera.dev", "idp.example.com"),
        ] {
            let forged = engine.codec.sign_at(
                &engine.config.root_jwt,
                &identity_of(&stored),
                audience,
                issuer,
                clock.now(),
            )?;
            assert!(matches!(
                engine.verify_access_token(&forged.token).await,
                Err(Error::Token(TokenError::InvalidAudience))
            ));
        }

        let genuine = engine
            .login_user(login("kj@example.com", "Abc123!@"), ClientInfo::default())
            .await?;
        let claims = engine.verify_access_token(&genuine.access_token).await?;
        assert_eq!(claims.identity.user_id, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_refresh_lifetime_fails_without_panicking() -> Result<()> {
        let (engine, store, _) =
            engine_with(|config| {
            config.with_root_refresh_token_lifetime(Duration::days(100_000_000_000))
        })?;
        provision(&engine).await?;
        let user = engine.register_user(register("kj@example.com")).await?;

        let result = engine
            .login_user(login("kj@example.com", "Abc123!@"), ClientInfo::default())
            .await;
        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(store.session_count(user.id).await, 0);
        Ok(())
    }
}
