//! OAuth2 authorization code grant.
//!
//! A request is either rejected or ends with a code appended to a whitelisted redirect
//! URI. The code is stored by digest, expires after [`AUTHORIZATION_CODE_LIFETIME_MINUTES`]
//! and is redeemed at most once: the store marks it redeemed in the same step that reads it.

use super::{
    digest, identity_of, random_hex, secrets_match, ClientInfo, Engine, TokenPair,
    TOKEN_TYPE_BEARER,
};
use crate::{
    error::{AuthorizationError, Error, Result},
    store::{AppRecord, AuthorizationCode, Session},
    validation::ValidationErrors,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument, warn};
use url::Url;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub const AUTHORIZATION_CODE_LIFETIME_MINUTES: i64 = 10;
pub const AUTHORIZATION_CODE_BYTES: usize = 32;
pub const EXCHANGE_REFRESH_TOKEN_BYTES: usize = 64;

pub const RESPONSE_TYPE_CODE: &str = "code";
pub const RESPONSE_TYPE_TOKEN: &str = "token";
pub const GRANT_TYPE_AUTHORIZATION_CODE: &str = "authorization_code";

#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeRequest {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub redirect_uri: String,
    /// Echoed back on the redirect.
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Where to send the user agent once a code was issued.
#[derive(Serialize, ToSchema)]
pub struct AuthorizationGrant {
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub redirect_uri: String,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

/// The redirect URI without its query string or fragment, as whitelisted.
fn strip_query(uri: &str) -> &str {
    uri.split(['?', '#']).next().unwrap_or(uri)
}

impl Engine {
    /// Issue an authorization code for `user_id` and return the redirect carrying it.
    ///
    /// # Errors
    /// [`Error::Validation`] for missing fields, [`AuthorizationError::InvalidClient`],
    /// [`AuthorizationError::InvalidRequest`] for an unparsable redirect URI,
    /// [`AuthorizationError::RedirectMismatch`] for a redirect URI that is not
    /// whitelisted and [`AuthorizationError::UnsupportedResponseType`] for anything
    /// but `code`.
    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn authorize(&self, user_id: Uuid, request: &AuthorizeRequest) -> Result<AuthorizationGrant> {
        let mut errors = ValidationErrors::new();
        errors.required("client_id", &request.client_id);
        errors.one_of(
            "response_type",
            &request.response_type,
            &[RESPONSE_TYPE_CODE, RESPONSE_TYPE_TOKEN],
        );
        errors.required("redirect_uri", &request.redirect_uri);
        errors.into_result()?;

        let record = self.find_client(&request.client_id).await?;

        let mut redirect = Url::parse(&request.redirect_uri)
            .map_err(|err| AuthorizationError::InvalidRequest(format!("redirect_uri: {err}")))?;
        let registered = strip_query(&request.redirect_uri);
        if !record.oauth.redirect_uris.iter().any(|uri| uri == registered) {
            warn!(redirect_uri = registered, "redirect uri is not whitelisted");
            return Err(AuthorizationError::RedirectMismatch.into());
        }

        if request.response_type != RESPONSE_TYPE_CODE {
            return Err(AuthorizationError::UnsupportedResponseType(request.response_type.clone()).into());
        }

        let now = self.now();
        let code = random_hex(AUTHORIZATION_CODE_BYTES)?;
        let expires_at = now
            .checked_add_signed(Duration::minutes(AUTHORIZATION_CODE_LIFETIME_MINUTES))
            .context("authorization code expiry is out of range")?;
        let stored = AuthorizationCode {
            code_hash: digest(&code),
            app_id: record.app.id,
            user_id,
            redirect_uri: registered.to_string(),
            expires_at,
            redeemed_at: None,
            created_at: now,
        };
        self.deadline()
            .run("create_authorization_code", self.store.create_authorization_code(&stored))
            .await?;

        {
            let mut query = redirect.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = request.state.as_deref().filter(|state| !state.is_empty()) {
                query.append_pair("state", state);
            }
        }

        info!(app_id = %record.app.id, %user_id, "authorization code issued");
        Ok(AuthorizationGrant {
            redirect_uri: redirect.into(),
            expires_at,
        })
    }

    /// Redeem an authorization code for an access and refresh token pair.
    ///
    /// # Errors
    /// [`Error::Validation`] for missing fields, [`AuthorizationError::InvalidClient`]
    /// for an unknown client or wrong secret,
    /// [`AuthorizationError::UnsupportedGrantType`] for grants other than
    /// `authorization_code` and [`AuthorizationError::InvalidGrant`] for a code that is
    /// unknown, expired, already redeemed or bound to another redirect URI.
    ///
    /// `code` and `redirect_uri` are only required once the grant type is known to be
    /// `authorization_code`.
    #[instrument(skip(self, request, client), fields(client_id = %request.client_id, grant_type = %request.grant_type))]
    pub async fn exchange(&self, request: &TokenRequest, client: ClientInfo) -> Result<TokenPair> {
        let mut errors = ValidationErrors::new();
        errors.required("grant_type", &request.grant_type);
        errors.required("client_id", &request.client_id);
        errors.required("client_secret", &request.client_secret);
        errors.into_result()?;

        let record = self.find_client(&request.client_id).await?;
        if !secrets_match(&request.client_secret, record.oauth.client_secret.expose_secret()) {
            warn!(app_id = %record.app.id, "client secret mismatch");
            return Err(AuthorizationError::InvalidClient.into());
        }

        if request.grant_type != GRANT_TYPE_AUTHORIZATION_CODE {
            return Err(AuthorizationError::UnsupportedGrantType(request.grant_type.clone()).into());
        }

        let mut errors = ValidationErrors::new();
        errors.required("code", &request.code);
        errors.required("redirect_uri", &request.redirect_uri);
        errors.into_result()?;

        let now = self.now();
        let code_hash = digest(&request.code);
        let Some(code) = self
            .deadline()
            .run(
                "redeem_authorization_code",
                self.store.redeem_authorization_code(&code_hash, record.app.id, now),
            )
            .await?
        else {
            warn!(app_id = %record.app.id, "authorization code is unknown, expired or redeemed");
            return Err(AuthorizationError::InvalidGrant.into());
        };

        if code.redirect_uri != strip_query(&request.redirect_uri) {
            warn!(app_id = %record.app.id, "redirect uri differs from the authorization request");
            return Err(AuthorizationError::InvalidGrant.into());
        }

        let user = self
            .deadline()
            .run("find_user_by_id", self.store.find_user_by_id(code.user_id))
            .await?
            .filter(|user| user.deactivated_at.is_none())
            .ok_or(AuthorizationError::InvalidGrant)?;

        let access = self
            .codec
            .sign_at(
                &record.oauth.jwt,
                &identity_of(&user),
                &record.app.domain,
                &self.config.issuer,
                now,
            )
            .context("failed to sign app access token")?;

        let refresh_token = random_hex(EXCHANGE_REFRESH_TOKEN_BYTES)?;
        let refresh_token_expiry = now
            .checked_add_signed(record.oauth.refresh_token_lifetime)
            .context("refresh token expiry is out of range")?;
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            app_id: record.app.id,
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

        info!(app_id = %record.app.id, user_id = %user.id, "authorization code redeemed");
        Ok(TokenPair {
            token_type: TOKEN_TYPE_BEARER.to_string(),
            access_token: access.token,
            access_token_expiry: access.expires_at,
            refresh_token,
            refresh_token_expiry,
        })
    }

    async fn find_client(&self, client_id: &str) -> Result<AppRecord> {
        let record = self
            .deadline()
            .run("find_app_by_client_id", self.store.find_app_by_client_id(client_id))
            .await?;
        record.ok_or_else(|| {
            debug!("unknown client id");
            Error::Authorization(AuthorizationError::InvalidClient)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app_payload, engine};
    use super::*;
    use crate::engine::{accounts::RegisterUserPayload, apps::CreatedApp, Clock};
    use anyhow::Result;

    struct Fixture {
        engine: Engine,
        store: std::sync::Arc<crate::store::MemoryStore>,
        clock: std::sync::Arc<crate::engine::ManualClock>,
        user_id: Uuid,
        app: CreatedApp,
    }

    async fn fixture() -> Result<Fixture> {
        let (engine, store, clock) = engine()?;
        let user = engine
            .register_user(RegisterUserPayload {
                name: "Mary Jackson".to_string(),
                email: "mary@example.com".to_string(),
                password: "Abc123!@".to_string(),
                avatar: None,
            })
            .await?;
        let app = engine.create_app(user.id, app_payload("photos.example.com")).await?;
        Ok(Fixture {
            engine,
            store,
            clock,
            user_id: user.id,
            app,
        })
    }

    fn authorize_request(redirect_uri: &str) -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: "photos.example.com".to_string(),
            response_type: "code".to_string(),
            redirect_uri: redirect_uri.to_string(),
            state: Some("xyz".to_string()),
            scope: None,
        }
    }

    fn code_of(redirect_uri: &str) -> Result<String> {
        let url = Url::parse(redirect_uri)?;
        url.query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| anyhow::anyhow!("no code in {redirect_uri}"))
    }

    fn token_request(fixture: &Fixture, code: &str) -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".to_string(),
            client_id: "photos.example.com".to_string(),
            client_secret: fixture.app.client_secret.clone(),
            code: code.to_string(),
            redirect_uri: "https://photos.example.com/oauth/callback".to_string(),
        }
    }

    #[test]
    fn strip_query_keeps_the_registered_part() {
        assert_eq!(strip_query("https://a.example/cb?x=1#frag"), "https://a.example/cb");
        assert_eq!(strip_query("https://a.example/cb"), "https://a.example/cb");
    }

    #[tokio::test]
    async fn authorize_appends_code_and_state() -> Result<()> {
        let f = fixture().await?;
        let grant = f
            .engine
            .authorize(
                f.user_id,
                &authorize_request("https://photos.example.com/oauth/callback?lang=en"),
            )
            .await?;

        let url = Url::parse(&grant.redirect_uri)?;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("lang".to_string(), "en".to_string()));
        assert_eq!(code_of(&grant.redirect_uri)?.len(), AUTHORIZATION_CODE_BYTES * 2);
        assert!(pairs.contains(&("state".to_string(), "xyz".to_string())));
        assert_eq!(grant.expires_at, f.clock.now() + Duration::minutes(10));
        assert_eq!(f.store.code_count(f.app.app.id).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unregistered_redirect_never_gets_a_code() -> Result<()> {
        let f = fixture().await?;
        for uri in [
            "https://photos.example.com/oauth/callback/",
            "https://evil.example.com/oauth/callback",
            "http://photos.example.com/oauth/callback",
        ] {
            let result = f.engine.authorize(f.user_id, &authorize_request(uri)).await;
            assert!(matches!(
                result,
                Err(Error::Authorization(AuthorizationError::RedirectMismatch))
            ));
        }
        assert_eq!(f.store.code_count(f.app.app.id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn authorize_rejects_unknown_clients_and_bad_input() -> Result<()> {
        let f = fixture().await?;

        let mut unknown = authorize_request("https://photos.example.com/oauth/callback");
        unknown.client_id = "nobody.example.com".to_string();
        assert!(matches!(
            f.engine.authorize(f.user_id, &unknown).await,
            Err(Error::Authorization(AuthorizationError::InvalidClient))
        ));

        let malformed = authorize_request("not a url");
        assert!(matches!(
            f.engine.authorize(f.user_id, &malformed).await,
            Err(Error::Authorization(AuthorizationError::InvalidRequest(_)))
        ));

        let mut implicit = authorize_request("https://photos.example.com/oauth/callback");
        implicit.response_type = "token".to_string();
        assert!(matches!(
            f.engine.authorize(f.user_id, &implicit).await,
            Err(Error::Authorization(AuthorizationError::UnsupportedResponseType(_)))
        ));

        let empty = AuthorizeRequest::default();
        assert!(matches!(
            f.engine.authorize(f.user_id, &empty).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(f.store.code_count(f.app.app.id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn exchange_issues_tokens_for_the_authorizing_user() -> Result<()> {
        let f = fixture().await?;
        let grant = f
            .engine
            .authorize(f.user_id, &authorize_request("https://photos.example.com/oauth/callback"))
            .await?;
        let code = code_of(&grant.redirect_uri)?;

        f.clock.advance(Duration::minutes(3));
        let pair = f
            .engine
            .exchange(&token_request(&f, &code), ClientInfo::default())
            .await?;

        let claims = f.engine.codec().verify_at(&pair.access_token, f.clock.now())?;
        assert_eq!(claims.identity.user_id, f.user_id);
        assert_eq!(claims.iss, "idp.example.com");
        assert!(claims.has_audience("photos.example.com"));
        assert_eq!(claims.key_ref.as_str(), "literal://photo-share-secret");
        assert_eq!(pair.access_token_expiry, f.clock.now() + Duration::hours(1));
        assert_eq!(pair.refresh_token.len(), EXCHANGE_REFRESH_TOKEN_BYTES * 2);
        assert_eq!(pair.refresh_token_expiry, f.clock.now() + Duration::days(30));

        let sessions = f.store.sessions_for_user(f.user_id).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].app_id, f.app.app.id);

        let replay = f
            .engine
            .exchange(&token_request(&f, &code), ClientInfo::default())
            .await;
        assert!(matches!(
            replay,
            Err(Error::Authorization(AuthorizationError::InvalidGrant))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn app_tokens_are_not_bearer_tokens_for_the_provider() -> Result<()> {
        let f = fixture().await?;
        let grant = f
            .engine
            .authorize(f.user_id, &authorize_request("https://photos.example.com/oauth/callback"))
            .await?;
        let pair = f
            .engine
            .exchange(&token_request(&f, &code_of(&grant.redirect_uri)?), ClientInfo::default())
            .await?;
        assert!(f.engine.verify_access_token(&pair.access_token).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn expired_codes_are_invalid_grants() -> Result<()> {
        let f = fixture().await?;
        let grant = f
            .engine
            .authorize(f.user_id, &authorize_request("https://photos.example.com/oauth/callback"))
            .await?;
        let code = code_of(&grant.redirect_uri)?;

        f.clock.advance(Duration::minutes(AUTHORIZATION_CODE_LIFETIME_MINUTES));
        let result = f
            .engine
            .exchange(&token_request(&f, &code), ClientInfo::default())
            .await;
        assert!(matches!(
            result,
            Err(Error::Authorization(AuthorizationError::InvalidGrant))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn exchange_checks_client_grant_and_redirect() -> Result<()> {
        let f = fixture().await?;
        let grant = f
            .engine
            .authorize(f.user_id, &authorize_request("https://photos.example.com/oauth/callback"))
            .await?;
        let code = code_of(&grant.redirect_uri)?;

        let mut wrong_secret = token_request(&f, &code);
        wrong_secret.client_secret = "not-the-secret".to_string();
        assert!(matches!(
            f.engine.exchange(&wrong_secret, ClientInfo::default()).await,
            Err(Error::Authorization(AuthorizationError::InvalidClient))
        ));

        let mut client_credentials = token_request(&f, &code);
        client_credentials.grant_type = "client_credentials".to_string();
        assert!(matches!(
            f.engine.exchange(&client_credentials, ClientInfo::default()).await,
            Err(Error::Authorization(AuthorizationError::UnsupportedGrantType(_)))
        ));

        let mut unknown_code = token_request(&f, &code);
        unknown_code.code = "00".repeat(AUTHORIZATION_CODE_BYTES);
        assert!(matches!(
            f.engine.exchange(&unknown_code, ClientInfo::default()).await,
            Err(Error::Authorization(AuthorizationError::InvalidGrant))
        ));

        let mut other_redirect = token_request(&f, &code);
        other_redirect.redirect_uri = "https://photos.example.com/elsewhere".to_string();
        assert!(matches!(
            f.engine.exchange(&other_redirect, ClientInfo::default()).await,
            Err(Error::Authorization(AuthorizationError::InvalidGrant))
        ));
        assert_eq!(f.store.session_count(f.user_id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn other_grant_types_need_no_code() -> Result<()> {
        let f = fixture().await?;
        let request = TokenRequest {
            grant_type: "client_credentials".to_string(),
            client_id: "photos.example.com".to_string(),
            client_secret: f.app.client_secret.clone(),
            ..TokenRequest::default()
        };
        assert!(matches!(
            f.engine.exchange(&request, ClientInfo::default()).await,
            Err(Error::Authorization(AuthorizationError::UnsupportedGrantType(grant)))
                if grant == "client_credentials"
        ));

        let missing_code = TokenRequest {
            grant_type: "authorization_code".to_string(),
            ..request
        };
        let Err(Error::Validation(errors)) =
            f.engine.exchange(&missing_code, ClientInfo::default()).await
        else {
            anyhow::bail!("code and redirect_uri should be required");
        };
        assert!(errors.has("code", crate::validation::REQUIRED));
        assert!(errors.has("redirect_uri", crate::validation::REQUIRED));
        Ok(())
    }

    #[tokio::test]
    async fn oversized_refresh_lifetime_fails_without_panicking() -> Result<()> {
        let f = fixture().await?;
        let (jwt, _) = app_payload("huge.example.com")
            .validate(f.engine.codec().resolver(), &[])
            .map_err(|errors| anyhow::anyhow!("{errors:?}"))?;
        let huge = f
            .engine
            .insert_app(
                f.user_id,
                app_payload("huge.example.com").details,
                jwt,
                Duration::days(100_000_000_000),
            )
            .await?;

        let mut request = authorize_request("https://huge.example.com/oauth/callback");
        request.client_id = "huge.example.com".to_string();
        let grant = f.engine.authorize(f.user_id, &request).await?;
        let exchange = TokenRequest {
            grant_type: "authorization_code".to_string(),
            client_id: "huge.example.com".to_string(),
            client_secret: huge.client_secret,
            code: code_of(&grant.redirect_uri)?,
            redirect_uri: "https://huge.example.com/oauth/callback".to_string(),
        };
        assert!(matches!(
            f.engine.exchange(&exchange, ClientInfo::default()).await,
            Err(Error::Internal(_))
        ));
        assert_eq!(f.store.session_count(f.user_id).await, 0);
        Ok(())
    }
}
