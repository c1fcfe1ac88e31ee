use super::{random_hex, Engine};
use crate::{
    error::{AuthenticationError, Result},
    lifetime::{format_lifetime, parse_lifetime},
    secret::{SecretReference, SecretResolver},
    store::{App, OAuthConfig},
    token::{SigningAlgorithm, SigningProfile},
    validation::{ValidationErrors, LIFETIME, MIN, REQUIRED, RESERVED, SECRET_REF},
};
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Bytes of entropy in a generated client secret.
pub const CLIENT_SECRET_BYTES: usize = 64;
pub const MIN_APP_NAME_LENGTH: usize = 3;

/// Descriptive fields shared by every app, the root application included.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AppDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub landing_url: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub success_callback_url: String,
    #[serde(default)]
    pub error_callback_url: String,
}

impl AppDetails {
    #[must_use]
    pub fn violations(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if errors.required("name", &self.name) {
            errors.min_chars("name", self.name.trim(), MIN_APP_NAME_LENGTH);
        }
        errors.required("domain", &self.domain);
        errors.absolute_url("landing_url", &self.landing_url);
        if let Some(logo) = self.logo.as_deref().filter(|logo| !logo.trim().is_empty()) {
            errors.absolute_url("logo", logo);
        }
        if self.redirect_uris.is_empty() {
            errors.add("redirect_uris", REQUIRED);
        }
        for (index, uri) in self.redirect_uris.iter().enumerate() {
            errors.absolute_url(&format!("redirect_uris[{index}]"), uri);
        }
        errors.absolute_url("success_callback_url", &self.success_callback_url);
        errors.absolute_url("error_callback_url", &self.error_callback_url);

        errors
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateAppPayload {
    #[serde(flatten)]
    pub details: AppDetails,
    #[serde(default)]
    pub jwt_algorithm: String,
    /// Secret reference of the signing key, e.g. `env://APP_JWT_KEY`.
    #[serde(default)]
    pub jwt_secret_ref: String,
    /// Public key reference for RSA apps.
    #[serde(default)]
    pub jwt_verify_ref: Option<String>,
    /// Access token lifetime, e.g. `15m`.
    #[serde(default)]
    pub jwt_lifetime: String,
    /// Refresh token lifetime, e.g. `30d`.
    #[serde(default)]
    pub refresh_token_lifetime: String,
}

impl CreateAppPayload {
    /// Check every field and build the token settings when all of them are valid.
    /// Key references listed in `reserved` belong to the root application and are
    /// refused.
    ///
    /// # Errors
    /// Every violation found.
    pub fn validate(
        &self,
        resolver: &SecretResolver,
        reserved: &[&SecretReference],
    ) -> std::result::Result<(SigningProfile, Duration), ValidationErrors> {
        let mut errors = self.details.violations();

        let algorithm = if errors.required("jwt_algorithm", &self.jwt_algorithm) {
            let parsed = self.jwt_algorithm.parse::<SigningAlgorithm>().ok();
            if parsed.is_none() {
                let names: Vec<&str> = SigningAlgorithm::ALL.iter().map(|a| a.as_str()).collect();
                errors.one_of("jwt_algorithm", &self.jwt_algorithm, &names);
            }
            parsed
        } else {
            None
        };

        let signing_ref = check_reference(&mut errors, resolver, "jwt_secret_ref", &self.jwt_secret_ref);
        let verifying_ref = match self.jwt_verify_ref.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                check_reference(&mut errors, resolver, "jwt_verify_ref", raw).map(Some)
            }
            _ => Some(None),
        };
        let is_reserved = |candidate: &SecretReference| {
            reserved
                .iter()
                .any(|taken| taken.as_str() == candidate.as_str())
        };
        if signing_ref.as_ref().is_some_and(is_reserved) {
            errors.add("jwt_secret_ref", RESERVED);
        }
        if verifying_ref.as_ref().and_then(Option::as_ref).is_some_and(is_reserved) {
            errors.add("jwt_verify_ref", RESERVED);
        }

        let jwt_lifetime = check_lifetime(&mut errors, "jwt_lifetime", &self.jwt_lifetime);
        if jwt_lifetime.is_some_and(|lifetime| lifetime < Duration::seconds(1)) {
            errors.add_with_param("jwt_lifetime", MIN, "1s");
        }
        let refresh_lifetime =
            check_lifetime(&mut errors, "refresh_token_lifetime", &self.refresh_token_lifetime);

        if !errors.is_empty() {
            return Err(errors);
        }
        match (algorithm, signing_ref, verifying_ref, jwt_lifetime, refresh_lifetime) {
            (Some(algorithm), Some(signing_ref), Some(verifying_ref), Some(lifetime), Some(refresh)) => {
                let profile = SigningProfile {
                    algorithm,
                    signing_ref,
                    verifying_ref,
                    lifetime,
                };
                Ok((profile, refresh))
            }
            _ => Err(errors),
        }
    }
}

fn check_reference(
    errors: &mut ValidationErrors,
    resolver: &SecretResolver,
    field: &str,
    raw: &str,
) -> Option<SecretReference> {
    if !errors.required(field, raw) {
        return None;
    }
    match resolver.check(raw.trim()) {
        Ok(reference) => Some(reference),
        Err(_) => {
            errors.add(field, SECRET_REF);
            None
        }
    }
}

fn check_lifetime(errors: &mut ValidationErrors, field: &str, raw: &str) -> Option<Duration> {
    if !errors.required(field, raw) {
        return None;
    }
    match parse_lifetime(raw) {
        Ok(lifetime) => Some(lifetime),
        Err(_) => {
            errors.add(field, LIFETIME);
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AppView {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub landing_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub owner_id: Uuid,
    pub is_root: bool,
    pub client_id: String,
    pub redirect_uris: Vec<String>,
    pub jwt_algorithm: SigningAlgorithm,
    pub jwt_lifetime: String,
    pub refresh_token_lifetime: String,
    pub success_callback_url: String,
    pub error_callback_url: String,
    pub created_at: DateTime<Utc>,
}

impl AppView {
    pub(super) fn new(app: &App, oauth: &OAuthConfig) -> Self {
        Self {
            id: app.id,
            name: app.name.clone(),
            domain: app.domain.clone(),
            landing_url: app.landing_url.clone(),
            logo: app.logo.clone(),
            owner_id: app.owner_id,
            is_root: app.is_root,
            client_id: oauth.client_id.clone(),
            redirect_uris: oauth.redirect_uris.clone(),
            jwt_algorithm: oauth.jwt.algorithm,
            jwt_lifetime: format_lifetime(oauth.jwt.lifetime),
            refresh_token_lifetime: format_lifetime(oauth.refresh_token_lifetime),
            success_callback_url: oauth.success_callback_url.clone(),
            error_callback_url: oauth.error_callback_url.clone(),
            created_at: app.created_at,
        }
    }
}

/// A newly registered app; the client secret is never shown again.
#[derive(Serialize, ToSchema)]
pub struct CreatedApp {
    pub app: AppView,
    pub client_secret: String,
}

impl fmt::Debug for CreatedApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedApp")
            .field("app", &self.app)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Register an app owned by `owner_id`. The client id is the app's domain.
    ///
    /// # Errors
    /// [`crate::Error::Validation`] with every violation,
    /// [`crate::Error::AlreadyExists`] when the domain is already a client id.
    #[instrument(skip(self, payload), fields(domain = %payload.details.domain))]
    pub async fn create_app(&self, owner_id: Uuid, payload: CreateAppPayload) -> Result<CreatedApp> {
        let root = &self.config.root_jwt;
        let reserved = [&root.signing_ref, root.verification_ref()];
        let (jwt, refresh_token_lifetime) = payload.validate(self.codec.resolver(), &reserved)?;

        let owner = self
            .deadline()
            .run("find_user_by_id", self.store.find_user_by_id(owner_id))
            .await?;
        if owner.is_none() {
            return Err(AuthenticationError::InvalidCredentials.into());
        }

        let created = self
            .insert_app(owner_id, payload.details, jwt, refresh_token_lifetime)
            .await?;
        info!(app_id = %created.app.id, client_id = %created.app.client_id, "app created");
        Ok(created)
    }

    /// Persist an app and its OAuth configuration with a fresh client secret.
    pub(super) async fn insert_app(
        &self,
        owner_id: Uuid,
        details: AppDetails,
        jwt: SigningProfile,
        refresh_token_lifetime: Duration,
    ) -> Result<CreatedApp> {
        let (app, oauth, client_secret) =
            self.new_app(owner_id, details, jwt, refresh_token_lifetime, false)?;

        self.deadline()
            .run("create_app", self.store.create_app(&app, &oauth))
            .await?;

        Ok(CreatedApp {
            app: AppView::new(&app, &oauth),
            client_secret,
        })
    }

    /// Build an app and its OAuth configuration with a fresh client secret.
    pub(super) fn new_app(
        &self,
        owner_id: Uuid,
        details: AppDetails,
        jwt: SigningProfile,
        refresh_token_lifetime: Duration,
        is_root: bool,
    ) -> Result<(App, OAuthConfig, String)> {
        let client_secret = random_hex(CLIENT_SECRET_BYTES)?;
        let domain = details.domain.trim().to_string();

        let app = App {
            id: Uuid::new_v4(),
            name: details.name.trim().to_string(),
            domain: domain.clone(),
            landing_url: details.landing_url,
            logo: details.logo.filter(|logo| !logo.trim().is_empty()),
            owner_id,
            is_root,
            created_at: self.now(),
        };
        let oauth = OAuthConfig {
            app_id: app.id,
            client_id: domain,
            client_secret: SecretString::from(client_secret.clone()),
            redirect_uris: details.redirect_uris,
            jwt,
            refresh_token_lifetime,
            success_callback_url: details.success_callback_url,
            error_callback_url: details.error_callback_url,
        };
        Ok((app, oauth, client_secret))
    }
}
