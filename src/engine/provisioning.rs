use super::{
    apps::{AppDetails, AppView, CreatedApp},
    Engine, UserView,
};
use crate::{
    credentials::NewAccount,
    engine::accounts::RegisterUserPayload,
    error::{Error, Result},
    store::Bootstrap,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

/// The root application takes its token settings from system configuration.
pub type RootAppPayload = AppDetails;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConfigurePayload {
    pub root_user: RegisterUserPayload,
    pub root_app: AppDetails,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProvisionedSystem {
    pub root_user: UserView,
    pub root_app: CreatedApp,
}

impl Engine {
    /// Create the root user and the root application, once.
    ///
    /// The bootstrap flag, the root user and the root app are written together, so a
    /// rejected request leaves nothing behind and can be corrected and retried.
    ///
    /// # Errors
    /// [`Error::Validation`] with the violations of both payloads,
    /// [`Error::AlreadyExists`] when the root email or domain is taken,
    /// [`Error::AlreadyProvisioned`] on every call after the first accepted one.
    #[instrument(skip(self, payload))]
    pub async fn configure(&self, payload: ConfigurePayload) -> Result<ProvisionedSystem> {
        let account: NewAccount = payload.root_user.into();
        let mut errors = account.violations().nest("root_user");
        errors.merge(payload.root_app.violations().nest("root_app"));
        errors.into_result()?;

        if self.is_provisioned().await? {
            return Err(Error::AlreadyProvisioned);
        }

        let (bootstrap, client_secret) = match self.claim(&account, payload.root_app).await {
            // A concurrent configure won between the check above and the claim.
            Err(Error::AlreadyExists) if self.is_provisioned().await? => return Err(Error::AlreadyProvisioned),
            outcome => outcome?,
        };

        info!(
            user_id = %bootstrap.root_user.id,
            app_id = %bootstrap.root_app.id,
            "system provisioned"
        );
        Ok(ProvisionedSystem {
            root_user: UserView::from(&bootstrap.root_user),
            root_app: CreatedApp {
                app: AppView::new(&bootstrap.root_app, &bootstrap.oauth),
                client_secret,
            },
        })
    }

    async fn is_provisioned(&self) -> Result<bool> {
        let root = self
            .deadline()
            .run("find_root_app", self.store.find_root_app())
            .await?;
        Ok(root.is_some())
    }

    async fn claim(&self, account: &NewAccount, root_app: AppDetails) -> Result<(Bootstrap, String)> {
        let (root_user, password_hash) = self.credentials.prepare(account, true, self.now()).await?;
        let (root_app, oauth, client_secret) = self.new_app(
            root_user.id,
            root_app,
            self.config.root_jwt.clone(),
            self.config.root_refresh_token_lifetime,
            true,
        )?;
        let bootstrap = Bootstrap {
            root_user,
            password_hash,
            root_app,
            oauth,
        };

        let claimed = self
            .deadline()
            .run("claim_bootstrap", self.store.claim_bootstrap(&bootstrap))
            .await?;
        if !claimed {
            debug!("bootstrap already claimed");
            return Err(Error::AlreadyProvisioned);
        }
        Ok((bootstrap, client_secret))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app_payload, engine, ROOT_KEY};
    use super::*;
    use crate::{store::Store, validation::REQUIRED};
    use anyhow::Result;

    fn payload() -> ConfigurePayload {
        ConfigurePayload {
            root_user: RegisterUserPayload {
                name: "Root Admin".to_string(),
                email: "Admin@Tessera.dev".to_string(),
                password: "Abc123!@".to_string(),
                avatar: None,
            },
            root_app: AppDetails {
                name: "Tessera".to_string(),
                domain: "tessera.dev".to_string(),
                landing_url: "https://tessera.dev".to_string(),
                logo: Some("https://tessera.dev/logo.svg".to_string()),
                redirect_uris: vec!["https://tessera.dev/callback".to_string()],
                success_callback_url: "https://tessera.dev/ok".to_string(),
                error_callback_url: "https://tessera.dev/error".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn configure_creates_root_user_and_app_once() -> Result<()> {
        let (engine, store, _) = engine()?;

        let system = engine.configure(payload()).await?;
        assert!(system.root_user.is_root);
        assert_eq!(system.root_user.email, "admin@tessera.dev");
        assert!(system.root_app.app.is_root);
        assert_eq!(system.root_app.app.owner_id, system.root_user.id);
        assert_eq!(system.root_app.app.jwt_lifetime, "15m");
        assert_eq!(system.root_app.app.refresh_token_lifetime, "7d");

        let root = store
            .find_root_app()
            .await?
            .ok_or_else(|| anyhow::anyhow!("root app missing"))?;
        assert_eq!(root.oauth.jwt.signing_ref.as_str(), ROOT_KEY);

        let again = engine.configure(payload()).await;
        assert!(matches!(again, Err(Error::AlreadyProvisioned)));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_payload_does_not_claim_bootstrap() -> Result<()> {
        let (engine, _, _) = engine()?;

        let mut bad = payload();
        bad.root_user.password = "abc12345".to_string();
        bad.root_app.domain = String::new();
        let Err(Error::Validation(errors)) = engine.configure(bad).await else {
            anyhow::bail!("expected validation errors");
        };
        assert!(errors.has("root_user.password", crate::credentials::UPPERCASE));
        assert!(errors.has("root_app.domain", REQUIRED));

        engine.configure(payload()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn failed_configure_can_be_retried() -> Result<()> {
        let (engine, store, _) = engine()?;
        let owner = engine
            .register_user(RegisterUserPayload {
                name: "Early Bird".to_string(),
                email: "early@example.com".to_string(),
                password: "Abc123!@".to_string(),
                avatar: None,
            })
            .await?;
        engine
            .create_app(owner.id, app_payload("tessera.dev"))
            .await?;

        let taken_domain = engine.configure(payload()).await;
        assert!(matches!(taken_domain, Err(Error::AlreadyExists)));
        assert!(store.find_user_by_email("admin@tessera.dev").await?.is_none());
        assert!(store.find_root_app().await?.is_none());

        let mut taken_email = payload();
        taken_email.root_user.email = "early@example.com".to_string();
        taken_email.root_app.domain = "id.tessera.dev".to_string();
        assert!(matches!(
            engine.configure(taken_email).await,
            Err(Error::AlreadyExists)
        ));

        let mut corrected = payload();
        corrected.root_app.domain = "id.tessera.dev".to_string();
        let system = engine.configure(corrected).await?;
        assert_eq!(system.root_app.app.domain, "id.tessera.dev");

        let tokens = engine
            .login_user(
                crate::engine::accounts::LoginUserPayload {
                    email: "admin@tessera.dev".to_string(),
                    password: "Abc123!@".to_string(),
                },
                crate::engine::ClientInfo::default(),
            )
            .await?;
        let claims = engine.verify_access_token(&tokens.access_token).await?;
        assert_eq!(claims.identity.user_id, system.root_user.id);
        Ok(())
    }
}
