//! Postgres [`Store`] backed by `sqlx`; the schema lives in `sql/schema.sql`.

use super::{
    App, AppRecord, AuthorizationCode, Bootstrap, OAuthConfig, Session, Store, StoreError, User,
};
use crate::{
    secret::SecretReference,
    token::{SigningAlgorithm, SigningProfile},
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::ipnetwork::IpNetwork,
    PgConnection, PgPool, Row,
};
use std::time::Duration as StdDuration;
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

pub const SCHEMA: &str = include_str!("../../sql/schema.sql");

const APP_COLUMNS: &str = r"
    a.id, a.name, a.domain, a.landing_url, a.logo, a.owner_id, a.is_root, a.created_at,
    o.client_id, o.client_secret, o.redirect_uris, o.jwt_algorithm, o.jwt_signing_ref,
    o.jwt_verifying_ref, o.jwt_lifetime_ms, o.refresh_token_lifetime_ms,
    o.success_callback_url, o.error_callback_url
";

const USER_COLUMNS: &str = "id, name, email, avatar, is_root, deactivated_at, created_at";

const CODE_COLUMNS: &str =
    "code_hash, app_id, user_id, redirect_uri, expires_at, redeemed_at, created_at";

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn millis(lifetime: Duration) -> i64 {
    lifetime.num_milliseconds()
}

fn lifetime_from_millis(value: i64, column: &str) -> Result<Duration> {
    Duration::try_milliseconds(value)
        .filter(|lifetime| *lifetime > Duration::zero())
        .ok_or_else(|| anyhow!("invalid {column}: {value}"))
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        avatar: row.try_get("avatar")?,
        is_root: row.try_get("is_root")?,
        deactivated_at: row.try_get("deactivated_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn app_record_from_row(row: &PgRow) -> Result<AppRecord> {
    let app = App {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        landing_url: row.try_get("landing_url")?,
        logo: row.try_get("logo")?,
        owner_id: row.try_get("owner_id")?,
        is_root: row.try_get("is_root")?,
        created_at: row.try_get("created_at")?,
    };

    let algorithm: String = row.try_get("jwt_algorithm")?;
    let signing_ref: String = row.try_get("jwt_signing_ref")?;
    let verifying_ref: Option<String> = row.try_get("jwt_verifying_ref")?;
    let client_secret: String = row.try_get("client_secret")?;

    let jwt = SigningProfile {
        algorithm: algorithm
            .parse::<SigningAlgorithm>()
            .with_context(|| format!("stored jwt_algorithm for app {}", app.id))?,
        signing_ref: SecretReference::parse(&signing_ref)
            .with_context(|| format!("stored jwt_signing_ref for app {}", app.id))?,
        verifying_ref: verifying_ref
            .as_deref()
            .map(SecretReference::parse)
            .transpose()
            .with_context(|| format!("stored jwt_verifying_ref for app {}", app.id))?,
        lifetime: lifetime_from_millis(row.try_get("jwt_lifetime_ms")?, "jwt_lifetime_ms")?,
    };

    let oauth = OAuthConfig {
        app_id: app.id,
        client_id: row.try_get("client_id")?,
        client_secret: SecretString::from(client_secret),
        redirect_uris: row.try_get("redirect_uris")?,
        jwt,
        refresh_token_lifetime: lifetime_from_millis(
            row.try_get("refresh_token_lifetime_ms")?,
            "refresh_token_lifetime_ms",
        )?,
        success_callback_url: row.try_get("success_callback_url")?,
        error_callback_url: row.try_get("error_callback_url")?,
    };

    Ok(AppRecord { app, oauth })
}

fn code_from_row(row: &PgRow) -> Result<AuthorizationCode> {
    Ok(AuthorizationCode {
        code_hash: row.try_get("code_hash")?,
        app_id: row.try_get("app_id")?,
        user_id: row.try_get("user_id")?,
        redirect_uri: row.try_get("redirect_uri")?,
        expires_at: row.try_get("expires_at")?,
        redeemed_at: row.try_get("redeemed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

// Dropping an uncommitted transaction rolls it back, so helpers only return errors.
async fn insert_user(
    conn: &mut PgConnection,
    user: &User,
    password_hash: &str,
) -> Result<(), StoreError> {
    let query = r"
        INSERT INTO users (id, name, email, avatar, is_root, deactivated_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    ";
    sqlx::query(query)
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.avatar)
        .bind(user.is_root)
        .bind(user.deactivated_at)
        .bind(user.created_at)
        .execute(&mut *conn)
        .instrument(db_span("INSERT", query))
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::Conflict(format!("user {}", user.email))
            } else {
                anyhow::Error::new(err).context("failed to insert user").into()
            }
        })?;

    let query = "INSERT INTO passwords (user_id, hash) VALUES ($1, $2)";
    sqlx::query(query)
        .bind(user.id)
        .bind(password_hash)
        .execute(&mut *conn)
        .instrument(db_span("INSERT", query))
        .await
        .context("failed to insert password")?;
    Ok(())
}

async fn insert_app(conn: &mut PgConnection, app: &App, oauth: &OAuthConfig) -> Result<(), StoreError> {
    let query = r"
        INSERT INTO apps (id, name, domain, landing_url, logo, owner_id, is_root, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ";
    sqlx::query(query)
        .bind(app.id)
        .bind(&app.name)
        .bind(&app.domain)
        .bind(&app.landing_url)
        .bind(&app.logo)
        .bind(app.owner_id)
        .bind(app.is_root)
        .bind(app.created_at)
        .execute(&mut *conn)
        .instrument(db_span("INSERT", query))
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::Conflict(format!("app {}", app.domain))
            } else {
                anyhow::Error::new(err).context("failed to insert app").into()
            }
        })?;

    let query = r"
        INSERT INTO oauth_configs
            (app_id, client_id, client_secret, redirect_uris, jwt_algorithm, jwt_signing_ref,
             jwt_verifying_ref, jwt_lifetime_ms, refresh_token_lifetime_ms,
             success_callback_url, error_callback_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ";
    sqlx::query(query)
        .bind(oauth.app_id)
        .bind(&oauth.client_id)
        .bind(oauth.client_secret.expose_secret())
        .bind(&oauth.redirect_uris)
        .bind(oauth.jwt.algorithm.as_str())
        .bind(oauth.jwt.signing_ref.as_str())
        .bind(oauth.jwt.verifying_ref.as_ref().map(SecretReference::as_str))
        .bind(millis(oauth.jwt.lifetime))
        .bind(millis(oauth.refresh_token_lifetime))
        .bind(&oauth.success_callback_url)
        .bind(&oauth.error_callback_url)
        .execute(&mut *conn)
        .instrument(db_span("INSERT", query))
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::Conflict(format!("client id {}", oauth.client_id))
            } else {
                anyhow::Error::new(err)
                    .context("failed to insert oauth config")
                    .into()
            }
        })?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(StdDuration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create missing tables and indexes.
    ///
    /// # Errors
    /// Returns an error if a statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(db_span("CREATE", "sql/schema.sql"))
            .await
            .context("failed to apply schema")?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find user by email")?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find user by id")?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn create_user(&self, user: &User, password_hash: &str) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin create user transaction")?;
        insert_user(&mut tx, user, password_hash).await?;
        tx.commit().await.context("commit create user transaction")?;
        Ok(())
    }

    async fn find_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        let query = "SELECT hash FROM passwords WHERE user_id = $1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to find password")?;
        Ok(row
            .map(|row| row.try_get::<String, _>("hash"))
            .transpose()
            .context("failed to decode password hash")?)
    }

    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sessions
                (id, user_id, app_id, refresh_token_hash, user_agent, client_ip,
                 expires_at, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        let result = sqlx::query(query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.app_id)
            .bind(&session.refresh_token_hash)
            .bind(&session.user_agent)
            .bind(session.client_ip.map(IpNetwork::from))
            .bind(session.expires_at)
            .bind(session.created_by)
            .bind(session.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Conflict("refresh token".to_string()))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert session")
                .into()),
        }
    }

    async fn delete_session(
        &self,
        user_id: Uuid,
        refresh_token_hash: &[u8],
    ) -> Result<bool, StoreError> {
        let query = "DELETE FROM sessions WHERE user_id = $1 AND refresh_token_hash = $2";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(refresh_token_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let query = "DELETE FROM sessions WHERE user_id = $1";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete sessions")?;
        Ok(result.rows_affected())
    }

    async fn find_app_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<AppRecord>, StoreError> {
        let query = format!(
            "SELECT {APP_COLUMNS} FROM apps a JOIN oauth_configs o ON o.app_id = a.id WHERE o.client_id = $1"
        );
        let row = sqlx::query(&query)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find app by client id")?;
        Ok(row.as_ref().map(app_record_from_row).transpose()?)
    }

    async fn create_app(&self, app: &App, oauth: &OAuthConfig) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin create app transaction")?;
        insert_app(&mut tx, app, oauth).await?;
        tx.commit().await.context("commit create app transaction")?;
        Ok(())
    }

    async fn create_authorization_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO authorization_codes
                (code_hash, app_id, user_id, redirect_uri, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        sqlx::query(query)
            .bind(&code.code_hash)
            .bind(code.app_id)
            .bind(code.user_id)
            .bind(&code.redirect_uri)
            .bind(code.expires_at)
            .bind(code.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert authorization code")?;
        Ok(())
    }

    async fn redeem_authorization_code(
        &self,
        code_hash: &[u8],
        app_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        let query = format!(
            r"
            UPDATE authorization_codes
            SET redeemed_at = $3
            WHERE code_hash = $1
              AND app_id = $2
              AND redeemed_at IS NULL
              AND expires_at > $3
            RETURNING {CODE_COLUMNS}
        "
        );
        let row = sqlx::query(&query)
            .bind(code_hash)
            .bind(app_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to redeem authorization code")?;
        Ok(row.as_ref().map(code_from_row).transpose()?)
    }

    async fn find_root_app(&self) -> Result<Option<AppRecord>, StoreError> {
        let query = format!(
            "SELECT {APP_COLUMNS} FROM apps a JOIN oauth_configs o ON o.app_id = a.id WHERE a.is_root"
        );
        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to find root app")?;
        Ok(row.as_ref().map(app_record_from_row).transpose()?)
    }

    async fn claim_bootstrap(&self, bootstrap: &Bootstrap) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin bootstrap transaction")?;

        let query = "INSERT INTO bootstrap (id) VALUES (TRUE) ON CONFLICT DO NOTHING";
        let claimed = sqlx::query(query)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to claim bootstrap")?;
        if claimed.rows_affected() == 0 {
            return Ok(false);
        }

        insert_user(&mut tx, &bootstrap.root_user, &bootstrap.password_hash).await?;
        insert_app(&mut tx, &bootstrap.root_app, &bootstrap.oauth).await?;

        tx.commit().await.context("commit bootstrap transaction")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_every_table() {
        for table in [
            "users",
            "passwords",
            "apps",
            "oauth_configs",
            "authorization_codes",
            "sessions",
            "bootstrap",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "{table}"
            );
        }
    }

    #[test]
    fn lifetimes_must_be_positive() {
        assert!(lifetime_from_millis(0, "jwt_lifetime_ms").is_err());
        assert!(lifetime_from_millis(-5, "jwt_lifetime_ms").is_err());
        assert_eq!(
            lifetime_from_millis(millis(Duration::minutes(15)), "jwt_lifetime_ms").ok(),
            Some(Duration::minutes(15))
        );
    }

    #[test]
    fn only_database_errors_can_be_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }
}
