//! In-memory [`Store`] for development and tests.
//!
//! Not durable: everything is lost on restart. All state sits behind one
//! `tokio::sync::RwLock`, so multi-record writes (user + password, app + OAuth config,
//! bootstrap, code redemption) are atomic within the process. Expired sessions and
//! codes are pruned whenever a new one is inserted; redeemed codes are removed.

use super::{
    App, AppRecord, AuthorizationCode, Bootstrap, OAuthConfig, Session, Store, StoreError, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    user_ids_by_email: HashMap<String, Uuid>,
    password_hashes: HashMap<Uuid, String>,
    sessions: HashMap<Vec<u8>, Session>,
    apps: HashMap<Uuid, App>,
    oauth_by_client_id: HashMap<String, OAuthConfig>,
    codes: HashMap<Vec<u8>, AuthorizationCode>,
    bootstrapped: bool,
}

impl State {
    fn record(&self, oauth: &OAuthConfig) -> Option<AppRecord> {
        self.apps.get(&oauth.app_id).map(|app| AppRecord {
            app: app.clone(),
            oauth: oauth.clone(),
        })
    }

    fn check_user(&self, user: &User) -> Result<(), StoreError> {
        if self.user_ids_by_email.contains_key(&user.email) || self.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {}", user.email)));
        }
        Ok(())
    }

    fn check_app(&self, app: &App, oauth: &OAuthConfig) -> Result<(), StoreError> {
        if self.oauth_by_client_id.contains_key(&oauth.client_id) || self.apps.contains_key(&app.id)
        {
            return Err(StoreError::Conflict(format!("client id {}", oauth.client_id)));
        }
        if app.is_root && self.apps.values().any(|existing| existing.is_root) {
            return Err(StoreError::Conflict("root app".to_string()));
        }
        Ok(())
    }

    fn insert_user(&mut self, user: &User, password_hash: &str) {
        self.user_ids_by_email.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user.clone());
        self.password_hashes
            .insert(user.id, password_hash.to_string());
    }

    fn insert_app(&mut self, app: &App, oauth: &OAuthConfig) {
        self.apps.insert(app.id, app.clone());
        self.oauth_by_client_id
            .insert(oauth.client_id.clone(), oauth.clone());
    }

    fn prune_sessions(&mut self, now: DateTime<Utc>) {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        let pruned = before - self.sessions.len();
        if pruned > 0 {
            debug!(pruned, "expired sessions pruned");
        }
    }

    fn prune_codes(&mut self, now: DateTime<Utc>) {
        let before = self.codes.len();
        self.codes
            .retain(|_, code| code.redeemed_at.is_none() && code.expires_at > now);
        let pruned = before - self.codes.len();
        if pruned > 0 {
            debug!(pruned, "expired authorization codes pruned");
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions of `user_id`.
    pub async fn session_count(&self, user_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .count()
    }

    /// Number of sessions held, all users included.
    pub async fn total_sessions(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Number of authorization codes held, all apps included.
    pub async fn total_codes(&self) -> usize {
        self.state.read().await.codes.len()
    }

    /// Sessions of `user_id`, for inspection in tests and tooling.
    pub async fn sessions_for_user(&self, user_id: Uuid) -> Vec<Session> {
        self.state
            .read()
            .await
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Number of pending authorization codes of `app_id`.
    pub async fn code_count(&self, app_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .codes
            .values()
            .filter(|code| code.app_id == app_id)
            .count()
    }

    /// Mark a user as deactivated.
    pub async fn deactivate_user(&self, user_id: Uuid, at: DateTime<Utc>) -> bool {
        self.state
            .write()
            .await
            .users
            .get_mut(&user_id)
            .map(|user| user.deactivated_at = Some(at))
            .is_some()
    }

    /// Drop a user's password hash, as for accounts created by other identity methods.
    pub async fn remove_password_hash(&self, user_id: Uuid) -> bool {
        self.state
            .write()
            .await
            .password_hashes
            .remove(&user_id)
            .is_some()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .user_ids_by_email
            .get(email)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn create_user(&self, user: &User, password_hash: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_user(user)?;
        state.insert_user(user, password_hash);
        Ok(())
    }

    async fn find_password_hash(&self, user_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().await.password_hashes.get(&user_id).cloned())
    }

    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.prune_sessions(session.created_at);
        if state.sessions.contains_key(&session.refresh_token_hash) {
            return Err(StoreError::Conflict("refresh token".to_string()));
        }
        state
            .sessions
            .insert(session.refresh_token_hash.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(
        &self,
        user_id: Uuid,
        refresh_token_hash: &[u8],
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let owned = state
            .sessions
            .get(refresh_token_hash)
            .is_some_and(|session| session.user_id == user_id);
        if owned {
            state.sessions.remove(refresh_token_hash);
        }
        Ok(owned)
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, session| session.user_id != user_id);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn find_app_by_client_id(
        &self,
        client_id: &str,
    ) -> Result<Option<AppRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .oauth_by_client_id
            .get(client_id)
            .and_then(|oauth| state.record(oauth)))
    }

    async fn create_app(&self, app: &App, oauth: &OAuthConfig) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_app(app, oauth)?;
        state.insert_app(app, oauth);
        Ok(())
    }

    async fn create_authorization_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.prune_codes(code.created_at);
        if state.codes.contains_key(&code.code_hash) {
            return Err(StoreError::Conflict("authorization code".to_string()));
        }
        state.codes.insert(code.code_hash.clone(), code.clone());
        Ok(())
    }

    async fn redeem_authorization_code(
        &self,
        code_hash: &[u8],
        app_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        let mut state = self.state.write().await;
        let Some(code) = state.codes.get(code_hash) else {
            return Ok(None);
        };
        if code.app_id != app_id {
            return Ok(None);
        }
        let expired = code.redeemed_at.is_some() || code.expires_at <= now;
        let Some(mut code) = state.codes.remove(code_hash) else {
            return Ok(None);
        };
        if expired {
            return Ok(None);
        }
        code.redeemed_at = Some(now);
        Ok(Some(code))
    }

    async fn find_root_app(&self) -> Result<Option<AppRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .oauth_by_client_id
            .values()
            .filter(|oauth| state.apps.get(&oauth.app_id).is_some_and(|app| app.is_root))
            .find_map(|oauth| state.record(oauth)))
    }

    async fn claim_bootstrap(&self, bootstrap: &Bootstrap) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.bootstrapped {
            return Ok(false);
        }
        state.check_user(&bootstrap.root_user)?;
        state.check_app(&bootstrap.root_app, &bootstrap.oauth)?;

        state.insert_user(&bootstrap.root_user, &bootstrap.password_hash);
        state.insert_app(&bootstrap.root_app, &bootstrap.oauth);
        state.bootstrapped = true;
        Ok(true)
    }
}
