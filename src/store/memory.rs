use super::{
    AuthSettings, AuthSettingsUpdate, Authenticator, ClientDraft, CredentialStore, MergeSummary,
    OAuthClient, User, UserInsert,
};
use crate::unix_now;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: IndexMap<Uuid, User>,
    authenticators: HashMap<String, Authenticator>,
    clients: IndexMap<Uuid, OAuthClient>,
    settings: AuthSettings,
}

/// Process-local store used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_settings(settings: AuthSettings) -> Self {
        Self {
            inner: RwLock::new(Inner {
                settings,
                ..Inner::default()
            }),
        }
    }
}

fn client_from_draft(id: Uuid, owner_id: Uuid, created_at: i64, draft: &ClientDraft) -> OAuthClient {
    OAuthClient {
        id,
        owner_id,
        name: draft.name.clone(),
        client_id: draft.client_id.clone(),
        client_secret: draft.client_secret.clone(),
        authorize_url: draft.authorize_url.clone(),
        token_url: draft.token_url.clone(),
        end_session_url: draft.end_session_url.clone(),
        jwks_url: draft.jwks_url.clone(),
        redirect_uri: draft.redirect_uri.clone(),
        scope: draft.scope.clone(),
        custom_attributes: draft.custom_attributes.clone(),
        created_at,
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
    ) -> Result<UserInsert> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|user| user.username == username) {
            return Ok(UserInsert::UsernameTaken);
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            totp_secret: None,
            email: email.map(ToString::to_string),
            current_challenge: None,
            disabled: false,
            created_at: unix_now(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(UserInsert::Created(user))
    }

    async fn update_user_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn update_user_status(&self, id: Uuid, disabled: bool) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&id).is_some_and(|user| {
            user.disabled = disabled;
            true
        }))
    }

    async fn update_user_totp_secret(&self, id: Uuid, secret: Option<&str>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        user.totp_secret = secret.map(ToString::to_string);
        Ok(())
    }

    async fn update_user_challenge(&self, id: Uuid, challenge: Option<&str>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow!("user {id} not found"))?;
        user.current_challenge = challenge.map(ToString::to_string);
        Ok(())
    }

    async fn take_user_challenge(&self, id: Uuid) -> Result<Option<String>> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .users
            .get_mut(&id)
            .and_then(|user| user.current_challenge.take()))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.inner.read().await.users.values().cloned().collect())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.users.shift_remove(&id).is_none() {
            return Ok(false);
        }
        inner.authenticators.retain(|_, auth| auth.user_id != id);
        inner.clients.retain(|_, client| client.owner_id != id);
        Ok(true)
    }

    async fn merge_users(&self, source: Uuid, target: Uuid) -> Result<Option<MergeSummary>> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&source) || !inner.users.contains_key(&target) {
            return Ok(None);
        }

        let mut summary = MergeSummary {
            moved_clients: 0,
            moved_authenticators: 0,
        };
        for client in inner.clients.values_mut() {
            if client.owner_id == source {
                client.owner_id = target;
                summary.moved_clients += 1;
            }
        }
        for auth in inner.authenticators.values_mut() {
            if auth.user_id == source {
                auth.user_id = target;
                summary.moved_authenticators += 1;
            }
        }
        inner.users.shift_remove(&source);
        Ok(Some(summary))
    }

    async fn get_authenticators_for_user(&self, user_id: Uuid) -> Result<Vec<Authenticator>> {
        let inner = self.inner.read().await;
        let mut list: Vec<Authenticator> = inner
            .authenticators
            .values()
            .filter(|auth| auth.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by_key(|auth| auth.created_at);
        Ok(list)
    }

    async fn get_authenticator_by_credential_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<Authenticator>> {
        Ok(self
            .inner
            .read()
            .await
            .authenticators
            .get(credential_id)
            .cloned())
    }

    async fn save_authenticator(&self, authenticator: &Authenticator) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner
            .authenticators
            .contains_key(&authenticator.credential_id)
        {
            return Err(anyhow!(
                "credential {} already registered",
                authenticator.credential_id
            ));
        }
        inner
            .authenticators
            .insert(authenticator.credential_id.clone(), authenticator.clone());
        Ok(())
    }

    async fn update_authenticator_counter(
        &self,
        credential_id: &str,
        counter: u32,
        public_key: &[u8],
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(auth) = inner.authenticators.get_mut(credential_id) else {
            return Ok(false);
        };
        if auth.counter >= counter && !(auth.counter == 0 && counter == 0) {
            return Ok(false);
        }
        auth.counter = counter;
        auth.public_key = public_key.to_vec();
        Ok(true)
    }

    async fn delete_authenticator(&self, user_id: Uuid, credential_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let owned = inner
            .authenticators
            .get(credential_id)
            .is_some_and(|auth| auth.user_id == user_id);
        if owned {
            inner.authenticators.remove(credential_id);
        }
        Ok(owned)
    }

    async fn list_clients(&self, owner_id: Uuid) -> Result<Vec<OAuthClient>> {
        let inner = self.inner.read().await;
        Ok(inner
            .clients
            .values()
            .filter(|client| client.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get_client(&self, owner_id: Uuid, id: Uuid) -> Result<Option<OAuthClient>> {
        let inner = self.inner.read().await;
        Ok(inner
            .clients
            .get(&id)
            .filter(|client| client.owner_id == owner_id)
            .cloned())
    }

    async fn create_client(&self, owner_id: Uuid, draft: &ClientDraft) -> Result<OAuthClient> {
        let client = client_from_draft(Uuid::new_v4(), owner_id, unix_now(), draft);
        self.inner
            .write()
            .await
            .clients
            .insert(client.id, client.clone());
        Ok(client)
    }

    async fn update_client(
        &self,
        owner_id: Uuid,
        id: Uuid,
        draft: &ClientDraft,
    ) -> Result<Option<OAuthClient>> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner
            .clients
            .get_mut(&id)
            .filter(|client| client.owner_id == owner_id)
        else {
            return Ok(None);
        };
        *existing = client_from_draft(id, owner_id, existing.created_at, draft);
        Ok(Some(existing.clone()))
    }

    async fn delete_client(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let owned = inner
            .clients
            .get(&id)
            .is_some_and(|client| client.owner_id == owner_id);
        if owned {
            inner.clients.shift_remove(&id);
        }
        Ok(owned)
    }

    async fn get_auth_settings(&self) -> Result<AuthSettings> {
        Ok(self.inner.read().await.settings.clone())
    }

    async fn update_auth_settings(&self, update: &AuthSettingsUpdate) -> Result<AuthSettings> {
        let mut inner = self.inner.write().await;
        update.apply(&mut inner.settings);
        Ok(inner.settings.clone())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
