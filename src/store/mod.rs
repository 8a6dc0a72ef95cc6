//! Record access for users, passkeys, simulated clients and auth settings.
//!
//! Every operation is a single record update scoped to one user, credential or
//! client, except [`CredentialStore::merge_users`], which implementations run
//! atomically.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

mod memory;
pub mod models;
mod postgres;

pub use memory::MemoryStore;
pub use models::{
    AuthSettings, AuthSettingsUpdate, Authenticator, ClientDraft, ClientValidationError,
    DeviceType, MergeSummary, OAuthClient, User, UserInsert,
};
pub use postgres::PgStore;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
    ) -> Result<UserInsert>;
    async fn update_user_password(&self, id: Uuid, password_hash: &str) -> Result<()>;
    /// Returns `false` when the user does not exist.
    async fn update_user_status(&self, id: Uuid, disabled: bool) -> Result<bool>;
    async fn update_user_totp_secret(&self, id: Uuid, secret: Option<&str>) -> Result<()>;
    async fn update_user_challenge(&self, id: Uuid, challenge: Option<&str>) -> Result<()>;
    /// Clear the stored challenge and return what was there, in one step.
    async fn take_user_challenge(&self, id: Uuid) -> Result<Option<String>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn delete_user(&self, id: Uuid) -> Result<bool>;
    /// Move clients and passkeys from `source` to `target`, then delete `source`.
    /// Returns `None` when either user is missing.
    async fn merge_users(&self, source: Uuid, target: Uuid) -> Result<Option<MergeSummary>>;

    async fn get_authenticators_for_user(&self, user_id: Uuid) -> Result<Vec<Authenticator>>;
    async fn get_authenticator_by_credential_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<Authenticator>>;
    async fn save_authenticator(&self, authenticator: &Authenticator) -> Result<()>;
    /// Store a new counter and passkey state only if the counter advances
    /// (or both are zero). Returns `false` when nothing was updated.
    async fn update_authenticator_counter(
        &self,
        credential_id: &str,
        counter: u32,
        public_key: &[u8],
    ) -> Result<bool>;
    async fn delete_authenticator(&self, user_id: Uuid, credential_id: &str) -> Result<bool>;

    async fn list_clients(&self, owner_id: Uuid) -> Result<Vec<OAuthClient>>;
    async fn get_client(&self, owner_id: Uuid, id: Uuid) -> Result<Option<OAuthClient>>;
    async fn create_client(&self, owner_id: Uuid, draft: &ClientDraft) -> Result<OAuthClient>;
    async fn update_client(
        &self,
        owner_id: Uuid,
        id: Uuid,
        draft: &ClientDraft,
    ) -> Result<Option<OAuthClient>>;
    async fn delete_client(&self, owner_id: Uuid, id: Uuid) -> Result<bool>;

    async fn get_auth_settings(&self) -> Result<AuthSettings>;
    async fn update_auth_settings(&self, update: &AuthSettingsUpdate) -> Result<AuthSettings>;

    /// Cheap liveness check used by `/health`.
    async fn ping(&self) -> Result<()>;
}
