//! Records persisted by a [`super::CredentialStore`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

/// Local account.
///
/// `username` is unique and compared case-sensitively as stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub totp_secret: Option<String>,
    pub email: Option<String>,
    /// Serialized `webauthn-rs` ceremony state, if a ceremony is in flight.
    pub current_challenge: Option<String>,
    pub disabled: bool,
    pub created_at: i64,
}

impl User {
    #[must_use]
    pub fn mfa_enabled(&self) -> bool {
        self.totp_secret.is_some()
    }
}

/// Outcome of inserting a user with a possibly taken username.
#[derive(Debug)]
pub enum UserInsert {
    Created(User),
    UsernameTaken,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    SingleDevice,
    MultiDevice,
}

impl DeviceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleDevice => "singleDevice",
            Self::MultiDevice => "multiDevice",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "multiDevice" {
            Self::MultiDevice
        } else {
            Self::SingleDevice
        }
    }
}

/// One registered passkey.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authenticator {
    /// Base64url (unpadded) credential id, unique across all users.
    pub credential_id: String,
    pub user_id: Uuid,
    /// Serialized `webauthn-rs` passkey (public key, counter and flags).
    pub public_key: Vec<u8>,
    pub counter: u32,
    pub device_type: DeviceType,
    pub backed_up: bool,
    pub transports: Vec<String>,
    pub created_at: i64,
}

/// Relying-party configuration driven by the simulator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthClient {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub end_session_url: Option<String>,
    pub jwks_url: Option<String>,
    pub redirect_uri: String,
    pub scope: Option<String>,
    /// Extra authorize-request parameters, kept in insertion order.
    pub custom_attributes: IndexMap<String, String>,
    pub created_at: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} must be an absolute URL")]
    InvalidUrl(&'static str),
}

/// Editable fields of an [`OAuthClient`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientDraft {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    #[serde(default)]
    pub end_session_url: Option<String>,
    #[serde(default)]
    pub jwks_url: Option<String>,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom_attributes: IndexMap<String, String>,
}

impl ClientDraft {
    /// Trim inputs and check that every URL is absolute.
    ///
    /// # Errors
    /// Returns the first field that is empty or not an absolute URL.
    pub fn validate(mut self) -> Result<Self, ClientValidationError> {
        self.name = self.name.trim().to_string();
        self.client_id = self.client_id.trim().to_string();
        if self.name.is_empty() {
            return Err(ClientValidationError::Missing("name"));
        }
        if self.client_id.is_empty() {
            return Err(ClientValidationError::Missing("clientId"));
        }

        require_absolute_url("authorizeUrl", &self.authorize_url)?;
        require_absolute_url("tokenUrl", &self.token_url)?;
        require_absolute_url("redirectUri", &self.redirect_uri)?;

        self.end_session_url = non_empty(self.end_session_url);
        self.jwks_url = non_empty(self.jwks_url);
        self.scope = non_empty(self.scope);
        if let Some(url) = &self.end_session_url {
            require_absolute_url("endSessionUrl", url)?;
        }
        if let Some(url) = &self.jwks_url {
            require_absolute_url("jwksUrl", url)?;
        }

        self.custom_attributes.retain(|key, _| !key.trim().is_empty());
        Ok(self)
    }
}

fn require_absolute_url(field: &'static str, value: &str) -> Result<(), ClientValidationError> {
    match Url::parse(value.trim()) {
        Ok(url) if url.has_host() => Ok(()),
        _ => Err(ClientValidationError::InvalidUrl(field)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Process-wide authentication settings, editable by the administrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthSettings {
    pub enable_password_login: bool,
    pub enable_oidc_login: bool,
    pub enable_oidc_auto_provision: bool,
    pub oidc_username_claim: String,
    pub oidc_group_claim: String,
    pub oidc_required_groups: Vec<String>,
    pub oidc_issuer: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enable_password_login: true,
            enable_oidc_login: false,
            enable_oidc_auto_provision: true,
            oidc_username_claim: "email".to_string(),
            oidc_group_claim: "groups".to_string(),
            oidc_required_groups: Vec::new(),
            oidc_issuer: None,
            oidc_client_id: None,
            oidc_client_secret: None,
        }
    }
}

pub(crate) const SETTING_ENABLE_PASSWORD_LOGIN: &str = "enable_password_login";
pub(crate) const SETTING_ENABLE_OIDC_LOGIN: &str = "enable_oidc_login";
pub(crate) const SETTING_ENABLE_OIDC_AUTO_PROVISION: &str = "enable_oidc_auto_provision";
pub(crate) const SETTING_OIDC_USERNAME_CLAIM: &str = "oidc_username_claim";
pub(crate) const SETTING_OIDC_GROUP_CLAIM: &str = "oidc_group_claim";
pub(crate) const SETTING_OIDC_REQUIRED_GROUPS: &str = "oidc_required_groups";
pub(crate) const SETTING_OIDC_ISSUER: &str = "oidc_issuer";
pub(crate) const SETTING_OIDC_CLIENT_ID: &str = "oidc_client_id";
pub(crate) const SETTING_OIDC_CLIENT_SECRET: &str = "oidc_client_secret";

impl AuthSettings {
    /// Build settings from stored key/value rows. Unknown keys are ignored and
    /// missing keys keep their defaults.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                SETTING_ENABLE_PASSWORD_LOGIN => settings.enable_password_login = value == "true",
                SETTING_ENABLE_OIDC_LOGIN => settings.enable_oidc_login = value == "true",
                SETTING_ENABLE_OIDC_AUTO_PROVISION => {
                    settings.enable_oidc_auto_provision = value == "true";
                }
                SETTING_OIDC_USERNAME_CLAIM if !value.is_empty() => {
                    settings.oidc_username_claim = value.to_string();
                }
                SETTING_OIDC_GROUP_CLAIM if !value.is_empty() => {
                    settings.oidc_group_claim = value.to_string();
                }
                SETTING_OIDC_REQUIRED_GROUPS => settings.oidc_required_groups = split_groups(value),
                SETTING_OIDC_ISSUER => settings.oidc_issuer = non_empty(Some(value.to_string())),
                SETTING_OIDC_CLIENT_ID => {
                    settings.oidc_client_id = non_empty(Some(value.to_string()));
                }
                SETTING_OIDC_CLIENT_SECRET => {
                    settings.oidc_client_secret = non_empty(Some(value.to_string()));
                }
                _ => {}
            }
        }
        settings
    }

    /// Flatten into key/value rows for storage.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                SETTING_ENABLE_PASSWORD_LOGIN,
                self.enable_password_login.to_string(),
            ),
            (SETTING_ENABLE_OIDC_LOGIN, self.enable_oidc_login.to_string()),
            (
                SETTING_ENABLE_OIDC_AUTO_PROVISION,
                self.enable_oidc_auto_provision.to_string(),
            ),
            (SETTING_OIDC_USERNAME_CLAIM, self.oidc_username_claim.clone()),
            (SETTING_OIDC_GROUP_CLAIM, self.oidc_group_claim.clone()),
            (
                SETTING_OIDC_REQUIRED_GROUPS,
                self.oidc_required_groups.join(","),
            ),
            (
                SETTING_OIDC_ISSUER,
                self.oidc_issuer.clone().unwrap_or_default(),
            ),
            (
                SETTING_OIDC_CLIENT_ID,
                self.oidc_client_id.clone().unwrap_or_default(),
            ),
            (
                SETTING_OIDC_CLIENT_SECRET,
                self.oidc_client_secret.clone().unwrap_or_default(),
            ),
        ]
    }
}

fn split_groups(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|group| !group.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Partial settings update. `None` leaves a field untouched; an empty string
/// clears an optional field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettingsUpdate {
    pub enable_password_login: Option<bool>,
    pub enable_oidc_login: Option<bool>,
    pub enable_oidc_auto_provision: Option<bool>,
    pub oidc_username_claim: Option<String>,
    pub oidc_group_claim: Option<String>,
    pub oidc_required_groups: Option<Vec<String>>,
    pub oidc_issuer: Option<String>,
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<String>,
}

impl AuthSettingsUpdate {
    pub fn apply(&self, settings: &mut AuthSettings) {
        if let Some(value) = self.enable_password_login {
            settings.enable_password_login = value;
        }
        if let Some(value) = self.enable_oidc_login {
            settings.enable_oidc_login = value;
        }
        if let Some(value) = self.enable_oidc_auto_provision {
            settings.enable_oidc_auto_provision = value;
        }
        if let Some(value) = non_empty(self.oidc_username_claim.clone()) {
            settings.oidc_username_claim = value;
        }
        if let Some(value) = non_empty(self.oidc_group_claim.clone()) {
            settings.oidc_group_claim = value;
        }
        if let Some(groups) = &self.oidc_required_groups {
            settings.oidc_required_groups = split_groups(&groups.join(","));
        }
        if let Some(value) = &self.oidc_issuer {
            settings.oidc_issuer = non_empty(Some(value.clone()));
        }
        if let Some(value) = &self.oidc_client_id {
            settings.oidc_client_id = non_empty(Some(value.clone()));
        }
        if let Some(value) = &self.oidc_client_secret {
            settings.oidc_client_secret = non_empty(Some(value.clone()));
        }
    }
}

/// Counts of records moved by an account merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub moved_clients: u64,
    pub moved_authenticators: u64,
}
