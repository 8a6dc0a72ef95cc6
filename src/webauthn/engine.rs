use super::{
    Ceremony, CeremonyError, CeremonyOutcome, CeremonyVerifier, PasskeyError, PendingCeremony,
};
use crate::session::{Session, SessionService};
use crate::store::{Authenticator, CredentialStore, DeviceType, User};
use crate::unix_now;
use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, Credential, CredentialID, Passkey, PublicKeyCredential,
    RegisterPublicKeyCredential, RequestChallengeResponse,
};

const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 300;
const DEFAULT_RP_NAME: &str = "OAuth Simulator";

#[derive(Clone, Debug)]
pub struct PasskeyConfig {
    rp_id: String,
    rp_name: String,
    origin: String,
    challenge_ttl_seconds: i64,
}

impl PasskeyConfig {
    #[must_use]
    pub fn new(rp_id: String, rp_name: String, origin: String) -> Self {
        Self {
            rp_id,
            rp_name,
            origin: origin.trim_end_matches('/').to_string(),
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
        }
    }

    /// Derive the relying party from the public URL. The origin is the URL without
    /// a trailing slash and the RP id defaults to its host.
    ///
    /// # Errors
    /// Returns an error if `public_url` is not an absolute URL with a host.
    pub fn from_public_url(
        public_url: &str,
        rp_id: Option<String>,
        rp_name: Option<String>,
    ) -> anyhow::Result<Self> {
        let url = Url::parse(public_url).with_context(|| format!("invalid public URL: {public_url}"))?;
        let host = url
            .host_str()
            .map(ToString::to_string)
            .context("public URL has no host")?;
        let origin = url.origin().ascii_serialization();
        Ok(Self::new(
            rp_id.filter(|id| !id.trim().is_empty()).unwrap_or(host),
            rp_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_RP_NAME.to_string()),
            origin,
        ))
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

pub struct PasskeyEngine {
    config: PasskeyConfig,
    store: Arc<dyn CredentialStore>,
    sessions: Arc<SessionService>,
    verifier: Arc<dyn CeremonyVerifier>,
}

impl PasskeyEngine {
    #[must_use]
    pub fn new(
        config: PasskeyConfig,
        store: Arc<dyn CredentialStore>,
        sessions: Arc<SessionService>,
        verifier: Arc<dyn CeremonyVerifier>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            verifier,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PasskeyConfig {
        &self.config
    }

    /// Creation options excluding credentials the user already has.
    ///
    /// # Errors
    /// `UserNotFound`, or an internal error if the ceremony cannot be stored.
    #[instrument(skip(self))]
    pub async fn begin_registration(
        &self,
        user_id: Uuid,
    ) -> Result<CreationChallengeResponse, PasskeyError> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(PasskeyError::UserNotFound)?;
        let exclude = self
            .store
            .get_authenticators_for_user(user.id)
            .await?
            .iter()
            .filter_map(|authenticator| URL_SAFE_NO_PAD.decode(&authenticator.credential_id).ok())
            .map(CredentialID::from)
            .collect();
        let (options, state) = self
            .verifier
            .start_registration(user.id, &user.username, exclude)
            .context("failed to start passkey registration")?;
        self.store_ceremony(&user, Ceremony::Registration(state))
            .await?;
        Ok(options)
    }

    /// # Errors
    /// `NoChallenge`/`ChallengeExpired` when no registration was begun.
    #[instrument(skip(self, response))]
    pub async fn finish_registration(
        &self,
        user_id: Uuid,
        response: &RegisterPublicKeyCredential,
    ) -> Result<CeremonyOutcome<Authenticator>, PasskeyError> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(PasskeyError::UserNotFound)?;
        let Ceremony::Registration(state) = self.take_ceremony(&user).await? else {
            return Err(PasskeyError::NoChallenge);
        };

        let passkey = match self.verifier.finish_registration(response, &state) {
            Ok(passkey) => passkey,
            Err(err) => {
                warn!(user_id = %user.id, "passkey registration rejected: {err}");
                return Ok(CeremonyOutcome::Rejected(err.into()));
            }
        };

        let credential_id = URL_SAFE_NO_PAD.encode(passkey.cred_id().as_slice());
        if self
            .store
            .get_authenticator_by_credential_id(&credential_id)
            .await?
            .is_some()
        {
            return Ok(CeremonyOutcome::Rejected(
                CeremonyError::CredentialAlreadyRegistered,
            ));
        }

        let public_key = serde_json::to_vec(&passkey).context("failed to encode passkey")?;
        let credential = Credential::from(passkey);
        let authenticator = Authenticator {
            credential_id,
            user_id: user.id,
            public_key,
            counter: credential.counter,
            device_type: if credential.backup_eligible {
                DeviceType::MultiDevice
            } else {
                DeviceType::SingleDevice
            },
            backed_up: credential.backup_state,
            transports: credential
                .transports
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(transport_name)
                .collect(),
            created_at: unix_now(),
        };
        self.store.save_authenticator(&authenticator).await?;
        info!(user_id = %user.id, "passkey registered");
        Ok(CeremonyOutcome::Verified(authenticator))
    }

    /// Request options limited to the user's registered credentials.
    ///
    /// # Errors
    /// `UserNotFound`, `AccountDisabled`, or `NoPasskeys`.
    #[instrument(skip(self))]
    pub async fn begin_authentication(
        &self,
        username: &str,
    ) -> Result<RequestChallengeResponse, PasskeyError> {
        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(PasskeyError::UserNotFound)?;
        if user.disabled {
            return Err(PasskeyError::AccountDisabled);
        }
        let passkeys: Vec<Passkey> = self
            .store
            .get_authenticators_for_user(user.id)
            .await?
            .iter()
            .filter_map(|authenticator| match decode_passkey(authenticator) {
                Ok(passkey) => Some(passkey),
                Err(err) => {
                    warn!(credential_id = %authenticator.credential_id, "skipping unreadable passkey: {err}");
                    None
                }
            })
            .collect();
        if passkeys.is_empty() {
            return Err(PasskeyError::NoPasskeys);
        }
        let (options, state) = self
            .verifier
            .start_authentication(&passkeys)
            .context("failed to start passkey authentication")?;
        self.store_ceremony(&user, Ceremony::Authentication(state))
            .await?;
        Ok(options)
    }

    /// # Errors
    /// `NoChallenge`/`ChallengeExpired` when no authentication was begun.
    #[instrument(skip(self, response))]
    pub async fn finish_authentication(
        &self,
        username: &str,
        response: &PublicKeyCredential,
    ) -> Result<CeremonyOutcome<Session>, PasskeyError> {
        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(PasskeyError::UserNotFound)?;
        let Ceremony::Authentication(state) = self.take_ceremony(&user).await? else {
            return Err(PasskeyError::NoChallenge);
        };
        if user.disabled {
            return Err(PasskeyError::AccountDisabled);
        }

        let Some(authenticator) = self
            .store
            .get_authenticator_by_credential_id(response.id.trim_end_matches('='))
            .await?
            .filter(|authenticator| authenticator.user_id == user.id)
        else {
            return Ok(CeremonyOutcome::Rejected(CeremonyError::UnknownCredential));
        };

        let verified = match self.verifier.finish_authentication(response, &state) {
            Ok(verified) => verified,
            Err(err) => {
                warn!(user_id = %user.id, "passkey authentication rejected: {err}");
                return Ok(CeremonyOutcome::Rejected(err.into()));
            }
        };
        if URL_SAFE_NO_PAD.encode(verified.result.cred_id().as_slice()) != authenticator.credential_id {
            return Ok(CeremonyOutcome::Rejected(CeremonyError::UnknownCredential));
        }

        let regression = CeremonyError::CounterRegression {
            stored: authenticator.counter,
            received: verified.counter,
        };
        if !counter_advances(authenticator.counter, verified.counter) {
            warn!(user_id = %user.id, "passkey authentication rejected: {regression}");
            return Ok(CeremonyOutcome::Rejected(regression));
        }

        let mut passkey = decode_passkey(&authenticator)?;
        passkey.update_credential(&verified.result);
        let public_key = serde_json::to_vec(&passkey).context("failed to encode passkey")?;
        // Another login may have advanced the counter since it was read.
        if !self
            .store
            .update_authenticator_counter(&authenticator.credential_id, verified.counter, &public_key)
            .await?
        {
            warn!(user_id = %user.id, "passkey authentication rejected: {regression}");
            return Ok(CeremonyOutcome::Rejected(regression));
        }
        info!(user_id = %user.id, "passkey login succeeded");
        Ok(CeremonyOutcome::Verified(
            self.sessions.create_session(&user)?,
        ))
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn list_passkeys(&self, user_id: Uuid) -> Result<Vec<Authenticator>, PasskeyError> {
        Ok(self.store.get_authenticators_for_user(user_id).await?)
    }

    /// Returns `false` if the credential does not exist or belongs to someone else.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn delete_passkey(&self, user_id: Uuid, credential_id: &str) -> Result<bool, PasskeyError> {
        let deleted = self.store.delete_authenticator(user_id, credential_id).await?;
        if deleted {
            info!(user_id = %user_id, "passkey deleted");
        }
        Ok(deleted)
    }

    async fn store_ceremony(&self, user: &User, ceremony: Ceremony) -> Result<(), PasskeyError> {
        let pending = PendingCeremony {
            ceremony,
            expires_at: unix_now() + self.config.challenge_ttl_seconds,
        };
        let encoded = pending.encode().context("failed to encode ceremony state")?;
        self.store
            .update_user_challenge(user.id, Some(&encoded))
            .await?;
        Ok(())
    }

    /// Take the pending ceremony off the user record. The store clears it in the
    /// same operation, so only one finish attempt ever sees a given state.
    async fn take_ceremony(&self, user: &User) -> Result<Ceremony, PasskeyError> {
        let pending = self
            .store
            .take_user_challenge(user.id)
            .await?
            .as_deref()
            .and_then(PendingCeremony::decode)
            .ok_or(PasskeyError::NoChallenge)?;
        if pending.is_expired(unix_now()) {
            return Err(PasskeyError::ChallengeExpired);
        }
        Ok(pending.ceremony)
    }
}

/// Both zero means the authenticator does not keep a counter.
fn counter_advances(stored: u32, received: u32) -> bool {
    received > stored || (stored == 0 && received == 0)
}

fn decode_passkey(authenticator: &Authenticator) -> anyhow::Result<Passkey> {
    serde_json::from_slice(&authenticator.public_key).context("failed to decode stored passkey")
}

/// The wire name of a transport, e.g. `internal` or `usb`.
fn transport_name(transport: &impl serde::Serialize) -> Option<String> {
    serde_json::to_value(transport)
        .ok()
        .and_then(|value| value.as_str().map(ToString::to_string))
}
