//! The seam between the ceremony engine and `webauthn-rs`.
//!
//! Production goes through [`WebauthnVerifier`]; tests can wrap it to shape what
//! an authenticator reports.

use anyhow::{Context, Result};
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::{
    AuthenticationResult, CreationChallengeResponse, CredentialID, Passkey,
    PasskeyAuthentication, PasskeyRegistration, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse, Webauthn, WebauthnBuilder, WebauthnError,
};

/// A verified assertion plus the counter the authenticator reported.
#[derive(Debug)]
pub struct VerifiedAssertion {
    pub counter: u32,
    pub result: AuthenticationResult,
}

pub trait CeremonyVerifier: Send + Sync {
    /// Creation options and the state needed to finish them.
    ///
    /// # Errors
    /// Returns the `webauthn-rs` error if the options cannot be built.
    fn start_registration(
        &self,
        user_id: Uuid,
        username: &str,
        exclude: Vec<CredentialID>,
    ) -> Result<(CreationChallengeResponse, PasskeyRegistration), WebauthnError>;

    /// # Errors
    /// Any mismatch against the stored state (challenge, origin, RP id, flags).
    fn finish_registration(
        &self,
        response: &RegisterPublicKeyCredential,
        state: &PasskeyRegistration,
    ) -> Result<Passkey, WebauthnError>;

    /// # Errors
    /// Returns the `webauthn-rs` error if `passkeys` is empty or unusable.
    fn start_authentication(
        &self,
        passkeys: &[Passkey],
    ) -> Result<(RequestChallengeResponse, PasskeyAuthentication), WebauthnError>;

    /// # Errors
    /// Any mismatch against the stored state or a bad signature.
    fn finish_authentication(
        &self,
        response: &PublicKeyCredential,
        state: &PasskeyAuthentication,
    ) -> Result<VerifiedAssertion, WebauthnError>;
}

/// `webauthn-rs` bound to one relying party and origin.
pub struct WebauthnVerifier {
    webauthn: Webauthn,
}

impl WebauthnVerifier {
    /// # Errors
    /// Returns an error if `origin` is not a URL or `rp_id` is not its effective domain.
    pub fn new(rp_id: &str, rp_name: &str, origin: &str) -> Result<Self> {
        let origin = Url::parse(origin).with_context(|| format!("Invalid passkey origin: {origin}"))?;
        let webauthn = WebauthnBuilder::new(rp_id, &origin)
            .with_context(|| format!("RP id {rp_id} does not match origin {origin}"))?
            .rp_name(rp_name)
            .build()
            .context("Failed to build WebAuthn relying party")?;
        Ok(Self { webauthn })
    }
}

impl CeremonyVerifier for WebauthnVerifier {
    fn start_registration(
        &self,
        user_id: Uuid,
        username: &str,
        exclude: Vec<CredentialID>,
    ) -> Result<(CreationChallengeResponse, PasskeyRegistration), WebauthnError> {
        let exclude = (!exclude.is_empty()).then_some(exclude);
        self.webauthn
            .start_passkey_registration(user_id, username, username, exclude)
    }

    fn finish_registration(
        &self,
        response: &RegisterPublicKeyCredential,
        state: &PasskeyRegistration,
    ) -> Result<Passkey, WebauthnError> {
        self.webauthn.finish_passkey_registration(response, state)
    }

    fn start_authentication(
        &self,
        passkeys: &[Passkey],
    ) -> Result<(RequestChallengeResponse, PasskeyAuthentication), WebauthnError> {
        self.webauthn.start_passkey_authentication(passkeys)
    }

    fn finish_authentication(
        &self,
        response: &PublicKeyCredential,
        state: &PasskeyAuthentication,
    ) -> Result<VerifiedAssertion, WebauthnError> {
        let result = self.webauthn.finish_passkey_authentication(response, state)?;
        Ok(VerifiedAssertion {
            counter: result.counter(),
            result,
        })
    }
}
