//! Software passkeys and verifier doubles for driving ceremonies in tests.

use super::verifier::{CeremonyVerifier, VerifiedAssertion, WebauthnVerifier};
use anyhow::{Result, anyhow};
use std::sync::Mutex;
use url::Url;
use uuid::Uuid;
use webauthn_authenticator_rs::WebauthnAuthenticator;
use webauthn_authenticator_rs::softpasskey::SoftPasskey;
use webauthn_rs::prelude::{
    CreationChallengeResponse, CredentialID, Passkey, PasskeyAuthentication, PasskeyRegistration,
    PublicKeyCredential, RegisterPublicKeyCredential, RequestChallengeResponse, Webauthn,
    WebauthnBuilder, WebauthnError,
};

pub(crate) const ORIGIN: &str = "http://localhost:3000";

pub(crate) fn webauthn() -> Result<Webauthn> {
    let origin = Url::parse(ORIGIN)?;
    Ok(WebauthnBuilder::new("localhost", &origin)?
        .rp_name("OAuth Simulator")
        .build()?)
}

/// A software passkey that answers ceremonies as if it ran in a browser at `origin`.
pub(crate) struct SoftDevice {
    inner: WebauthnAuthenticator<SoftPasskey>,
    origin: Url,
}

pub(crate) fn soft_passkey() -> SoftDevice {
    soft_passkey_at(ORIGIN)
}

pub(crate) fn soft_passkey_at(origin: &str) -> SoftDevice {
    SoftDevice {
        inner: WebauthnAuthenticator::new(SoftPasskey::new(true)),
        origin: Url::parse(origin).unwrap_or_else(|_| panic!("bad test origin {origin}")),
    }
}

impl SoftDevice {
    pub fn register(
        &mut self,
        options: CreationChallengeResponse,
    ) -> Result<RegisterPublicKeyCredential> {
        self.inner
            .do_registration(self.origin.clone(), options)
            .map_err(|err| anyhow!("soft passkey registration failed: {err:?}"))
    }

    pub fn authenticate(&mut self, options: RequestChallengeResponse) -> Result<PublicKeyCredential> {
        self.inner
            .do_authentication(self.origin.clone(), options)
            .map_err(|err| anyhow!("soft passkey authentication failed: {err:?}"))
    }
}

/// Real verification, but reports whatever counter the test sets.
pub(crate) struct ReportedCounter {
    inner: WebauthnVerifier,
    counter: Mutex<Option<u32>>,
}

impl ReportedCounter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            inner: WebauthnVerifier::new("localhost", "OAuth Simulator", ORIGIN)?,
            counter: Mutex::new(None),
        })
    }

    pub fn report(&self, counter: u32) {
        *self.counter.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(counter);
    }
}

impl CeremonyVerifier for ReportedCounter {
    fn start_registration(
        &self,
        user_id: Uuid,
        username: &str,
        exclude: Vec<CredentialID>,
    ) -> Result<(CreationChallengeResponse, PasskeyRegistration), WebauthnError> {
        self.inner.start_registration(user_id, username, exclude)
    }

    fn finish_registration(
        &self,
        response: &RegisterPublicKeyCredential,
        state: &PasskeyRegistration,
    ) -> Result<Passkey, WebauthnError> {
        self.inner.finish_registration(response, state)
    }

    fn start_authentication(
        &self,
        passkeys: &[Passkey],
    ) -> Result<(RequestChallengeResponse, PasskeyAuthentication), WebauthnError> {
        self.inner.start_authentication(passkeys)
    }

    fn finish_authentication(
        &self,
        response: &PublicKeyCredential,
        state: &PasskeyAuthentication,
    ) -> Result<VerifiedAssertion, WebauthnError> {
        let mut verified = self.inner.finish_authentication(response, state)?;
        if let Some(counter) = *self.counter.lock().unwrap_or_else(std::sync::PoisonError::into_inner) {
            verified.counter = counter;
        }
        Ok(verified)
    }
}
