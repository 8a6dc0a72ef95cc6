//! Passkey (`WebAuthn`) ceremonies.
//!
//! Flow Overview:
//! 1) `begin_*` asks `webauthn-rs` for options and persists the serialized
//!    ceremony state on the user record.
//! 2) `finish_*` takes that state off the record in one store call, so a state is
//!    consumed by exactly one verification attempt.
//! 3) Registration stores the credential; authentication advances the counter
//!    with a conditional update and mints a session.
//!
//! A missing or expired ceremony is a [`PasskeyError`]. A response that fails
//! verification is a [`CeremonyOutcome::Rejected`].

use thiserror::Error;
use webauthn_rs::prelude::WebauthnError;

mod engine;
#[cfg(test)]
pub(crate) mod test_support;
pub mod types;
pub mod verifier;

pub use engine::{PasskeyConfig, PasskeyEngine};
pub use types::{Ceremony, PendingCeremony};
pub use verifier::{CeremonyVerifier, VerifiedAssertion, WebauthnVerifier};

/// Why a response failed verification.
#[derive(Debug, Error)]
pub enum CeremonyError {
    #[error("{0}")]
    Webauthn(#[from] WebauthnError),
    #[error("signature counter did not advance ({received} <= {stored})")]
    CounterRegression { stored: u32, received: u32 },
    #[error("credential already registered")]
    CredentialAlreadyRegistered,
    #[error("unknown credential")]
    UnknownCredential,
}

/// Ceremony sequencing and lookup failures.
#[derive(Debug, Error)]
pub enum PasskeyError {
    #[error("User not found")]
    UserNotFound,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("No passkeys registered for this account")]
    NoPasskeys,
    #[error("No passkey ceremony in progress")]
    NoChallenge,
    #[error("Challenge expired, please try again")]
    ChallengeExpired,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug)]
pub enum CeremonyOutcome<T> {
    Verified(T),
    Rejected(CeremonyError),
}
