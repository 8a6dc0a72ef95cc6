//! Local password login, TOTP second factor and enrollment.
//!
//! `login` moves an attempt from awaiting credentials to one of
//! authenticated, awaiting MFA, or rejected. The awaiting-MFA state is carried by
//! an opaque ticket held in [`MfaTickets`]; `login_with_mfa` consumes it.

use crate::session::Session;
use thiserror::Error;

mod engine;
pub mod password;
pub mod tickets;
pub mod totp;
pub mod utils;

pub use engine::PasswordAuth;
pub use tickets::MfaTickets;
pub use totp::{TotpConfig, TotpEnrollment};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user and wrong password share this message.
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("Invalid MFA code")]
    InvalidMfaCode,
    #[error("MFA is not enabled for this account")]
    MfaNotEnabled,
    #[error("MFA session expired, please log in again")]
    MfaTicketExpired,
    #[error("Username already taken")]
    UsernameTaken,
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Username and password are required")]
    MissingCredentials,
    #[error("Password login is disabled")]
    PasswordLoginDisabled,
    #[error("User not found")]
    UserNotFound,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

/// Result of the first login step.
#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated(Session),
    /// Password accepted; resubmit with the ticket and a TOTP code.
    MfaRequired { ticket: String },
}
