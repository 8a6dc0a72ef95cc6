//! RFC 6238 codes: SHA1, 6 digits, 30 second step, one step of skew.

use anyhow::{Result, anyhow};
use serde::Serialize;
use totp_rs::{Algorithm, Secret, TOTP};
use utoipa::ToSchema;

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Candidate secret shown to the user during enrollment. Not persisted until confirmed.
#[derive(Clone, Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotpEnrollment {
    pub secret: String,
    pub uri: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
}

#[derive(Clone, Debug)]
pub struct TotpConfig {
    issuer: String,
}

impl TotpConfig {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        // The otpauth label uses ':' as a separator, so it cannot appear in the issuer.
        Self {
            issuer: issuer.into().replace(':', " "),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn build(&self, secret_base32: &str, account: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.trim().to_uppercase())
            .to_bytes()
            .map_err(|e| anyhow!("invalid TOTP secret: {e}"))?;
        self.build_raw(secret_bytes, account)
    }

    fn build_raw(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.replace(':', " "),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    /// Generate a new random secret and its provisioning URI for `account`.
    ///
    /// # Errors
    /// Returns an error if secret generation or QR rendering fails.
    pub fn generate(&self, account: &str) -> Result<TotpEnrollment> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("TOTP secret error: {e}"))?;
        let totp = self.build_raw(secret_bytes, account)?;
        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR gen error: {e}"))?;
        Ok(TotpEnrollment {
            secret: totp.get_secret_base32(),
            uri: totp.get_url(),
            qr_code: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Check `code` against `secret_base32` at the current time.
    /// Invalid secrets and malformed codes simply do not verify.
    #[must_use]
    pub fn verify(&self, secret_base32: &str, code: &str) -> bool {
        self.build(secret_base32, "user")
            .is_ok_and(|totp| totp.check_current(code.trim()).unwrap_or(false))
    }

    /// Check `code` at an explicit UNIX time.
    #[must_use]
    pub fn verify_at(&self, secret_base32: &str, code: &str, unix_time: u64) -> bool {
        self.build(secret_base32, "user")
            .is_ok_and(|totp| totp.check(code.trim(), unix_time))
    }

    /// Produce the code for `secret_base32` at `unix_time`.
    ///
    /// # Errors
    /// Returns an error if the secret is not valid base32.
    pub fn code_at(&self, secret_base32: &str, unix_time: u64) -> Result<String> {
        Ok(self.build(secret_base32, "user")?.generate(unix_time))
    }
}
