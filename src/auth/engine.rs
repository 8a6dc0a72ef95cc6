use super::{
    AuthError, LoginOutcome, MfaTickets, TotpConfig, TotpEnrollment,
    password::{hash_password, verify_password},
};
use crate::session::{Session, SessionService};
use crate::store::{CredentialStore, User, UserInsert};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct PasswordAuth {
    store: Arc<dyn CredentialStore>,
    sessions: Arc<SessionService>,
    totp: TotpConfig,
    tickets: MfaTickets,
}

impl PasswordAuth {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        sessions: Arc<SessionService>,
        totp: TotpConfig,
        tickets: MfaTickets,
    ) -> Self {
        Self {
            store,
            sessions,
            totp,
            tickets,
        }
    }

    #[must_use]
    pub fn totp(&self) -> &TotpConfig {
        &self.totp
    }

    /// First login step.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown user or a wrong password, `AccountDisabled`
    /// for a disabled account, `PasswordLoginDisabled` when settings turn password login off.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        if !self.store.get_auth_settings().await?.enable_password_login {
            return Err(AuthError::PasswordLoginDisabled);
        }
        let Some(user) = self.store.get_user_by_username(username).await? else {
            // Burn a hash comparison so unknown users cost the same as known ones.
            let _ = verify_password(password, DUMMY_HASH);
            return Err(AuthError::InvalidCredentials);
        };
        if user.disabled {
            return Err(AuthError::AccountDisabled);
        }
        if !verify_password(password, &user.password_hash) {
            warn!(user_id = %user.id, "password login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        if user.mfa_enabled() {
            let ticket = self.tickets.issue(user.id).await?;
            return Ok(LoginOutcome::MfaRequired { ticket });
        }
        info!(user_id = %user.id, "password login succeeded");
        Ok(LoginOutcome::Authenticated(
            self.sessions.create_session(&user)?,
        ))
    }

    /// Second login step. The ticket is consumed even when the code is wrong.
    ///
    /// # Errors
    /// `MfaTicketExpired` for an unknown, used or stale ticket, `InvalidCredentials`
    /// when the ticket belongs to another user, `InvalidMfaCode` for a wrong code.
    #[instrument(skip(self, ticket, code))]
    pub async fn login_with_mfa(
        &self,
        username: &str,
        ticket: &str,
        code: &str,
    ) -> Result<Session, AuthError> {
        let user_id = self
            .tickets
            .take(ticket)
            .await
            .ok_or(AuthError::MfaTicketExpired)?;
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .filter(|user| user.username == username)
            .ok_or(AuthError::InvalidCredentials)?;
        if user.disabled {
            return Err(AuthError::AccountDisabled);
        }
        let secret = user
            .totp_secret
            .as_deref()
            .ok_or(AuthError::MfaNotEnabled)?;
        if !self.totp.verify(secret, code) {
            warn!(user_id = %user.id, "MFA code rejected");
            return Err(AuthError::InvalidMfaCode);
        }
        info!(user_id = %user.id, "MFA login succeeded");
        Ok(self.sessions.create_session(&user)?)
    }

    /// Create an account and log it in.
    ///
    /// # Errors
    /// `PasswordMismatch` and `MissingCredentials` are returned before the store is touched.
    #[instrument(skip(self, password, confirm_password))]
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Session, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        let hash = hash_password(password)?;
        match self.store.create_user(username, &hash, None).await? {
            UserInsert::Created(user) => {
                info!(user_id = %user.id, "user registered");
                Ok(self.sessions.create_session(&user)?)
            }
            UserInsert::UsernameTaken => Err(AuthError::UsernameTaken),
        }
    }

    /// Candidate secret for `user`. Nothing is stored.
    ///
    /// # Errors
    /// Returns an error if secret or QR generation fails.
    pub fn generate_totp_secret(&self, user: &User) -> Result<TotpEnrollment, AuthError> {
        Ok(self.totp.generate(&user.username)?)
    }

    /// Persist `secret` only if `code` verifies against it. Returns whether it did.
    ///
    /// # Errors
    /// `UserNotFound` if the user is gone.
    pub async fn confirm_totp_enrollment(
        &self,
        user_id: Uuid,
        secret: &str,
        code: &str,
    ) -> Result<bool, AuthError> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !self.totp.verify(secret, code) {
            return Ok(false);
        }
        let secret = secret.trim().to_uppercase();
        self.store
            .update_user_totp_secret(user.id, Some(&secret))
            .await?;
        info!(user_id = %user.id, "TOTP enrolled");
        Ok(true)
    }

    /// # Errors
    /// `UserNotFound` if the user is gone.
    pub async fn disable_totp(&self, user_id: Uuid) -> Result<(), AuthError> {
        if self.store.get_user_by_id(user_id).await?.is_none() {
            return Err(AuthError::UserNotFound);
        }
        self.store.update_user_totp_secret(user_id, None).await?;
        info!(user_id = %user_id, "TOTP removed");
        Ok(())
    }

    /// # Errors
    /// `InvalidCredentials` when `current_password` is wrong.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        if new_password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if new_password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        let user = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !verify_password(current_password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        let hash = hash_password(new_password)?;
        self.store.update_user_password(user.id, &hash).await?;
        info!(user_id = %user.id, "password changed");
        Ok(())
    }
}

/// Valid argon2id hash of a random string, used to equalize timing for unknown users.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$K6bpyq0Ud7RfoQZ8dkcwWmTXhbBt+o0Ec9CAmrWbe9U";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCodec;
    use crate::store::{AuthSettings, MemoryStore};
    use crate::unix_now;
    use anyhow::{Result, anyhow};
    use secrecy::SecretString;

    struct Harness {
        store: Arc<MemoryStore>,
        sessions: Arc<SessionService>,
        auth: PasswordAuth,
    }

    fn harness_with(settings: AuthSettings) -> Result<Harness> {
        let store = Arc::new(MemoryStore::with_settings(settings));
        let codec = SessionCodec::new(
            &SecretString::from("0123456789abcdef0123456789abcdef"),
            3600,
        )?;
        let sessions = Arc::new(SessionService::new(codec, store.clone()));
        let auth = PasswordAuth::new(
            store.clone(),
            sessions.clone(),
            TotpConfig::new("OAuth Simulator"),
            MfaTickets::default(),
        );
        Ok(Harness {
            store,
            sessions,
            auth,
        })
    }

    fn harness() -> Result<Harness> {
        harness_with(AuthSettings::default())
    }

    fn now() -> u64 {
        u64::try_from(unix_now()).unwrap_or_default()
    }

    async fn enroll_mfa(h: &Harness, username: &str) -> Result<String> {
        let user = h
            .store
            .get_user_by_username(username)
            .await?
            .ok_or_else(|| anyhow!("missing user"))?;
        let enrollment = h.auth.generate_totp_secret(&user)?;
        let code = h.auth.totp().code_at(&enrollment.secret, now())?;
        assert!(
            h.auth
                .confirm_totp_enrollment(user.id, &enrollment.secret, &code)
                .await?
        );
        Ok(enrollment.secret)
    }

    #[tokio::test]
    async fn register_then_login() -> Result<()> {
        let h = harness()?;
        let session = h.auth.register("alice", "pw", "pw").await?;
        assert_eq!(session.user.username, "alice");
        assert!(h.sessions.is_authenticated(Some(&session.token)).await);

        let outcome = h.auth.login("alice", "pw").await?;
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
        Ok(())
    }

    #[tokio::test]
    async fn register_mismatch_touches_nothing() -> Result<()> {
        let h = harness()?;
        let err = h.auth.register("alice", "pw", "other").await;
        assert!(matches!(err, Err(AuthError::PasswordMismatch)));
        assert!(h.store.list_users().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() -> Result<()> {
        let h = harness()?;
        h.auth.register("alice", "pw", "pw").await?;
        let err = h.auth.register("alice", "pw2", "pw2").await;
        assert!(matches!(err, Err(AuthError::UsernameTaken)));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() -> Result<()> {
        let h = harness()?;
        h.auth.register("alice", "pw", "pw").await?;

        let unknown = h.auth.login("bob", "pw").await;
        let wrong = h.auth.login("alice", "nope").await;
        let (Err(unknown), Err(wrong)) = (unknown, wrong) else {
            return Err(anyhow!("expected both logins to fail"));
        };
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.to_string(), "Invalid credentials");
        Ok(())
    }

    #[tokio::test]
    async fn disabled_account_has_distinct_message() -> Result<()> {
        let h = harness()?;
        let session = h.auth.register("alice", "pw", "pw").await?;
        h.store.update_user_status(session.user.id, true).await?;
        let err = h.auth.login("alice", "pw").await;
        assert!(matches!(err, Err(AuthError::AccountDisabled)));
        Ok(())
    }

    #[tokio::test]
    async fn password_login_can_be_turned_off() -> Result<()> {
        let h = harness_with(AuthSettings {
            enable_password_login: false,
            ..AuthSettings::default()
        })?;
        let err = h.auth.login("alice", "pw").await;
        assert!(matches!(err, Err(AuthError::PasswordLoginDisabled)));
        Ok(())
    }

    #[tokio::test]
    async fn mfa_login_requires_ticket_and_code() -> Result<()> {
        let h = harness()?;
        h.auth.register("alice", "pw", "pw").await?;
        let secret = enroll_mfa(&h, "alice").await?;

        let LoginOutcome::MfaRequired { ticket } = h.auth.login("alice", "pw").await? else {
            return Err(anyhow!("expected MFA step"));
        };
        let code = h.auth.totp().code_at(&secret, now())?;
        let session = h.auth.login_with_mfa("alice", &ticket, &code).await?;
        assert_eq!(session.user.username, "alice");

        // ticket already spent
        let err = h.auth.login_with_mfa("alice", &ticket, &code).await;
        assert!(matches!(err, Err(AuthError::MfaTicketExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_code_burns_the_ticket() -> Result<()> {
        let h = harness()?;
        h.auth.register("alice", "pw", "pw").await?;
        let secret = enroll_mfa(&h, "alice").await?;

        let LoginOutcome::MfaRequired { ticket } = h.auth.login("alice", "pw").await? else {
            return Err(anyhow!("expected MFA step"));
        };
        let err = h.auth.login_with_mfa("alice", &ticket, "000000x").await;
        assert!(matches!(err, Err(AuthError::InvalidMfaCode)));

        let code = h.auth.totp().code_at(&secret, now())?;
        let err = h.auth.login_with_mfa("alice", &ticket, &code).await;
        assert!(matches!(err, Err(AuthError::MfaTicketExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn ticket_is_bound_to_its_user() -> Result<()> {
        let h = harness()?;
        h.auth.register("alice", "pw", "pw").await?;
        h.auth.register("bob", "pw", "pw").await?;
        let secret = enroll_mfa(&h, "alice").await?;

        let LoginOutcome::MfaRequired { ticket } = h.auth.login("alice", "pw").await? else {
            return Err(anyhow!("expected MFA step"));
        };
        let code = h.auth.totp().code_at(&secret, now())?;
        let err = h.auth.login_with_mfa("bob", &ticket, &code).await;
        assert!(matches!(err, Err(AuthError::InvalidCredentials)));
        Ok(())
    }

    #[tokio::test]
    async fn enrollment_with_wrong_code_is_not_persisted() -> Result<()> {
        let h = harness()?;
        let session = h.auth.register("alice", "pw", "pw").await?;
        let enrollment = h.auth.generate_totp_secret(&session.user)?;

        assert!(
            !h.auth
                .confirm_totp_enrollment(session.user.id, &enrollment.secret, "12")
                .await?
        );
        let user = h.store.get_user_by_id(session.user.id).await?;
        assert!(user.is_some_and(|u| u.totp_secret.is_none()));

        h.auth.disable_totp(session.user.id).await?;
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_current() -> Result<()> {
        let h = harness()?;
        let session = h.auth.register("alice", "pw", "pw").await?;
        let err = h
            .auth
            .change_password(session.user.id, "bad", "new", "new")
            .await;
        assert!(matches!(err, Err(AuthError::InvalidCredentials)));

        h.auth
            .change_password(session.user.id, "pw", "new", "new")
            .await?;
        assert!(matches!(
            h.auth.login("alice", "new").await?,
            LoginOutcome::Authenticated(_)
        ));
        Ok(())
    }
}
