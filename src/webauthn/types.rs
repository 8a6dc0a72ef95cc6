//! Ceremony state persisted on the user record between `begin_*` and `finish_*`.

use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::{PasskeyAuthentication, PasskeyRegistration};

/// The `webauthn-rs` state of the ceremony in flight.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "lowercase")]
pub enum Ceremony {
    Registration(PasskeyRegistration),
    Authentication(PasskeyAuthentication),
}

impl Ceremony {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Registration(_) => "registration",
            Self::Authentication(_) => "authentication",
        }
    }
}

/// Stored in `users.current_challenge` as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingCeremony {
    pub ceremony: Ceremony,
    pub expires_at: i64,
}

impl PendingCeremony {
    /// # Errors
    /// Returns an error if the state cannot be serialized.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// `None` for anything that is not a pending ceremony.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
