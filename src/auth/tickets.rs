//! Pending-login tickets binding a verified password to the following MFA step.

use super::utils::{hash_token, random_token};
use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const DEFAULT_MFA_TICKET_TTL: Duration = Duration::from_secs(5 * 60);

struct PendingMfa {
    user_id: Uuid,
    created_at: Instant,
}

/// In-memory table of outstanding tickets, keyed by `sha256(ticket)`.
pub struct MfaTickets {
    ttl: Duration,
    pending: Mutex<HashMap<Vec<u8>, PendingMfa>>,
}

impl MfaTickets {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a ticket for `user_id`, pruning expired entries on the way.
    ///
    /// # Errors
    /// Returns an error if the random source fails.
    pub async fn issue(&self, user_id: Uuid) -> Result<String> {
        let ticket = random_token()?;
        let mut pending = self.pending.lock().await;
        pending.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        pending.insert(
            hash_token(&ticket),
            PendingMfa {
                user_id,
                created_at: Instant::now(),
            },
        );
        Ok(ticket)
    }

    /// Consume a ticket. It is removed whether or not it is still valid.
    pub async fn take(&self, ticket: &str) -> Option<Uuid> {
        let mut pending = self.pending.lock().await;
        if let Some(entry) = pending.remove(&hash_token(ticket))
            && entry.created_at.elapsed() < self.ttl
        {
            Some(entry.user_id)
        } else {
            None
        }
    }
}

impl Default for MfaTickets {
    fn default() -> Self {
        Self::new(DEFAULT_MFA_TICKET_TTL)
    }
}
