//! Authorization-code flows waiting for the provider's redirect.

use crate::auth::utils::{hash_token, random_token};
use anyhow::Result;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_FLOW_TTL: Duration = Duration::from_secs(10 * 60);

/// Which client (and whose) a `state` value was minted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingFlow {
    pub owner_id: Uuid,
    pub client_id: Uuid,
}

struct Entry {
    flow: PendingFlow,
    created_at: Instant,
}

/// `sha256(state)` to pending flow. Entries are single use.
pub struct PendingFlows {
    ttl: Duration,
    entries: Mutex<HashMap<Vec<u8>, Entry>>,
}

impl PendingFlows {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh `state` for `flow`.
    ///
    /// # Errors
    /// Returns an error if the random source fails.
    pub async fn register(&self, flow: PendingFlow) -> Result<String> {
        let state = random_token()?;
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        if entries.len() < before {
            debug!(expired = before - entries.len(), "pruned stale pending flows");
        }
        entries.insert(
            hash_token(&state),
            Entry {
                flow,
                created_at: Instant::now(),
            },
        );
        Ok(state)
    }

    /// Resolve and forget `state`.
    pub async fn take(&self, state: &str) -> Option<PendingFlow> {
        let entry = self.entries.lock().await.remove(&hash_token(state))?;
        (entry.created_at.elapsed() < self.ttl).then_some(entry.flow)
    }
}

impl Default for PendingFlows {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW_TTL)
    }
}
