//! Outbound HTTP client shared by discovery, JWKS and token requests.

use crate::APP_USER_AGENT;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the client used for every call to an identity provider.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

/// Truncate an upstream body so error messages stay readable.
#[must_use]
pub fn snippet(body: &str) -> String {
    const MAX: usize = 2048;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// A provider document and when it was fetched.
pub struct Fetched<T> {
    pub value: T,
    pub fetched_at: Instant,
}

impl<T> Fetched<T> {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Insert a freshly fetched document. Stale entries are pruned first; if the
/// map is still at `max`, the oldest entry makes room.
pub fn cache_insert<T>(
    entries: &mut HashMap<String, Fetched<T>>,
    key: &str,
    value: T,
    ttl: Duration,
    max: usize,
) {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_fresh(ttl));
    if entries.len() < before {
        debug!(expired = before - entries.len(), "pruned stale cache entries");
    }
    if entries.len() >= max && !entries.contains_key(key) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.fetched_at)
            .map(|(key, _)| key.clone());
        if let Some(oldest) = oldest {
            entries.remove(&oldest);
        }
    }
    entries.insert(
        key.to_string(),
        Fetched {
            value,
            fetched_at: Instant::now(),
        },
    );
}
