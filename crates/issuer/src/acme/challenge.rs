//! HTTP-01 ACME challenge store
//!
//! Holds pending token -> key authorization pairs for serving via
//! `/.well-known/acme-challenge/<token>`. Entries expire on their own after
//! [`CHALLENGE_TTL`], so an abandoned run never leaves a token answerable.

use std::time::Duration;

use certmint_common::TtlCache;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// How long a published challenge stays answerable
pub const CHALLENGE_TTL: Duration = Duration::from_secs(15 * 60);

/// Pending HTTP-01 challenges
///
/// Written by the issuance run, read concurrently by the challenge responder.
/// Clones share the same entries.
#[derive(Debug, Clone)]
pub struct ChallengeStore {
    challenges: TtlCache<String, String>,
    ttl: Duration,
}

impl ChallengeStore {
    /// Create an empty store with the standard TTL
    pub fn new() -> Self {
        Self::with_ttl(CHALLENGE_TTL)
    }

    /// Create an empty store with a custom TTL
    pub(crate) fn with_ttl(ttl: Duration) -> Self {
        Self {
            challenges: TtlCache::new(),
            ttl,
        }
    }

    /// Create a store and start a background sweeper purging expired tokens.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_sweeper(period: Duration) -> (Self, JoinHandle<()>) {
        let store = Self::new();
        let sweeper = store.challenges.spawn_sweeper(period);
        (store, sweeper)
    }

    /// Publish the key authorization for `token`.
    ///
    /// Re-publishing a token overwrites its value and restarts its TTL.
    pub fn put(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, ttl_secs = self.ttl.as_secs(), "Registering ACME HTTP-01 challenge");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string(), self.ttl);
    }

    /// Key authorization for `token`, if published and not expired
    pub fn get(&self, token: &str) -> Option<String> {
        let result = self.challenges.get(token);
        if result.is_some() {
            trace!(token = %token, "ACME challenge token found");
        } else {
            trace!(token = %token, "ACME challenge token not found");
        }
        result
    }

    /// Withdraw a completed challenge
    pub fn remove(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Removed ACME challenge");
        }
    }

    /// Entries currently held, including expired ones not yet purged
    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}
