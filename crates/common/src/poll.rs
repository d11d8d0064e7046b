//! Bounded fixed-interval polling.
//!
//! [`Poller`] hands out attempt numbers and sleeps between them; the caller
//! performs the actual status check inline. This leaves the check free to
//! borrow whatever it needs mutably, which a closure-based API cannot do
//! across awaits.
//!
//! ```ignore
//! let mut poller = Poller::new(PollPolicy::default(), cancel.clone());
//! while let Some(attempt) = poller.next_attempt().await? {
//!     if check_status(&mut order).await? == Status::Valid {
//!         return Ok(());
//!     }
//! }
//! Err(timeout(poller.attempts()))
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default wait between attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Fixed-interval retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between two consecutive attempts
    pub interval: Duration,
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Create a policy
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Reasons a poll stops without the caller's check succeeding
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PollError {
    /// The cancellation token fired while waiting
    #[error("polling cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts already performed
        attempts: u32,
    },
}

/// Hands out attempt numbers under a [`PollPolicy`]
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    cancel: CancellationToken,
    attempts: u32,
    started: Instant,
}

impl Poller {
    /// Create a poller; the first attempt is granted without waiting
    pub fn new(policy: PollPolicy, cancel: CancellationToken) -> Self {
        Self {
            policy,
            cancel,
            attempts: 0,
            started: Instant::now(),
        }
    }

    /// Wait for the next attempt slot.
    ///
    /// Returns `Ok(Some(n))` with the 1-based attempt number, sleeping
    /// `interval` first for every attempt after the first. Returns
    /// `Ok(None)` once `max_attempts` have been handed out.
    pub async fn next_attempt(&mut self) -> Result<Option<u32>, PollError> {
        if self.cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                attempts: self.attempts,
            });
        }

        if self.attempts >= self.policy.max_attempts {
            return Ok(None);
        }

        if self.attempts > 0 {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(PollError::Cancelled { attempts: self.attempts });
                }
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
        }

        self.attempts += 1;
        trace!(
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Poll attempt"
        );
        Ok(Some(self.attempts))
    }

    /// Attempts handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the poller was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
