//! Common utilities shared by the certmint crates.
//!
//! - [`TtlCache`]: concurrent map whose entries expire after a time-to-live
//! - [`PollPolicy`] / [`Poller`]: fixed-interval, bounded-attempt polling
//!
//! Both read time through `tokio::time`, so tests can drive them with a
//! paused clock instead of real delays.

pub mod poll;
pub mod ttl_cache;

pub use poll::{PollError, PollPolicy, Poller, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
pub use ttl_cache::TtlCache;
