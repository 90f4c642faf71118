//! Shared storage abstraction for the adaptive security layer
//!
//! Every component that keeps mutable security state (token blacklist,
//! failed-attempt counters, rate-limit windows, IP locks, the security event
//! index) talks to a [`GuardStore`] instead of a concrete backend. Two
//! backends ship:
//!
//! - [`MemoryStore`]: in-process concurrent map for single-instance
//!   deployments
//! - [`RedisStore`]: shared Redis for horizontally scaled deployments, where
//!   counters must be consistent across instances
//!
//! The backend is selected by configuration at startup, not by branching in
//! component code.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Store handle shared across request handlers and background tasks.
pub type SharedStore = Arc<dyn GuardStore>;

/// Key-value + ordered-index operations needed by the security components.
///
/// Callers decide their own fail-open/fail-closed policy when an operation
/// returns [`StoreError`]; the store never swallows failures.
#[async_trait]
pub trait GuardStore: Send + Sync {
    /// Store a value, optionally expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Fetch a value. Expired records are treated as absent.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete a key. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Whether a live (non-expired) record exists under `key`.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Increment a counter, creating it with `ttl` on first increment.
    /// Returns the new count.
    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<u64>;

    /// Sliding-window admission: prune members scored at or before
    /// `now_ms - window_ms`, insert `member` at `now_ms`, refresh the key
    /// expiry to the window length, and return the resulting member count.
    ///
    /// The prune-insert-count sequence executes as a single atomic unit per
    /// key, so two concurrent requests on the same key can never both
    /// observe the pre-insert count.
    async fn window_admit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        member: &str,
    ) -> StoreResult<u64>;

    /// Remove a member previously inserted by [`GuardStore::window_admit`].
    /// Used by callers that reject a request after admission, so denied
    /// requests do not consume window budget.
    async fn window_discard(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Add a member to a score-ordered index (score = unix milliseconds).
    async fn index_add(&self, key: &str, score_ms: i64, member: &str) -> StoreResult<()>;

    /// Members with `min_ms <= score <= max_ms`, in ascending score order.
    async fn index_range(&self, key: &str, min_ms: i64, max_ms: i64) -> StoreResult<Vec<String>>;

    /// Remove members scored strictly below `cutoff_ms`. Returns the number
    /// removed.
    async fn index_remove_below(&self, key: &str, cutoff_ms: i64) -> StoreResult<u64>;

    /// All live keys starting with `prefix`. Used by periodic sweeps only,
    /// never on the request path.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Current time as unix milliseconds, the score unit for every index.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
