//! Shared quota store.
//!
//! All quota state lives in the store, never in the process. Every operation
//! on this port is atomic per key: that is the only ordering guarantee the
//! limiters rely on.

mod memory;
mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use crate::error::{RatewardenError, Result};

/// Token bucket state as persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Tokens left, fractional refill allowed
    pub tokens: f64,
    /// Epoch milliseconds of the last committed refill
    pub last_refill_ms: u64,
    /// Compare-and-swap token, bumped on every committed write
    pub version: u64,
}

/// Result of an atomic fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after the increment
    pub count: u64,
    /// Time until the store expires the counter
    pub resets_in: Duration,
}

/// Result of an atomic sliding-log admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingOutcome {
    /// Whether a new entry was inserted
    pub admitted: bool,
    /// Entries in the window after the operation
    pub count: u64,
    /// Timestamp of the oldest entry still in the window
    pub oldest_ms: Option<u64>,
}

/// Port for the shared store holding per-key quota state.
#[async_trait]
pub trait QuotaStore: Send + Sync + Debug {
    /// Atomically increment the counter at `key`, setting its expiry to
    /// `window` when the post-increment value is 1.
    async fn increment_window(&self, key: &str, window: Duration) -> Result<WindowCount>;

    /// Atomically prune entries scored at or before `now_ms - window`, count
    /// the rest and, when the count is below `capacity`, insert `member`
    /// scored `now_ms` and refresh the key expiry to `window`.
    async fn admit_sliding(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        capacity: u64,
        member: &str,
    ) -> Result<SlidingOutcome>;

    /// Read the token bucket state at `key`.
    async fn load_bucket(&self, key: &str) -> Result<Option<BucketState>>;

    /// Write `next` only if the stored version still equals `expected_version`
    /// (`None` meaning the key must not exist). Returns `false` on conflict.
    async fn compare_and_swap_bucket(
        &self,
        key: &str,
        expected_version: Option<u64>,
        next: &BucketState,
        ttl: Duration,
    ) -> Result<bool>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;
}

/// Run a store round trip under a deadline, mapping expiry to `StoreUnavailable`.
pub async fn with_deadline<T, F>(deadline: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RatewardenError::StoreUnavailable(format!(
            "{} exceeded deadline of {:?}",
            operation, deadline
        ))),
    }
}
