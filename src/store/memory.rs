//! In-process quota store.
//!
//! Gives the same per-key atomicity as the Redis store by serializing every
//! operation behind one mutex. Useful for single-instance deployments and
//! for driving the limiters with a [`MockClock`](crate::clock::MockClock).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{BucketState, QuotaStore, SlidingOutcome, WindowCount};
use crate::clock::Clock;
use crate::error::Result;

#[derive(Debug, Clone)]
enum Value {
    Counter(u64),
    /// (score, member) pairs kept sorted by score
    Log(Vec<(u64, String)>),
    Bucket(BucketState),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if now_ms >= at)
    }
}

/// Clock time between sweeps of expired keys.
const SWEEP_INTERVAL_MS: u64 = 60_000;
/// Map size that triggers a sweep before the interval is up.
const MIN_SWEEP_LEN: usize = 1024;

#[derive(Debug)]
struct Entries {
    map: HashMap<String, Entry>,
    last_sweep_ms: u64,
    sweep_at_len: usize,
}

impl Entries {
    /// Drop expired keys once the interval has passed or the map has doubled
    /// since the last sweep.
    fn maybe_sweep(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_sweep_ms) >= SWEEP_INTERVAL_MS
            || self.map.len() >= self.sweep_at_len
        {
            self.sweep(now_ms);
        }
    }

    fn sweep(&mut self, now_ms: u64) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now_ms));
        self.last_sweep_ms = now_ms;
        self.sweep_at_len = (self.map.len() * 2).max(MIN_SWEEP_LEN);
        before - self.map.len()
    }
}

/// Quota store held in process memory.
///
/// Expired keys are dropped when touched, and swept from the whole map on
/// writes once a minute of clock time has passed or the map has doubled.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Mutex<Entries>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create an empty store whose expiries follow `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                last_sweep_ms: now,
                sweep_at_len: MIN_SWEEP_LEN,
            }),
            clock,
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .map
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Remove every expired key now, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.entries.lock().sweep(now)
    }

    #[cfg(test)]
    fn stored_len(&self) -> usize {
        self.entries.lock().map.len()
    }

    /// Check if the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live key exists.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_millis();
        self.entries
            .lock()
            .map
            .get(key)
            .map(|e| !e.is_expired(now))
            .unwrap_or(false)
    }

    fn live_entry<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now_ms: u64,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).map(|e| e.is_expired(now_ms)).unwrap_or(false) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

fn expiry_after(now_ms: u64, ttl: Duration) -> u64 {
    now_ms.saturating_add(ttl.as_millis() as u64)
}

#[async_trait]
impl QuotaStore for InMemoryStore {
    async fn increment_window(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let now = self.clock.now_millis();
        let mut guard = self.entries.lock();
        guard.maybe_sweep(now);
        let entries = &mut guard.map;

        let (count, expires_at_ms) = match Self::live_entry(entries, key, now) {
            Some(Entry {
                value: Value::Counter(count),
                expires_at_ms,
            }) => (*count + 1, *expires_at_ms),
            _ => (1, None),
        };
        let expires_at_ms = if count == 1 {
            Some(expiry_after(now, window))
        } else {
            expires_at_ms
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Counter(count),
                expires_at_ms,
            },
        );

        let resets_in = expires_at_ms
            .map(|at| Duration::from_millis(at.saturating_sub(now)))
            .unwrap_or(window);

        Ok(WindowCount { count, resets_in })
    }

    async fn admit_sliding(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        capacity: u64,
        member: &str,
    ) -> Result<SlidingOutcome> {
        let clock_now = self.clock.now_millis();
        let mut guard = self.entries.lock();
        guard.maybe_sweep(clock_now);
        let entries = &mut guard.map;
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);

        let mut log = match Self::live_entry(entries, key, clock_now) {
            Some(Entry {
                value: Value::Log(log),
                ..
            }) => std::mem::take(log),
            _ => Vec::new(),
        };
        log.retain(|(score, _)| *score > cutoff);

        let admitted = (log.len() as u64) < capacity;
        if admitted {
            let at = log.partition_point(|(score, _)| *score <= now_ms);
            log.insert(at, (now_ms, member.to_string()));
        }
        let count = log.len() as u64;
        let oldest_ms = log.first().map(|(score, _)| *score);

        if log.is_empty() {
            entries.remove(key);
        } else {
            let previous_expiry = entries.get(key).and_then(|e| e.expires_at_ms);
            let expires_at_ms = if admitted {
                Some(expiry_after(clock_now, window))
            } else {
                previous_expiry
            };
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Log(log),
                    expires_at_ms,
                },
            );
        }

        Ok(SlidingOutcome {
            admitted,
            count,
            oldest_ms,
        })
    }

    async fn load_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        let now = self.clock.now_millis();
        let mut guard = self.entries.lock();
        Ok(match Self::live_entry(&mut guard.map, key, now) {
            Some(Entry {
                value: Value::Bucket(state),
                ..
            }) => Some(*state),
            _ => None,
        })
    }

    async fn compare_and_swap_bucket(
        &self,
        key: &str,
        expected_version: Option<u64>,
        next: &BucketState,
        ttl: Duration,
    ) -> Result<bool> {
        let now = self.clock.now_millis();
        let mut guard = self.entries.lock();
        guard.maybe_sweep(now);
        let entries = &mut guard.map;

        let current_version = match Self::live_entry(entries, key, now) {
            Some(Entry {
                value: Value::Bucket(state),
                ..
            }) => Some(state.version),
            _ => None,
        };
        if current_version != expected_version {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bucket(*next),
                expires_at_ms: Some(expiry_after(now, ttl)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let now = self.clock.now_millis();
        let mut guard = self.entries.lock();
        let removed = keys
            .iter()
            .filter_map(|key| guard.map.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }
}
