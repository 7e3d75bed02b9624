//! Per-identifier attempt bookkeeping.
//!
//! Records are process-local and observational: nothing in the allow/deny
//! path reads them. They exist for audit trails and for callers that want to
//! surface "N failed attempts" to operators.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::category::RateLimitCategory;

/// Attempt history for one identifier in one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// When the record was created
    pub first_attempt: DateTime<Utc>,
    /// Most recent attempt, if any
    pub last_attempt: Option<DateTime<Utc>>,
    /// Failed attempts since the last success
    pub attempt_count: u32,
    /// Set once failures reach the tracker's block threshold
    pub blocked: bool,
}

impl AttemptRecord {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            first_attempt: now,
            last_attempt: None,
            attempt_count: 0,
            blocked: false,
        }
    }
}

/// Concurrent map of attempt records.
#[derive(Debug, Default)]
pub struct AttemptTracker {
    records: DashMap<String, AttemptRecord>,
    block_threshold: Option<u32>,
}

impl AttemptTracker {
    /// Create a tracker that never marks records blocked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that marks a record blocked after `threshold`
    /// consecutive failures.
    pub fn with_block_threshold(threshold: Option<u32>) -> Self {
        Self {
            records: DashMap::new(),
            block_threshold: threshold,
        }
    }

    fn record_key(identifier: &str, category: &RateLimitCategory) -> String {
        format!("attempt:{}:{}", category, identifier)
    }

    /// Record an attempt and return the updated record.
    ///
    /// A success resets the count and clears `blocked`.
    pub fn record_attempt(
        &self,
        identifier: &str,
        category: &RateLimitCategory,
        success: bool,
    ) -> AttemptRecord {
        let now = Utc::now();
        let mut entry = self
            .records
            .entry(Self::record_key(identifier, category))
            .or_insert_with(|| AttemptRecord::fresh(now));
        let record = entry.value_mut();

        record.last_attempt = Some(now);
        if success {
            record.attempt_count = 0;
            record.blocked = false;
        } else {
            record.attempt_count = record.attempt_count.saturating_add(1);
            if let Some(threshold) = self.block_threshold {
                if record.attempt_count >= threshold && !record.blocked {
                    record.blocked = true;
                    info!(
                        category = %category,
                        attempts = record.attempt_count,
                        "Identifier marked blocked"
                    );
                }
            }
        }

        debug!(
            category = %category,
            success,
            attempts = record.attempt_count,
            "Recorded attempt"
        );
        record.clone()
    }

    /// The record for an identifier, or a zero record if none exists.
    pub fn get_info(&self, identifier: &str, category: &RateLimitCategory) -> AttemptRecord {
        self.records
            .get(&Self::record_key(identifier, category))
            .map(|r| r.value().clone())
            .unwrap_or_else(|| AttemptRecord::fresh(Utc::now()))
    }

    /// Forget an identifier's record. Returns whether one existed.
    pub fn clear(&self, identifier: &str, category: &RateLimitCategory) -> bool {
        self.records
            .remove(&Self::record_key(identifier, category))
            .is_some()
    }

    /// Drop records with no attempt in the last `max_idle`. Returns how many
    /// were dropped.
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let cutoff = Utc::now() - max_idle;
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.last_attempt.unwrap_or(record.first_attempt) >= cutoff
        });
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, "Purged idle attempt records");
        }
        purged
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no records are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_accumulate_and_success_resets() {
        let tracker = AttemptTracker::new();
        let category = RateLimitCategory::LoginAttempt;

        for expected in 1..=3 {
            let record = tracker.record_attempt("10.0.0.1", &category, false);
            assert_eq!(record.attempt_count, expected);
        }

        let record = tracker.record_attempt("10.0.0.1", &category, true);
        assert_eq!(record.attempt_count, 0);
        assert!(!record.blocked);
        assert!(record.last_attempt.is_some());
    }

    #[test]
    fn test_block_threshold_marks_record() {
        let tracker = AttemptTracker::with_block_threshold(Some(2));
        let category = RateLimitCategory::OtpSms;

        assert!(!tracker.record_attempt("+15550100", &category, false).blocked);
        assert!(tracker.record_attempt("+15550100", &category, false).blocked);
        assert!(tracker.get_info("+15550100", &category).blocked);

        assert!(!tracker.record_attempt("+15550100", &category, true).blocked);
    }

    #[test]
    fn test_get_info_for_unknown_identifier() {
        let tracker = AttemptTracker::new();
        let record = tracker.get_info("nobody", &RateLimitCategory::ApiRequest);

        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.last_attempt, None);
        assert!(!record.blocked);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_records_are_scoped_by_category() {
        let tracker = AttemptTracker::new();
        tracker.record_attempt("user", &RateLimitCategory::LoginAttempt, false);
        tracker.record_attempt("user", &RateLimitCategory::OtpEmail, false);

        assert_eq!(tracker.len(), 2);
        assert!(tracker.clear("user", &RateLimitCategory::OtpEmail));
        assert!(!tracker.clear("user", &RateLimitCategory::OtpEmail));
        assert_eq!(
            tracker
                .get_info("user", &RateLimitCategory::LoginAttempt)
                .attempt_count,
            1
        );
    }

    #[test]
    fn test_purge_idle() {
        let tracker = AttemptTracker::new();
        tracker.record_attempt("a", &RateLimitCategory::ApiRequest, false);

        assert_eq!(tracker.purge_idle(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.purge_idle(Duration::ZERO), 1);
        assert!(tracker.is_empty());
    }
}
