//! Retention policy.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use wisp_core::BlobRef;

/// Metadata for one cached screenshot. The pixels live in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub blob: BlobRef,
    pub size: u64,
}

/// Bounds a screenshot collection by record count and record age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_count: usize,
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn new(max_count: usize, max_age: Duration) -> Self {
        Self { max_count, max_age }
    }

    /// Records to evict, oldest first.
    ///
    /// A record is evicted if it is older than `max_age` at `now`, or if it
    /// is among the oldest records beyond `max_count`. Evicting exactly this
    /// set leaves a collection satisfying both bounds.
    pub fn plan(&self, records: &[ScreenshotRecord], now: DateTime<Utc>) -> Vec<Uuid> {
        let mut oldest_first: Vec<&ScreenshotRecord> = records.iter().collect();
        oldest_first.sort_by_key(|r| (r.captured_at, r.id));

        let excess = oldest_first.len().saturating_sub(self.max_count);
        oldest_first
            .into_iter()
            .enumerate()
            .filter(|(i, r)| *i < excess || now - r.captured_at > self.max_age)
            .map(|(_, r)| r.id)
            .collect()
    }

    /// Whether `records` already satisfies both bounds at `now`.
    pub fn is_satisfied(&self, records: &[ScreenshotRecord], now: DateTime<Utc>) -> bool {
        records.len() <= self.max_count
            && records.iter().all(|r| now - r.captured_at <= self.max_age)
    }
}
