use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::PricePoint;

/// A cached fetch result and the moment it was produced.
#[derive(Debug, Clone)]
pub struct CachedFetch {
    pub rows: Vec<PricePoint>,
    pub fetched_at: DateTime<Utc>,
}

/// Short-lived in-memory cache of normalized fetch results, keyed by the
/// lookback length that produced them.
///
/// Entries expire after the configured TTL. A forced refresh calls
/// `invalidate` before fetching, so staleness never exceeds one cycle.
#[derive(Clone)]
pub struct FetchCache {
    entries: Arc<DashMap<u32, CachedFetch>>,
    ttl: Duration,
}

impl FetchCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// The cached rows for `days`, if still within TTL. Expired entries are
    /// dropped on access.
    pub fn get(&self, days: u32) -> Option<Vec<PricePoint>> {
        if let Some(entry) = self.entries.get(&days) {
            let cached = entry.value().clone();
            if Utc::now() < cached.fetched_at + self.ttl {
                return Some(cached.rows);
            }
            drop(entry); // release the read lock before removing
            self.entries.remove(&days);
        }
        None
    }

    pub fn insert(&self, days: u32, rows: Vec<PricePoint>) {
        self.entries.insert(
            days,
            CachedFetch {
                rows,
                fetched_at: Utc::now(),
            },
        );
    }

    /// Drop the entry for `days`, if any. Used by force refresh.
    pub fn invalidate(&self, days: u32) {
        self.entries.remove(&days);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
