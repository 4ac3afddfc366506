//! Single-slot, time-bounded cache for bulk results.
//!
//! Holds at most one entry process-wide. A lookup is a hit only when the
//! stored parameters equal the requested ones exactly and the entry is
//! younger than the TTL; expiry is checked lazily. Any `put` replaces the
//! slot, so racing writers leave the last writer's entry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::models::{FetchParameters, NormalizedPoint};

/// How long a bulk result stays valid (seconds).
pub const CACHE_TTL_SECS: i64 = 3600;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A captured bulk result and the parameters that produced it.
///
/// Points are shared, so a hit hands out the stored list without copying it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub params: FetchParameters,
    pub points: Arc<Vec<NormalizedPoint>>,
    pub created_at: DateTime<Utc>,
}

/// Process-wide single-entry cache of the last bulk result.
pub struct ResultCache<C = SystemClock> {
    slot: RwLock<Option<CacheEntry>>,
    clock: C,
    ttl: Duration,
}

impl ResultCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ResultCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ResultCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            slot: RwLock::new(None),
            clock,
            ttl: Duration::seconds(CACHE_TTL_SECS),
        }
    }

    /// Return the cached entry if it matches `params` and has not expired.
    pub async fn get(&self, params: &FetchParameters) -> Option<CacheEntry> {
        let slot = self.slot.read().await;
        let entry = slot.as_ref()?;

        if entry.params != *params {
            tracing::debug!(
                "Cache miss: cached params {:?} differ from requested {:?}",
                entry.params,
                params
            );
            return None;
        }

        let age = self.clock.now() - entry.created_at;
        if age >= self.ttl {
            tracing::debug!("Cache miss: entry expired ({}s old)", age.num_seconds());
            return None;
        }

        Some(entry.clone())
    }

    /// Store a new result, replacing whatever the slot held.
    pub async fn put(&self, params: FetchParameters, points: Arc<Vec<NormalizedPoint>>) {
        let entry = CacheEntry {
            params,
            points,
            created_at: self.clock.now(),
        };
        let mut slot = self.slot.write().await;
        *slot = Some(entry);
    }

    /// Number of points in the current entry, expired or not.
    pub async fn cached_len(&self) -> Option<usize> {
        self.slot.read().await.as_ref().map(|e| e.points.len())
    }
}
