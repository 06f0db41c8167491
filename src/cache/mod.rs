// src/cache/mod.rs
//! Request counters, the TTL cache and the persisted snapshot.

pub mod snapshot;
pub mod ttl;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

pub use snapshot::{Snapshot, SnapshotFile, SnapshotStore};
pub use ttl::TtlCache;

/// Counters bumped by every dataset access. One per service.
#[derive(Debug, Default)]
pub struct Metrics {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    upstream_fetches: AtomicU64,
    errors: AtomicU64,
    last_fetch: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`Metrics`], also written into the snapshot file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub upstream_fetches: u64,
    pub errors: u64,
    pub last_fetch: Option<DateTime<Utc>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// One upstream range read, stamped with the current time.
    pub fn record_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        *self.last_fetch.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            upstream_fetches: self.upstream_fetches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_fetch: *self.last_fetch.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Zero everything. Test hook.
    pub fn reset(&self) {
        for counter in [
            &self.requests,
            &self.hits,
            &self.misses,
            &self.upstream_fetches,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.last_fetch.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
