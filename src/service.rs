// src/service.rs
//! Dataset accessors and admin actions, independent of the HTTP layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{future::Future, path::PathBuf, sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

use crate::cache::{
    snapshot::{FileInfo, SaveOutcome, SnapshotSummary},
    Metrics, MetricsSnapshot, Snapshot, SnapshotFile, SnapshotStore, TtlCache,
};
use crate::config::{CacheMode, Config, Ranges};
use crate::error::{Error, Result};
use crate::fetch::DataSource;
use crate::process::{
    build_performance, build_profile, columns, join_datasets, Dataset, HeaderMode, JoinKind,
    JoinResult, RawTable,
};

const PROFILE_KEY: &str = "profile";
const PERFORMANCE_KEY: &str = "performance";
const PERFORMANCE_SUBSET_KEY: &str = "performance:key";

fn schools_key(only_matched: bool) -> String {
    format!("schools?onlyMatched={}", only_matched)
}

/// A manual operation on cached state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    /// Re-fetch everything and replace the snapshot as one unit.
    Refresh { reason: String },
    Save,
    Load,
    /// Drop every TTL cache entry.
    Clear,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AdminOutcome {
    Refreshed(RefreshReport),
    Saved(SaveReport),
    Loaded(LoadReport),
    Cleared(ClearReport),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistResult {
    pub ok: bool,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub ok: bool,
    pub reason: String,
    pub duration_ms: u64,
    pub profile_rows: usize,
    pub performance_rows: usize,
    pub joined_count: usize,
    pub persisted: PersistResult,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub ok: bool,
    #[serde(flatten)]
    pub outcome: SaveOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub ok: bool,
    pub snapshot: SnapshotSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearReport {
    pub ok: bool,
    pub cleared: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub mode: CacheMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub mode: CacheMode,
    pub snapshot: SnapshotSummary,
    pub metrics: MetricsSnapshot,
    pub restored_metrics: Option<MetricsSnapshot>,
    pub file: FileInfo,
}

struct TtlCaches {
    datasets: TtlCache<Arc<Dataset>>,
    joins: TtlCache<Arc<JoinResult>>,
}

enum Backend {
    Ttl(TtlCaches),
    Snapshot(SnapshotStore),
}

/// Serves the profile, performance and joined views from cache or snapshot.
pub struct DataService {
    source: Arc<dyn DataSource>,
    ranges: Ranges,
    metrics: Metrics,
    backend: Backend,
    started_at: DateTime<Utc>,
}

impl DataService {
    pub fn new(source: Arc<dyn DataSource>, config: &Config) -> Self {
        let backend = match config.mode {
            CacheMode::Ttl => Backend::Ttl(TtlCaches {
                datasets: TtlCache::new(config.cache_ttl),
                joins: TtlCache::new(config.cache_ttl),
            }),
            CacheMode::Snapshot => Backend::Snapshot(SnapshotStore::new(SnapshotFile::new(
                config.snapshot_path.clone(),
            ))),
        };
        Self {
            source,
            ranges: config.ranges.clone(),
            metrics: Metrics::new(),
            backend,
            started_at: Utc::now(),
        }
    }

    pub fn mode(&self) -> CacheMode {
        match self.backend {
            Backend::Ttl(_) => CacheMode::Ttl,
            Backend::Snapshot(_) => CacheMode::Snapshot,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Snapshot mode: restore from disk, or refresh with reason `startup`.
    pub async fn initialize(&self) {
        let Backend::Snapshot(store) = &self.backend else {
            return;
        };
        let _guard = store.lock().await;
        match store.load_from_file().await {
            Ok(snap) => {
                info!(
                    last_updated = ?snap.last_updated,
                    "restored snapshot from {}",
                    store.file().path().display()
                );
            }
            Err(e) => {
                warn!("no usable snapshot on disk ({}); refreshing", e);
                if let Err(e) = self.refresh_locked(store, "startup").await {
                    error!("startup refresh failed: {}", e);
                }
            }
        }
    }

    pub async fn profile(&self) -> Result<Arc<Dataset>> {
        self.metrics.record_request();
        match &self.backend {
            Backend::Ttl(c) => {
                self.cached(&c.datasets, PROFILE_KEY, self.load_profile())
                    .await
            }
            Backend::Snapshot(store) => {
                self.from_snapshot(store, |s| s.profile.clone()).await
            }
        }
    }

    pub async fn performance(&self) -> Result<Arc<Dataset>> {
        self.metrics.record_request();
        match &self.backend {
            Backend::Ttl(c) => {
                self.cached(&c.datasets, PERFORMANCE_KEY, self.load_performance())
                    .await
            }
            Backend::Snapshot(store) => {
                self.from_snapshot(store, |s| s.performance.clone()).await
            }
        }
    }

    /// Performance restricted to the key column and the configured column range.
    pub async fn performance_key(&self) -> Result<Arc<Dataset>> {
        self.metrics.record_request();
        match &self.backend {
            Backend::Ttl(c) => {
                let compute = async {
                    let raw = self.fetch_performance_raw().await?;
                    Ok::<_, Error>(Arc::new(columns::key_subset(
                        &raw,
                        self.ranges.performance_key,
                    )))
                };
                self.cached(&c.datasets, PERFORMANCE_SUBSET_KEY, compute)
                    .await
            }
            Backend::Snapshot(store) => {
                self.from_snapshot(store, |s| s.performance_key.clone())
                    .await
            }
        }
    }

    /// Inner join when `only_matched`, outer join otherwise.
    pub async fn schools(&self, only_matched: bool) -> Result<Arc<JoinResult>> {
        self.metrics.record_request();
        let kind = JoinKind::from_only_matched(only_matched);
        match &self.backend {
            Backend::Ttl(c) => {
                let compute = async {
                    let profile =
                        cached_quiet(&c.datasets, PROFILE_KEY, self.load_profile()).await?;
                    let performance =
                        cached_quiet(&c.datasets, PERFORMANCE_KEY, self.load_performance())
                            .await?;
                    Ok::<_, Error>(Arc::new(join_datasets(&profile, &performance, kind)))
                };
                self.cached(&c.joins, &schools_key(only_matched), compute)
                    .await
            }
            Backend::Snapshot(store) => {
                self.from_snapshot(store, |s| match kind {
                    JoinKind::Inner => s.joined.clone(),
                    JoinKind::Outer => match (&s.profile, &s.performance) {
                        (Some(p), Some(f)) => Some(Arc::new(join_datasets(p, f, kind))),
                        _ => None,
                    },
                })
                .await
            }
        }
    }

    pub fn stats(&self) -> StatsReport {
        let ttl_secs = match &self.backend {
            Backend::Ttl(c) => Some(c.datasets.ttl().as_secs()),
            Backend::Snapshot(_) => None,
        };
        StatsReport {
            mode: self.mode(),
            ttl_secs,
            started_at: self.started_at,
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn status(&self) -> Result<StatusReport> {
        let store = self.snapshot_store("status")?;
        Ok(StatusReport {
            mode: self.mode(),
            snapshot: store.current().summary(),
            metrics: self.metrics.snapshot(),
            restored_metrics: store.restored_metrics(),
            file: store.file().info(),
        })
    }

    /// Run an admin action. Snapshot-only actions fail with
    /// [`Error::Unsupported`] in TTL mode.
    pub async fn execute(&self, action: AdminAction) -> Result<AdminOutcome> {
        info!(?action, "admin action");
        match action {
            AdminAction::Refresh { reason } => {
                let store = self.snapshot_store("refresh")?;
                let _guard = store.lock().await;
                self.refresh_locked(store, &reason)
                    .await
                    .map(AdminOutcome::Refreshed)
            }
            AdminAction::Save => {
                let store = self.snapshot_store("save")?;
                let _guard = store.lock().await;
                let outcome = store.save_current(self.metrics.snapshot()).await?;
                Ok(AdminOutcome::Saved(SaveReport { ok: true, outcome }))
            }
            AdminAction::Load => {
                let store = self.snapshot_store("load")?;
                let _guard = store.lock().await;
                let snapshot = store.load_from_file().await?;
                Ok(AdminOutcome::Loaded(LoadReport {
                    ok: true,
                    snapshot: snapshot.summary(),
                }))
            }
            AdminAction::Clear => {
                let cleared = match &self.backend {
                    Backend::Ttl(c) => c.datasets.clear() + c.joins.clear(),
                    Backend::Snapshot(_) => 0,
                };
                info!(cleared, "cache cleared");
                Ok(AdminOutcome::Cleared(ClearReport { ok: true, cleared }))
            }
        }
    }

    fn snapshot_store(&self, what: &str) -> Result<&SnapshotStore> {
        match &self.backend {
            Backend::Snapshot(store) => Ok(store),
            Backend::Ttl(_) => Err(Error::Unsupported(format!(
                "{} requires CACHE_MODE=snapshot",
                what
            ))),
        }
    }

    /// Cache lookup; `compute` is only awaited on a miss and its value stored.
    async fn cached<V, F>(&self, cache: &TtlCache<V>, key: &str, compute: F) -> Result<V>
    where
        V: Clone,
        F: Future<Output = Result<V>>,
    {
        if let Some(v) = cache.get(key) {
            self.metrics.record_hit();
            debug!(key, "cache hit");
            return Ok(v);
        }
        self.metrics.record_miss();
        debug!(key, "cache miss");
        fill(cache, key, compute).await.map_err(|e| {
            self.metrics.record_error();
            error!(key, "loading failed: {}", e);
            e
        })
    }

    /// Serve from the snapshot; an empty snapshot is filled once on first access.
    async fn from_snapshot<T>(
        &self,
        store: &SnapshotStore,
        pick: impl Fn(&Snapshot) -> Option<Arc<T>>,
    ) -> Result<Arc<T>> {
        let snap = store.current();
        if let Some(v) = snap.is_populated().then(|| pick(&snap)).flatten() {
            self.metrics.record_hit();
            return Ok(v);
        }

        self.metrics.record_miss();
        let _guard = store.lock().await;
        // another request may have populated it while we waited
        if !store.current().is_populated() {
            self.refresh_locked(store, "first-access").await?;
        }
        pick(&store.current()).ok_or_else(|| {
            self.metrics.record_error();
            Error::Upstream("snapshot is not populated".into())
        })
    }

    /// Fetch both sheets, swap in the new snapshot, then persist it.
    /// Caller holds the store lock.
    #[tracing::instrument(level = "info", skip(self, store))]
    async fn refresh_locked(&self, store: &SnapshotStore, reason: &str) -> Result<RefreshReport> {
        let start = Instant::now();
        let (profile, performance) =
            futures::try_join!(self.fetch_profile_raw(), self.fetch_performance_raw())
                .map_err(|e| {
                    self.metrics.record_error();
                    error!(reason, "refresh aborted, snapshot unchanged: {}", e);
                    e
                })?;

        let snapshot =
            Snapshot::assemble(profile, performance, self.ranges.performance_key, reason);
        let summary = snapshot.summary();
        store.install(snapshot);

        let path = store.file().path().to_path_buf();
        let persisted = match store.save_current(self.metrics.snapshot()).await {
            Ok(outcome) => PersistResult {
                ok: true,
                path,
                bytes: Some(outcome.bytes),
                error: None,
            },
            Err(e) => {
                warn!("snapshot refreshed but not persisted: {}", e);
                PersistResult {
                    ok: false,
                    path,
                    bytes: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            reason,
            duration_ms,
            profile_rows = summary.profile_rows,
            performance_rows = summary.performance_rows,
            joined = summary.joined_count,
            "snapshot refreshed"
        );
        Ok(RefreshReport {
            ok: true,
            reason: reason.to_string(),
            duration_ms,
            profile_rows: summary.profile_rows,
            performance_rows: summary.performance_rows,
            joined_count: summary.joined_count,
            persisted,
            last_updated: summary.last_updated,
        })
    }

    async fn load_profile(&self) -> Result<Arc<Dataset>> {
        Ok(Arc::new(build_profile(self.fetch_profile_raw().await?)))
    }

    async fn load_performance(&self) -> Result<Arc<Dataset>> {
        Ok(Arc::new(build_performance(
            self.fetch_performance_raw().await?,
        )))
    }

    async fn fetch_range(&self, range: &str) -> Result<Vec<Vec<serde_json::Value>>> {
        self.metrics.record_fetch();
        let start = Instant::now();
        let values = self.source.get_range(range).await?;
        debug!(range, rows = values.len(), elapsed = ?start.elapsed(), "range fetched");
        Ok(values)
    }

    async fn fetch_profile_raw(&self) -> Result<RawTable> {
        let values = self.fetch_range(&self.ranges.profile).await?;
        Ok(RawTable::split(values, HeaderMode::Single.rows()))
    }

    async fn fetch_performance_raw(&self) -> Result<RawTable> {
        let (header, data) = futures::try_join!(
            self.fetch_range(&self.ranges.performance_header),
            self.fetch_range(&self.ranges.performance_data)
        )?;
        let header = header
            .into_iter()
            .take(HeaderMode::Composite.rows())
            .collect();
        Ok(RawTable::new(header, data))
    }
}

/// Cache lookup that leaves the metrics alone, for reads nested inside a counted one.
async fn cached_quiet<V, F>(cache: &TtlCache<V>, key: &str, compute: F) -> Result<V>
where
    V: Clone,
    F: Future<Output = Result<V>>,
{
    match cache.get(key) {
        Some(v) => Ok(v),
        None => fill(cache, key, compute).await,
    }
}

async fn fill<V, F>(cache: &TtlCache<V>, key: &str, compute: F) -> Result<V>
where
    V: Clone,
    F: Future<Output = Result<V>>,
{
    let v = compute.await?;
    cache.insert(key, v.clone());
    Ok(v)
}
