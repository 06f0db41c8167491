use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{info, warn};

use super::MetricsSnapshot;
use crate::error::{Error, Result};
use crate::process::{
    build_performance, build_profile, columns, join_datasets, ColumnRange, Dataset, JoinKind,
    JoinResult, RawTable,
};

const FORMAT_VERSION: u32 = 1;

/// Every derived view, replaced as one unit by a refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub profile: Option<Arc<Dataset>>,
    pub performance: Option<Arc<Dataset>>,
    pub performance_key: Option<Arc<Dataset>>,
    /// Matched schools only.
    pub joined: Option<Arc<JoinResult>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_refresh_reason: Option<String>,
}

impl Snapshot {
    /// Derive all views from freshly fetched sheets.
    pub fn assemble(
        profile: RawTable,
        performance: RawTable,
        key_range: ColumnRange,
        reason: &str,
    ) -> Self {
        let performance_key = columns::key_subset(&performance, key_range);
        let profile = build_profile(profile);
        let performance = build_performance(performance);
        let joined = join_datasets(&profile, &performance, JoinKind::Inner);
        Self {
            profile: Some(Arc::new(profile)),
            performance: Some(Arc::new(performance)),
            performance_key: Some(Arc::new(performance_key)),
            joined: Some(Arc::new(joined)),
            last_updated: Some(Utc::now()),
            last_refresh_reason: Some(reason.to_string()),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.profile.is_some()
            && self.performance.is_some()
            && self.performance_key.is_some()
            && self.joined.is_some()
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            populated: self.is_populated(),
            last_updated: self.last_updated,
            last_refresh_reason: self.last_refresh_reason.clone(),
            profile_rows: self.profile.as_ref().map_or(0, |d| d.len()),
            performance_rows: self.performance.as_ref().map_or(0, |d| d.len()),
            joined_count: self.joined.as_ref().map_or(0, |j| j.count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub populated: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_refresh_reason: Option<String>,
    pub profile_rows: usize,
    pub performance_rows: usize,
    pub joined_count: usize,
}

/// On-disk layout of the snapshot file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument {
    version: u32,
    saved_at: DateTime<Utc>,
    snapshot: Snapshot,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: PathBuf,
    pub exists: bool,
    pub bytes: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// A snapshot document on disk, replaced by write-to-temp then rename.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Either the previous document or the new one is left at `path`, never a mix.
    pub fn save(&self, snapshot: &Snapshot, metrics: MetricsSnapshot) -> Result<SaveOutcome> {
        let saved_at = Utc::now();
        let doc = SnapshotDocument {
            version: FORMAT_VERSION,
            saved_at,
            snapshot: snapshot.clone(),
            metrics,
        };
        let bytes = serde_json::to_vec(&doc)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("creating {}: {}", parent.display(), e))
            })?;
        }
        let tmp = self.tmp_path();
        fs::write(&tmp, &bytes)
            .map_err(|e| Error::Persistence(format!("writing {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::Persistence(format!(
                "renaming {} → {}: {}",
                tmp.display(),
                self.path.display(),
                e
            ))
        })?;

        info!(path = %self.path.display(), bytes = bytes.len(), "snapshot saved");
        Ok(SaveOutcome {
            path: self.path.clone(),
            bytes: bytes.len() as u64,
            saved_at,
        })
    }

    /// `Ok(None)` when no file exists yet.
    pub fn load(&self) -> Result<Option<(Snapshot, MetricsSnapshot)>> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let doc: SnapshotDocument = serde_json::from_slice(&bytes).map_err(|e| {
            Error::Persistence(format!("parsing {}: {}", self.path.display(), e))
        })?;
        if doc.version != FORMAT_VERSION {
            return Err(Error::Persistence(format!(
                "{} has format version {}, expected {}",
                self.path.display(),
                doc.version,
                FORMAT_VERSION
            )));
        }
        Ok(Some((doc.snapshot, doc.metrics)))
    }

    pub fn info(&self) -> FileInfo {
        match fs::metadata(&self.path) {
            Ok(meta) => FileInfo {
                path: self.path.clone(),
                exists: true,
                bytes: Some(meta.len()),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            },
            Err(_) => FileInfo {
                path: self.path.clone(),
                exists: false,
                bytes: None,
                modified: None,
            },
        }
    }
}

/// Process-wide snapshot state.
///
/// Readers take an `Arc<Snapshot>` and never observe a half-replaced
/// snapshot. Refresh, save and load run one at a time behind `write_lock`.
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
    write_lock: AsyncMutex<()>,
    file: SnapshotFile,
    restored: Mutex<Option<MetricsSnapshot>>,
}

impl SnapshotStore {
    pub fn new(file: SnapshotFile) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            write_lock: AsyncMutex::new(()),
            file,
            restored: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn install(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Held for the whole of a refresh, save or load.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub fn file(&self) -> &SnapshotFile {
        &self.file
    }

    /// Counters that were stored alongside the last loaded file.
    pub fn restored_metrics(&self) -> Option<MetricsSnapshot> {
        self.restored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write the current snapshot on the blocking pool. Caller holds [`SnapshotStore::lock`].
    pub async fn save_current(&self, metrics: MetricsSnapshot) -> Result<SaveOutcome> {
        let snapshot = self.current();
        if !snapshot.is_populated() {
            return Err(Error::Persistence("snapshot is empty; nothing to save".into()));
        }
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.save(&snapshot, metrics))
            .await
            .map_err(|e| Error::Persistence(format!("save task failed: {}", e)))?
    }

    /// Replace the in-memory snapshot with the file's. Caller holds [`SnapshotStore::lock`].
    ///
    /// A missing, unreadable or incomplete file leaves memory untouched.
    pub async fn load_from_file(&self) -> Result<Arc<Snapshot>> {
        let file = self.file.clone();
        let loaded = tokio::task::spawn_blocking(move || file.load())
            .await
            .map_err(|e| Error::Persistence(format!("load task failed: {}", e)))??;
        let (snapshot, metrics) = loaded.ok_or_else(|| {
            Error::Persistence(format!("{} does not exist", self.file.path().display()))
        })?;
        if !snapshot.is_populated() {
            warn!(path = %self.file.path().display(), "snapshot file is incomplete");
            return Err(Error::Persistence(format!(
                "{} holds an incomplete snapshot",
                self.file.path().display()
            )));
        }
        self.install(snapshot);
        *self.restored.lock().unwrap_or_else(PoisonError::into_inner) = Some(metrics);
        info!(path = %self.file.path().display(), "snapshot loaded");
        Ok(self.current())
    }

    /// Forget the in-memory snapshot. Test hook.
    pub fn reset(&self) {
        self.install(Snapshot::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        let profile = RawTable::split(
            vec![
                vec![json!("School ID"), json!("Name")],
                vec![json!("1"), json!("Alpha")],
                vec![json!("2"), json!("Beta")],
            ],
            1,
        );
        let performance = RawTable::new(
            vec![
                vec![json!("Info"), json!("Scores")],
                vec![json!("School ID"), json!("Maths")],
                vec![json!(""), json!(2023)],
            ],
            vec![vec![json!("2"), json!(88)], vec![json!("3"), json!(71)]],
        );
        Snapshot::assemble(profile, performance, "B:B".parse().unwrap(), "test")
    }

    #[test]
    fn assemble_derives_all_views() {
        let snap = sample();
        assert!(snap.is_populated());
        let summary = snap.summary();
        assert_eq!(summary.profile_rows, 2);
        assert_eq!(summary.performance_rows, 2);
        assert_eq!(summary.joined_count, 1);
        assert_eq!(summary.last_refresh_reason.as_deref(), Some("test"));
        assert_eq!(
            snap.performance_key.as_ref().unwrap().headers,
            vec!["Info | School ID", "Scores | Maths | 2023"]
        );
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested/snapshot.json"));
        let snap = sample();
        let metrics = MetricsSnapshot {
            requests: 3,
            ..Default::default()
        };

        let outcome = file.save(&snap, metrics.clone()).unwrap();
        assert!(outcome.bytes > 0);
        assert!(!file.tmp_path().exists());
        assert!(file.info().exists);

        let (loaded, loaded_metrics) = file.load().unwrap().unwrap();
        assert_eq!(loaded, snap);
        assert_eq!(loaded_metrics, metrics);
    }

    #[test]
    fn absent_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("missing.json"));
        assert!(file.load().unwrap().is_none());
        assert!(!file.info().exists);
    }

    #[test]
    fn corrupt_file_is_a_persistence_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        fs::write(&path, b"{not json").unwrap();
        let err = SnapshotFile::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn unwritable_location_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let file = SnapshotFile::new(blocker.join("snapshot.json"));
        let err = file.save(&sample(), MetricsSnapshot::default()).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(fs::read(&blocker).unwrap(), b"file, not a directory");
    }

    #[tokio::test]
    async fn store_load_replaces_memory_only_on_success() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(SnapshotFile::new(dir.path().join("s.json")));

        let _guard = store.lock().await;
        assert!(store.load_from_file().await.is_err());
        assert!(!store.current().is_populated());
        assert!(store.save_current(MetricsSnapshot::default()).await.is_err());

        store.install(sample());
        store.save_current(MetricsSnapshot::default()).await.unwrap();
        let saved = store.current();

        store.reset();
        assert!(!store.current().is_populated());
        let loaded = store.load_from_file().await.unwrap();
        assert_eq!(*loaded, *saved);
        assert_eq!(store.restored_metrics(), Some(MetricsSnapshot::default()));
    }
}
