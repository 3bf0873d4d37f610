use crate::domain::key::RequestKey;
use crate::domain::model::{ParseResult, Snapshot, SourceKind};
use crate::domain::ports::SnapshotRepository;
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

async fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(tmp_path, bytes).await?;
    tokio::fs::rename(tmp_path, path).await
}

fn snapshot_of(kind: SourceKind, url: &str, value: &ParseResult) -> Snapshot {
    Snapshot {
        key: RequestKey::derive(kind, url).to_string(),
        kind,
        url: url.to_string(),
        data: value.clone(),
        updated_at: Utc::now(),
    }
}

/// Non-expiring snapshot store that lives as long as the process.
#[derive(Default)]
pub struct InMemorySnapshotRepository {
    snapshots: Mutex<HashMap<RequestKey, Snapshot>>,
}

impl InMemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshots(&self) -> MutexGuard<'_, HashMap<RequestKey, Snapshot>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.snapshots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots().is_empty()
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn get(&self, kind: SourceKind, url: &str) -> Result<Option<Snapshot>> {
        let key = RequestKey::derive(kind, url);
        Ok(self.snapshots().get(&key).cloned())
    }

    async fn set(&self, kind: SourceKind, url: &str, value: &ParseResult) -> Result<()> {
        let key = RequestKey::derive(kind, url);
        self.snapshots().insert(key, snapshot_of(kind, url, value));
        Ok(())
    }
}

/// Snapshot store backed by one JSON file per request key.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so a reader never sees a half-written snapshot.
#[derive(Debug)]
pub struct FileSnapshotRepository {
    directory: PathBuf,
    write_seq: AtomicU64,
}

impl FileSnapshotRepository {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &RequestKey) -> PathBuf {
        let file_name = key.as_str().replace(':', "_");
        self.directory.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl SnapshotRepository for FileSnapshotRepository {
    async fn get(&self, kind: SourceKind, url: &str) -> Result<Option<Snapshot>> {
        let path = self.path_for(&RequestKey::derive(kind, url));

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Some(snapshot))
    }

    async fn set(&self, kind: SourceKind, url: &str, value: &ParseResult) -> Result<()> {
        let snapshot = snapshot_of(kind, url, value);
        let key = RequestKey::derive(kind, url);
        let path = self.path_for(&key);

        tokio::fs::create_dir_all(&self.directory).await?;

        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("json.{}.tmp", seq));
        let json = serde_json::to_vec_pretty(&snapshot)?;

        if let Err(e) = write_then_rename(&tmp_path, &path, &json).await {
            // a failed write can leave a partial temp file behind
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(%key, path = %path.display(), "Snapshot written");
        Ok(())
    }
}
