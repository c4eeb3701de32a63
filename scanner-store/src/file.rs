//! Durable store writing one JSON document per run.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scanner_primitives::{AnalysisRun, KeyId, RunSummary};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::{AnalysisStore, sort_history, sort_newest_first};
use crate::{StoreError, StoreResult};

const RECORD_EXTENSION: &str = "json";

/// File-backed store laid out as `<root>/<key_id>/<run_id>.json`.
///
/// Each record is written to a hidden temporary file and renamed into place,
/// so readers only ever observe complete documents and need no lock. Writers
/// are serialised per key.
pub struct FileStore {
    root: PathBuf,
    writers: Mutex<HashMap<KeyId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FileStore {
    /// Opens (or creates) a store rooted at the provided directory.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while creating the directory.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            writers: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key_id: &KeyId) -> PathBuf {
        self.root.join(key_id.as_str())
    }

    async fn writer(&self, key_id: &KeyId) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        Arc::clone(writers.entry(key_id.clone()).or_default())
    }

    /// Drops the caller's writer lock and forgets the key once no other
    /// append holds it.
    async fn release_writer(&self, key_id: &KeyId, writer: Arc<Mutex<()>>) {
        let mut writers = self.writers.lock().await;
        drop(writer);
        if writers
            .get(key_id)
            .is_some_and(|writer| Arc::strong_count(writer) == 1)
        {
            writers.remove(key_id);
        }
    }

    async fn write_run(&self, run: &AnalysisRun) -> StoreResult<()> {
        let key_id = run.key_id();
        let dir = self.key_dir(key_id);
        fs::create_dir_all(&dir).await?;
        let target = dir.join(format!("{}.{RECORD_EXTENSION}", run.run_id()));
        if fs::try_exists(&target).await? {
            return Err(StoreError::DuplicateRun {
                key_id: key_id.clone(),
                run_id: run.run_id(),
            });
        }

        let temp = dir.join(format!(".{}.tmp", run.run_id()));
        let payload = serde_json::to_vec_pretty(run)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp)
            .await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, &target).await?;

        debug!(
            key_id = %key_id,
            run_id = %run.run_id(),
            path = %target.display(),
            "stored run on disk"
        );
        Ok(())
    }

    async fn read_run(path: &Path, key_id: &KeyId) -> StoreResult<AnalysisRun> {
        let data = fs::read(path).await?;
        let run: AnalysisRun = serde_json::from_slice(&data)?;
        if run.key_id() != key_id {
            return Err(StoreError::corrupt(
                path,
                format!("record belongs to composition {}", run.key_id()),
            ));
        }
        Ok(run)
    }
}

fn is_record(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| !name.starts_with('.'));
    visible && path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
}

#[async_trait]
impl AnalysisStore for FileStore {
    async fn append(&self, run: &AnalysisRun) -> StoreResult<()> {
        let key_id = run.key_id();
        let writer = self.writer(key_id).await;
        let result = {
            let _guard = writer.lock().await;
            self.write_run(run).await
        };
        self.release_writer(key_id, writer).await;
        result
    }

    async fn history(&self, key_id: &KeyId) -> StoreResult<Vec<AnalysisRun>> {
        let dir = self.key_dir(key_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_record(&path) {
                runs.push(Self::read_run(&path, key_id).await?);
            }
        }
        sort_history(&mut runs);
        Ok(runs)
    }

    async fn list(&self) -> StoreResult<Vec<RunSummary>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(key_id) = name.to_str().and_then(|name| name.parse::<KeyId>().ok()) else {
                warn!(path = %entry.path().display(), "skipping unrecognised store directory");
                continue;
            };
            if let Some(run) = self.latest(&key_id).await? {
                summaries.push(run.summary());
            }
        }
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{key, run_at};

    #[tokio::test]
    async fn runs_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let key = key("ServerA", "ServerB");
        let run = run_at(&key, 0);
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.append(&run).await.unwrap();
        }

        let reopened = FileStore::open(dir.path()).await.unwrap();
        let latest = reopened.latest(key.id()).await.unwrap().unwrap();
        assert_eq!(latest, run);

        let expected = dir
            .path()
            .join(key.id().as_str())
            .join(format!("{}.json", run.run_id()));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn duplicate_run_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let run = run_at(&key("ServerA", "ServerB"), 0);
        store.append(&run).await.unwrap();

        let err = store.append(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRun { .. }));
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_key_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let key = key("ServerA", "ServerB");

        let handles: Vec<_> = (0..8)
            .map(|offset| {
                let store = Arc::clone(&store);
                let run = run_at(&key, offset);
                tokio::spawn(async move { store.append(&run).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let history = store.history(key.id()).await.unwrap();
        assert_eq!(history.len(), 8);
        assert!(history.windows(2).all(|pair| {
            pair[0].provenance().completed_at <= pair[1].provenance().completed_at
        }));
        assert!(store.writers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn writer_locks_are_released_after_each_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        for (offset, (a, b)) in [("ServerA", "ServerB"), ("ServerC", "ServerD")].iter().enumerate() {
            let run = run_at(&key(a, b), i64::try_from(offset).unwrap());
            store.append(&run).await.unwrap();
            assert!(store.writers.lock().await.is_empty());
        }

        let run = run_at(&key("ServerA", "ServerB"), 0);
        store.append(&run).await.unwrap();
        store.append(&run).await.unwrap_err();
        assert!(store.writers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn list_skips_foreign_entries_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let first = key("ServerA", "ServerB");
        let second = key("ServerC", "ServerD");
        store.append(&run_at(&first, 10)).await.unwrap();
        store.append(&run_at(&second, 20)).await.unwrap();

        std::fs::create_dir(dir.path().join("not-a-key")).unwrap();
        std::fs::write(dir.path().join(first.id().as_str()).join(".partial.tmp"), b"{").unwrap();

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(&summaries[0].key_id, second.id());
    }

    #[tokio::test]
    async fn misplaced_records_are_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let first = key("ServerA", "ServerB");
        let second = key("ServerC", "ServerD");
        let run = run_at(&first, 0);
        store.append(&run).await.unwrap();

        let foreign_dir = dir.path().join(second.id().as_str());
        std::fs::create_dir(&foreign_dir).unwrap();
        std::fs::copy(
            dir.path().join(first.id().as_str()).join(format!("{}.json", run.run_id())),
            foreign_dir.join("copied.json"),
        )
        .unwrap();

        let err = store.history(second.id()).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
