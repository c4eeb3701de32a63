//! Directory of per-server assessment documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scanner_primitives::{AssessmentSummary, ServerAssessment};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::StoreResult;
use crate::store::{AssessmentStore, record_name, sort_assessments};

/// File-backed assessment archive laid out as `<root>/<stamp>-<server>.json`.
///
/// Documents keep a top-level `tool_assessments` list, so the archive doubles
/// as a declarations directory for composition analysis.
pub struct AssessmentArchive {
    root: PathBuf,
    naming: Mutex<()>,
}

impl std::fmt::Debug for AssessmentArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssessmentArchive")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl AssessmentArchive {
    /// Opens (or creates) an archive in the provided directory.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors encountered while creating the directory.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            naming: Mutex::new(()),
        })
    }

    /// Returns the archive directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read(path: &Path) -> Option<ServerAssessment> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable assessment");
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(assessment) => Some(assessment),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unrecognised assessment");
                None
            }
        }
    }
}

#[async_trait]
impl AssessmentStore for AssessmentArchive {
    async fn save(&self, assessment: &ServerAssessment) -> StoreResult<String> {
        let payload = serde_json::to_vec_pretty(assessment)?;
        let _naming = self.naming.lock().await;
        let name = record_name(assessment, |candidate| self.root.join(candidate).exists());
        let target = self.root.join(&name);
        let temp = self.root.join(format!(".{name}.tmp"));

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
            server = %assessment.server,
            path = %target.display(),
            "stored assessment on disk"
        );
        Ok(name)
    }

    async fn list_assessments(&self) -> StoreResult<Vec<AssessmentSummary>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            if let Some(assessment) = Self::read(&path).await {
                summaries.push(assessment.summary(name));
            }
        }
        sort_assessments(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::assessment;

    #[tokio::test]
    async fn saved_assessments_are_listed_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AssessmentArchive::open(dir.path()).await.unwrap();

        let older = archive.save(&assessment("ServerA", 0)).await.unwrap();
        let newer = archive.save(&assessment("ServerB", 60)).await.unwrap();
        assert_eq!(older, "20260101-120000-ServerA.json");

        let listed = archive.list_assessments().await.unwrap();
        let names: Vec<_> = listed.iter().map(|summary| summary.filename.as_str()).collect();
        assert_eq!(names, [newer.as_str(), older.as_str()]);
        assert_eq!(listed[0].tools_analyzed, 1);
        assert_eq!(listed[1].server.as_str(), "ServerA");
    }

    #[tokio::test]
    async fn same_second_saves_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AssessmentArchive::open(dir.path()).await.unwrap();

        let first = archive.save(&assessment("ServerA", 0)).await.unwrap();
        let second = archive.save(&assessment("ServerA", 0)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(archive.list_assessments().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unrelated_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = AssessmentArchive::open(dir.path()).await.unwrap();
        archive.save(&assessment("ServerA", 0)).await.unwrap();

        std::fs::write(dir.path().join("notes.json"), b"{\"tools\": []}").unwrap();
        std::fs::write(dir.path().join(".half.json.tmp"), b"{").unwrap();
        std::fs::write(dir.path().join("README.md"), b"hello").unwrap();

        let listed = archive.list_assessments().await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
