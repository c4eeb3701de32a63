//! In-memory store for tests and single-process deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use scanner_primitives::{AnalysisRun, AssessmentSummary, KeyId, RunSummary, ServerAssessment};
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::{
    AnalysisStore, AssessmentStore, record_name, sort_assessments, sort_history, sort_newest_first,
};
use crate::{StoreError, StoreResult};

/// Volatile store keeping every run and assessment in process memory.
///
/// Reads take a shared lock and proceed concurrently; appends take the write
/// lock briefly.
#[derive(Debug, Default)]
pub struct VolatileStore {
    runs: RwLock<BTreeMap<KeyId, Vec<AnalysisRun>>>,
    assessments: RwLock<BTreeMap<String, ServerAssessment>>,
}

impl VolatileStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored runs across every key.
    pub async fn len(&self) -> usize {
        self.runs.read().await.values().map(Vec::len).sum()
    }

    /// Returns `true` when no run has been stored.
    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[async_trait]
impl AnalysisStore for VolatileStore {
    async fn append(&self, run: &AnalysisRun) -> StoreResult<()> {
        let mut guard = self.runs.write().await;
        let runs = guard.entry(run.key_id().clone()).or_default();
        if runs.iter().any(|stored| stored.run_id() == run.run_id()) {
            return Err(StoreError::DuplicateRun {
                key_id: run.key_id().clone(),
                run_id: run.run_id(),
            });
        }
        runs.push(run.clone());
        sort_history(runs);
        debug!(key_id = %run.key_id(), run_id = %run.run_id(), "stored run in memory");
        Ok(())
    }

    async fn history(&self, key_id: &KeyId) -> StoreResult<Vec<AnalysisRun>> {
        Ok(self.runs.read().await.get(key_id).cloned().unwrap_or_default())
    }

    async fn list(&self) -> StoreResult<Vec<RunSummary>> {
        let guard = self.runs.read().await;
        let mut summaries: Vec<RunSummary> = guard
            .values()
            .filter_map(|runs| runs.last().map(AnalysisRun::summary))
            .collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }
}

#[async_trait]
impl AssessmentStore for VolatileStore {
    async fn save(&self, assessment: &ServerAssessment) -> StoreResult<String> {
        let mut guard = self.assessments.write().await;
        let name = record_name(assessment, |candidate| guard.contains_key(candidate));
        guard.insert(name.clone(), assessment.clone());
        debug!(server = %assessment.server, record = %name, "stored assessment in memory");
        Ok(name)
    }

    async fn list_assessments(&self) -> StoreResult<Vec<AssessmentSummary>> {
        let mut summaries: Vec<AssessmentSummary> = self
            .assessments
            .read()
            .await
            .iter()
            .map(|(name, assessment)| assessment.summary(name.as_str()))
            .collect();
        sort_assessments(&mut summaries);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{assessment, key, run_at};

    #[tokio::test]
    async fn history_is_ordered_and_latest_is_last() {
        let store = VolatileStore::new();
        let key = key("ServerA", "ServerB");
        let late = run_at(&key, 60);
        let early = run_at(&key, 0);
        store.append(&late).await.unwrap();
        store.append(&early).await.unwrap();

        let history = store.history(key.id()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].run_id(), early.run_id());
        assert_eq!(store.latest(key.id()).await.unwrap().unwrap().run_id(), late.run_id());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn duplicate_run_ids_are_rejected() {
        let store = VolatileStore::new();
        let run = run_at(&key("ServerA", "ServerB"), 0);
        store.append(&run).await.unwrap();

        let err = store.append(&run).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRun { .. }));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_returns_latest_per_key_newest_first() {
        let store = VolatileStore::new();
        let first = key("ServerA", "ServerB");
        let second = key("ServerC", "ServerD");
        store.append(&run_at(&first, 0)).await.unwrap();
        store.append(&run_at(&first, 100)).await.unwrap();
        store.append(&run_at(&second, 50)).await.unwrap();

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(&summaries[0].key_id, first.id());
        assert_eq!(&summaries[1].key_id, second.id());
    }

    #[tokio::test]
    async fn unknown_keys_are_empty() {
        let store = VolatileStore::new();
        let key = key("ServerA", "ServerB");
        assert!(store.latest(key.id()).await.unwrap().is_none());
        assert!(store.history(key.id()).await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn assessments_are_kept_apart_from_runs() {
        let store = VolatileStore::new();
        let first = store.save(&assessment("ServerA", 0)).await.unwrap();
        let second = store.save(&assessment("ServerA", 0)).await.unwrap();
        assert_ne!(first, second);

        let listed = store.list_assessments().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].filename, second);
        assert!(store.is_empty().await);
    }
}
