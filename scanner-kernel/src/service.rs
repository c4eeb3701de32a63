//! Control-plane service: collection, coalescing, and run bookkeeping.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use scanner_primitives::{
    AnalysisRun, CompositionKey, KeyId, RunId, RunSummary, ServerName, ServerSet,
    ToolDeclaration, ToolRef,
};
use scanner_store::AnalysisStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collector::{FileCollector, ToolCollector};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::{AnalysisPipeline, RunInput};
use crate::registry::{Begin, InFlightRegistry, InFlightRun, RunHandle, RunOutcome};

/// A request to analyse one composition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Servers resolved through the configured collector.
    #[serde(default)]
    pub server_names: Vec<String>,
    /// Declaration files relative to the declarations root; each names its
    /// server by file stem.
    #[serde(default)]
    pub declaration_files: Vec<PathBuf>,
    /// Explicit higher-order groups evaluated in addition to pairs.
    #[serde(default)]
    pub groups: Vec<Vec<ToolRef>>,
}

/// Accepted submission.
#[derive(Debug)]
pub enum Submission {
    /// A new run was started.
    Started {
        /// Composition identity.
        key_id: KeyId,
        /// New run.
        run_id: RunId,
        /// Observer of the run.
        handle: RunHandle,
    },
    /// A run for the same composition was already in flight.
    InProgress {
        /// Composition identity.
        key_id: KeyId,
        /// Run already in flight.
        run_id: RunId,
        /// Observer of that run.
        handle: RunHandle,
    },
}

impl Submission {
    /// Composition identity.
    #[must_use]
    pub fn key_id(&self) -> &KeyId {
        match self {
            Self::Started { key_id, .. } | Self::InProgress { key_id, .. } => key_id,
        }
    }

    /// Run started or joined.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id, .. } | Self::InProgress { run_id, .. } => *run_id,
        }
    }

    /// Returns `true` if the submission joined a run already in flight.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress { .. })
    }

    /// Observer of the run.
    #[must_use]
    pub fn handle(&self) -> &RunHandle {
        match self {
            Self::Started { handle, .. } | Self::InProgress { handle, .. } => handle,
        }
    }

    /// Consumes the submission, returning the run observer.
    #[must_use]
    pub fn into_handle(self) -> RunHandle {
        match self {
            Self::Started { handle, .. } | Self::InProgress { handle, .. } => handle,
        }
    }
}

/// Entry point for starting, observing, and querying analyses.
#[derive(Clone)]
pub struct AnalysisService {
    pipeline: Arc<AnalysisPipeline>,
    collector: Arc<dyn ToolCollector>,
    registry: InFlightRegistry,
    declarations_root: Option<PathBuf>,
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("pipeline", &self.pipeline)
            .field("registry", &self.registry)
            .field("declarations_root", &self.declarations_root)
            .finish_non_exhaustive()
    }
}

impl AnalysisService {
    /// Creates a service.
    #[must_use]
    pub fn new(pipeline: AnalysisPipeline, collector: Arc<dyn ToolCollector>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            collector,
            registry: InFlightRegistry::new(),
            declarations_root: None,
        }
    }

    /// Allows submissions to name declaration files under `root`. Without a
    /// root, submissions naming files are rejected.
    #[must_use]
    pub fn with_declarations_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.declarations_root = Some(root.into());
        self
    }

    /// Returns the in-flight registry.
    #[must_use]
    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    fn store(&self) -> &Arc<dyn AnalysisStore> {
        self.pipeline.store()
    }

    /// Collects declarations, derives the composition key, and starts a run
    /// unless one is already in flight for the key.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Collection`] if any server's declarations
    /// cannot be collected and [`PipelineError::InvalidRequest`] for
    /// compositions of fewer than two servers, groups naming unknown tools,
    /// or declaration files outside the declarations root.
    pub async fn submit(&self, request: SubmitRequest) -> PipelineResult<Submission> {
        let (servers, declarations) = self.collect(&request).await?;
        let key = CompositionKey::new(declarations.iter().map(|decl| decl.tool_ref().clone()))
            .map_err(|err| PipelineError::invalid_request(err.to_string()))?;
        if let Some(tool) = request
            .groups
            .iter()
            .flatten()
            .find(|tool| !key.contains(tool))
        {
            return Err(PipelineError::invalid_request(format!(
                "group names {tool}, which is not in the composition"
            )));
        }

        match self.registry.begin(key.id(), servers) {
            Begin::InProgress(handle) => {
                info!(
                    key_id = %key.id().short(),
                    run_id = %handle.run_id(),
                    "analysis already in progress"
                );
                Ok(Submission::InProgress {
                    key_id: key.id().clone(),
                    run_id: handle.run_id(),
                    handle,
                })
            }
            Begin::Started(guard) => {
                let key_id = key.id().clone();
                let run_id = guard.run_id();
                let handle = guard.handle();
                info!(
                    key_id = %key_id.short(),
                    %run_id,
                    tools = declarations.len(),
                    "analysis started"
                );
                let input = RunInput {
                    key,
                    declarations,
                    groups: request.groups,
                };
                let pipeline = Arc::clone(&self.pipeline);
                let task = tokio::spawn(async move {
                    let outcome = pipeline.run(input, &guard).await;
                    if let Err(err) = &outcome {
                        warn!(error = %err, kind = ?err.kind(), "analysis failed");
                    }
                    guard.finish(outcome.map_err(Arc::new));
                });
                self.registry.attach(&key_id, run_id, task.abort_handle());
                Ok(Submission::Started {
                    key_id,
                    run_id,
                    handle,
                })
            }
        }
    }

    /// Submits and waits for the run (or the one already in flight).
    ///
    /// # Errors
    ///
    /// Returns the submission error or the run's failure.
    pub async fn submit_and_wait(&self, request: SubmitRequest) -> RunOutcome {
        let submission = self.submit(request).await.map_err(Arc::new)?;
        submission.into_handle().wait().await
    }

    /// Submits each request independently; one failure does not affect the
    /// others.
    pub async fn submit_batch(&self, requests: Vec<SubmitRequest>) -> Vec<PipelineResult<Submission>> {
        join_all(requests.into_iter().map(|request| self.submit(request))).await
    }

    /// Returns the latest stored run for a composition.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] if nothing is stored for the key,
    /// or a store error.
    pub async fn get(&self, key_id: &KeyId) -> PipelineResult<AnalysisRun> {
        self.store()
            .latest(key_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                key_id: key_id.clone(),
            })
    }

    /// Returns every stored run for a composition, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotFound`] if nothing is stored for the key,
    /// or a store error.
    pub async fn history(&self, key_id: &KeyId) -> PipelineResult<Vec<AnalysisRun>> {
        let runs = self.store().history(key_id).await?;
        if runs.is_empty() {
            return Err(PipelineError::NotFound {
                key_id: key_id.clone(),
            });
        }
        Ok(runs)
    }

    /// Lists the latest run of every stored composition, newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list(&self) -> PipelineResult<Vec<RunSummary>> {
        Ok(self.store().list().await?)
    }

    /// Returns the runs currently in flight.
    #[must_use]
    pub fn status(&self) -> Vec<InFlightRun> {
        self.registry.snapshot()
    }

    /// Waits up to `grace` for every in-flight run to finish.
    ///
    /// Runs still going when the grace period ends are abandoned: the
    /// scheduler is closed, each run is cancelled and logged, and nothing is
    /// persisted for them. Returns the number of abandoned runs.
    pub async fn drain(&self, grace: Duration) -> usize {
        let handles = self.registry.handles();
        if handles.is_empty() {
            return 0;
        }
        info!(
            in_flight = handles.len(),
            grace_secs = grace.as_secs_f64(),
            "draining in-flight analyses"
        );
        let waits = join_all(handles.into_iter().map(RunHandle::wait));
        if tokio::time::timeout(grace, waits).await.is_ok() {
            info!("in-flight analyses drained");
            return 0;
        }

        self.pipeline.scheduler().close();
        let abandoned = self.registry.snapshot();
        for run in &abandoned {
            warn!(
                key_id = %run.key_id.short(),
                run_id = %run.run_id,
                state = ?run.state,
                "abandoning analysis at shutdown"
            );
            self.registry.cancel(&run.key_id);
        }
        abandoned.len()
    }

    /// Cancels the run in flight for a composition. Nothing is persisted for
    /// a cancelled run.
    ///
    /// Returns `false` if nothing was in flight.
    pub fn cancel(&self, key_id: &KeyId) -> bool {
        self.registry.cancel(key_id)
    }

    async fn collect(
        &self,
        request: &SubmitRequest,
    ) -> PipelineResult<(ServerSet, Vec<ToolDeclaration>)> {
        let files = FileCollector::from_files(self.confine(&request.declaration_files).await?)?;
        let mut names: BTreeSet<ServerName> = files.servers().cloned().collect();
        for name in &request.server_names {
            let server = ServerName::new(name.as_str())
                .map_err(|err| PipelineError::invalid_request(err.to_string()))?;
            names.insert(server);
        }

        let files = &files;
        let collected = try_join_all(names.iter().map(|server| async move {
            if files.covers(server) {
                files.collect(server).await
            } else {
                self.collector.collect(server).await
            }
        }))
        .await?;

        let declarations = collected.into_iter().flatten().collect();
        Ok((names.into_iter().collect(), declarations))
    }

    /// Resolves submitted file names under the declarations root.
    ///
    /// Missing files and files resolving outside the root (through `..`, an
    /// absolute path, or a symlink) are rejected with the same message.
    async fn confine(&self, files: &[PathBuf]) -> PipelineResult<Vec<PathBuf>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let Some(root) = &self.declarations_root else {
            return Err(PipelineError::invalid_request(
                "declaration files are not accepted; no declarations root is configured",
            ));
        };
        let root = tokio::fs::canonicalize(root).await.map_err(|err| {
            warn!(root = %root.display(), error = %err, "declarations root is unusable");
            PipelineError::invalid_request("declarations root is unavailable")
        })?;

        let mut confined = Vec::with_capacity(files.len());
        for file in files {
            let rejected = || {
                PipelineError::invalid_request(format!(
                    "declaration file `{}` is not available under the declarations root",
                    file.display()
                ))
            };
            if !is_relative_and_normal(file) {
                return Err(rejected());
            }
            let path = root.join(file);
            let resolved = tokio::fs::canonicalize(&path).await.map_err(|_| rejected())?;
            if !resolved.starts_with(&root) {
                return Err(rejected());
            }
            confined.push(path);
        }
        Ok(confined)
    }
}

fn is_relative_and_normal(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use scanner_oracle::{
        GatewayConfig, OracleDescriptor, OracleGateway, OracleRequest, OracleResult,
        ReasoningOracle, RuleBasedOracle,
    };
    use scanner_primitives::{AnalysisFragment, CapabilityMap, GovernanceAction, RunStatus};
    use scanner_store::VolatileStore;
    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::collector::CollectionResult;
    use crate::error::ErrorKind;

    struct FixedCollector {
        servers: BTreeMap<ServerName, Vec<ToolDeclaration>>,
    }

    #[async_trait]
    impl ToolCollector for FixedCollector {
        async fn collect(&self, server: &ServerName) -> CollectionResult<Vec<ToolDeclaration>> {
            self.servers
                .get(server)
                .cloned()
                .ok_or_else(|| crate::collector::CollectionError::UnknownServer {
                    server: server.clone(),
                })
        }
    }

    /// Rule-based oracle whose group calls wait for a permit.
    struct GatedOracle {
        inner: RuleBasedOracle,
        gate: Arc<Semaphore>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ReasoningOracle for GatedOracle {
        fn descriptor(&self) -> OracleDescriptor {
            OracleDescriptor::new("gated", "rules", 0.0)
        }

        async fn classify(&self, tools: &[ToolDeclaration]) -> OracleResult<CapabilityMap> {
            self.inner.classify(tools).await
        }

        async fn detect_surpluses(&self, request: &OracleRequest) -> OracleResult<AnalysisFragment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|err| scanner_oracle::OracleError::unavailable(err.to_string()))?;
            self.inner.detect_surpluses(request).await
        }
    }

    fn decl(server: &str, name: &str, description: &str) -> ToolDeclaration {
        ToolDeclaration::new(ServerName::new(server).unwrap(), name, description, json!({})).unwrap()
    }

    struct Fixture {
        service: AnalysisService,
        store: Arc<VolatileStore>,
        gate: Arc<Semaphore>,
        calls: Arc<AtomicUsize>,
    }

    fn fixture(open: bool) -> Fixture {
        let gate = Arc::new(Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }));
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = GatedOracle {
            inner: RuleBasedOracle::default(),
            gate: Arc::clone(&gate),
            calls: Arc::clone(&calls),
        };
        let gateway = OracleGateway::new(
            Arc::new(oracle),
            GatewayConfig::new(Duration::from_secs(30), 0).unwrap(),
        );
        let store = Arc::new(VolatileStore::new());
        let pipeline = AnalysisPipeline::new(gateway, Arc::clone(&store) as Arc<dyn AnalysisStore>).unwrap();
        let servers = [
            decl("ServerA", "get_secret_word", "Returns the secret word"),
            decl("ServerB", "update_cart", "Adds items to the cart"),
            decl("ServerC", "list_colours", "Lists colours"),
        ]
        .into_iter()
        .map(|decl| (decl.server_name().clone(), vec![decl]))
        .collect();
        let service = AnalysisService::new(pipeline, Arc::new(FixedCollector { servers }));
        Fixture {
            service,
            store,
            gate,
            calls,
        }
    }

    fn request(servers: &[&str]) -> SubmitRequest {
        SubmitRequest {
            server_names: servers.iter().map(|s| (*s).to_owned()).collect(),
            ..SubmitRequest::default()
        }
    }

    #[tokio::test]
    async fn server_order_does_not_change_the_composition() {
        let fx = fixture(true);
        let first = fx.service.submit_and_wait(request(&["ServerB", "ServerA"])).await.unwrap();
        let second = fx.service.submit_and_wait(request(&["ServerA", "ServerB"])).await.unwrap();

        assert_eq!(first.key_id(), second.key_id());
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(first.analysis().recommended_action(), GovernanceAction::Block);
        assert_eq!(fx.service.history(first.key_id()).await.unwrap().len(), 2);
        assert_eq!(fx.service.get(first.key_id()).await.unwrap().run_id(), second.run_id());
        assert_eq!(fx.service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_submission_joins_the_run_in_flight() {
        let fx = fixture(false);
        let first = fx.service.submit(request(&["ServerA", "ServerB"])).await.unwrap();
        let second = fx.service.submit(request(&["ServerB", "ServerA"])).await.unwrap();

        assert!(!first.is_in_progress());
        assert!(second.is_in_progress());
        assert_eq!(first.run_id(), second.run_id());
        assert_eq!(fx.service.status().len(), 1);

        fx.gate.add_permits(16);
        let a = first.into_handle().wait().await.unwrap();
        let b = second.into_handle().wait().await.unwrap();
        assert_eq!(a.run_id(), b.run_id());
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.len().await, 1);
        assert!(fx.service.status().is_empty());
    }

    #[tokio::test]
    async fn cancelled_runs_persist_nothing() {
        let fx = fixture(false);
        let submission = fx.service.submit(request(&["ServerA", "ServerB"])).await.unwrap();
        let key_id = submission.key_id().clone();

        assert!(fx.service.cancel(&key_id));
        let err = submission.into_handle().wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(fx.store.is_empty().await);
        assert!(fx.service.status().is_empty());
        assert!(!fx.service.cancel(&key_id));
        assert_eq!(fx.service.get(&key_id).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn batch_failures_stay_isolated() {
        let fx = fixture(true);
        let results = fx
            .service
            .submit_batch(vec![
                request(&["ServerA", "ServerMissing"]),
                request(&["ServerA", "ServerC"]),
                request(&["ServerA"]),
            ])
            .await;

        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::Collection);
        assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::InvalidRequest);
        let started = results.into_iter().nth(1).unwrap().unwrap();
        let run = started.into_handle().wait().await.unwrap();
        assert_eq!(run.status(), RunStatus::Complete);
        assert_eq!(run.analysis().recommended_action(), GovernanceAction::Allow);
    }

    #[tokio::test]
    async fn groups_must_name_collected_tools() {
        let fx = fixture(true);
        let mut req = request(&["ServerA", "ServerB"]);
        req.groups = vec![vec![
            ToolRef::parse("ServerA", "get_secret_word").unwrap(),
            ToolRef::parse("ServerC", "list_colours").unwrap(),
        ]];
        let err = fx.service.submit(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn declaration_files_stay_under_the_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(
            root.path().join("ServerD.json"),
            br#"[{"name": "http_post", "description": "Sends data to a remote URL"}]"#,
        )
        .unwrap();
        std::fs::write(outside.path().join("ServerE.json"), b"[]").unwrap();
        let fx = fixture(true);
        let files = |paths: &[PathBuf]| SubmitRequest {
            server_names: vec!["ServerA".to_owned()],
            declaration_files: paths.to_vec(),
            ..SubmitRequest::default()
        };

        let unrooted = fx.service.submit(files(&[PathBuf::from("ServerD.json")])).await;
        assert_eq!(unrooted.unwrap_err().kind(), ErrorKind::InvalidRequest);

        let service = fx.service.clone().with_declarations_root(root.path());
        let run = service
            .submit_and_wait(files(&[PathBuf::from("./ServerD.json")]))
            .await
            .unwrap();
        assert_eq!(run.provenance().tool_count, 2);

        let escaping = PathBuf::from("..")
            .join(outside.path().file_name().unwrap())
            .join("ServerE.json");
        let missing = PathBuf::from("ServerZ.json");
        for path in [escaping, outside.path().join("ServerE.json"), missing.clone()] {
            let err = service.submit(files(&[path])).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest);
            assert!(err.to_string().contains("not available under the declarations root"));
        }

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(
                outside.path().join("ServerE.json"),
                root.path().join("ServerE.json"),
            )
            .unwrap();
            let linked = service
                .submit(files(&[PathBuf::from("ServerE.json")]))
                .await
                .unwrap_err();
            let missing = service.submit(files(&[missing])).await.unwrap_err();
            assert_eq!(linked.kind(), ErrorKind::InvalidRequest);
            assert_eq!(
                linked.to_string().replace("ServerE", "ServerZ"),
                missing.to_string()
            );
        }
        assert_eq!(fx.store.len().await, 1);
    }

    #[tokio::test]
    async fn drain_waits_for_runs_in_flight() {
        let fx = fixture(false);
        let submission = fx.service.submit(request(&["ServerA", "ServerB"])).await.unwrap();
        fx.gate.add_permits(16);

        assert_eq!(fx.service.drain(Duration::from_secs(5)).await, 0);
        assert_eq!(fx.store.len().await, 1);
        assert!(fx.service.status().is_empty());
        assert!(submission.into_handle().wait().await.is_ok());
        assert!(!fx.service.pipeline.scheduler().is_closed());
        assert_eq!(fx.service.drain(Duration::from_millis(1)).await, 0);
    }

    #[tokio::test]
    async fn drain_abandons_runs_past_the_grace_period() {
        let fx = fixture(false);
        let submission = fx.service.submit(request(&["ServerA", "ServerB"])).await.unwrap();

        assert_eq!(fx.service.drain(Duration::from_millis(50)).await, 1);
        let err = submission.into_handle().wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(fx.store.is_empty().await);
        assert!(fx.service.status().is_empty());
        assert!(fx.service.pipeline.scheduler().is_closed());
    }
}
