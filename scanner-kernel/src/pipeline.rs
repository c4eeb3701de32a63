//! One analysis run: classify, search, fan out, merge, persist.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use scanner_oracle::{HeuristicMapper, OracleError, OracleGateway, OracleRequest};
use scanner_policy::Aggregator;
use scanner_primitives::{
    AnalysisFragment, AnalysisRun, CapabilityMap, CompositionKey, FailureKind, GroupFailure,
    Provenance, ToolDeclaration, ToolRef,
};
use scanner_store::AnalysisStore;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::lifecycle::{RunEvent, RunLifecycle, RunState};
use crate::registry::RunGuard;
use crate::scheduler::{SchedulerResult, TaskScheduler};
use crate::search::{SearchConfig, SearchGenerator};

/// How candidate groups are turned into oracle calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// One oracle call per candidate group.
    #[default]
    PerGroup,
    /// One oracle call covering every collected tool.
    Whole,
}

/// Run-level switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Call granularity.
    pub batching: BatchStrategy,
    /// Ask the oracle to classify tools up front and send the vectors with
    /// every group.
    pub pre_classify: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batching: BatchStrategy::PerGroup,
            pre_classify: true,
        }
    }
}

/// Collected input for one run.
#[derive(Clone, Debug)]
pub struct RunInput {
    /// Composition identity derived from every collected tool.
    pub key: CompositionKey,
    /// Collected declarations.
    pub declarations: Vec<ToolDeclaration>,
    /// Explicit higher-order groups.
    pub groups: Vec<Vec<ToolRef>>,
}

type GroupOutcome = (usize, Result<AnalysisFragment, OracleError>);

struct Violation {
    group: String,
    attempts: u32,
    reason: String,
}

struct Evaluation {
    fragments: Vec<(usize, AnalysisFragment)>,
    failures: Vec<(usize, GroupFailure)>,
    violation: Option<Violation>,
}

/// Drives runs from collected declarations to a persisted [`AnalysisRun`].
pub struct AnalysisPipeline {
    gateway: OracleGateway,
    store: Arc<dyn AnalysisStore>,
    aggregator: Aggregator,
    mapper: HeuristicMapper,
    search: SearchGenerator,
    scheduler: TaskScheduler,
    options: PipelineOptions,
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("gateway", &self.gateway)
            .field("search", &self.search)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AnalysisPipeline {
    /// Creates a pipeline with default search, scoring, and concurrency.
    ///
    /// # Errors
    ///
    /// Never fails with the default search configuration; the `Result`
    /// mirrors [`SearchGenerator::new`].
    pub fn new(gateway: OracleGateway, store: Arc<dyn AnalysisStore>) -> PipelineResult<Self> {
        Ok(Self {
            gateway,
            store,
            aggregator: Aggregator::default(),
            mapper: HeuristicMapper::new(),
            search: SearchGenerator::new(SearchConfig::default())?,
            scheduler: TaskScheduler::default(),
            options: PipelineOptions::default(),
        })
    }

    /// Replaces the aggregator.
    #[must_use]
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Replaces the local capability mapper.
    #[must_use]
    pub fn with_mapper(mut self, mapper: HeuristicMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Replaces the search generator.
    #[must_use]
    pub fn with_search(mut self, search: SearchGenerator) -> Self {
        self.search = search;
        self
    }

    /// Replaces the fan-out scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: TaskScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Replaces the run options.
    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the store runs are persisted to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    /// Returns the oracle gateway.
    #[must_use]
    pub fn gateway(&self) -> &OracleGateway {
        &self.gateway
    }

    /// Returns the fan-out scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Executes one run under `guard` and persists the result.
    ///
    /// Group timeouts and transport failures mark the group failed and the
    /// run incomplete. A contract violation cancels the remaining groups and
    /// persists whatever had completed as an aborted run. A run in which no
    /// group succeeded persists nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for search failures, contract violations,
    /// runs where every group failed, and store failures.
    pub async fn run(&self, input: RunInput, guard: &RunGuard) -> PipelineResult<AnalysisRun> {
        let span = info_span!(
            "analysis",
            key_id = %input.key.id().short(),
            run_id = %guard.run_id()
        );
        let mut lifecycle = RunLifecycle::new(input.key.id().clone(), guard.run_id());
        let result = self.execute(input, guard, &mut lifecycle).instrument(span).await;
        if result.is_err() && !lifecycle.state().is_terminal() {
            lifecycle.transition(RunEvent::Fail)?;
            guard.set_state(RunState::Failed);
        }
        result
    }

    async fn execute(
        &self,
        input: RunInput,
        guard: &RunGuard,
        lifecycle: &mut RunLifecycle,
    ) -> PipelineResult<AnalysisRun> {
        let started_at = Utc::now();
        let RunInput {
            key,
            declarations,
            groups,
        } = input;

        advance(lifecycle, guard, RunEvent::Classify)?;
        let vectors = self.classify(&declarations).await;

        advance(lifecycle, guard, RunEvent::Search)?;
        let space = self.search.generate(&declarations, &groups, &vectors)?;
        let units: Vec<Vec<ToolDeclaration>> = match self.options.batching {
            BatchStrategy::PerGroup => space
                .groups
                .iter()
                .map(|group| group.tools().to_vec())
                .collect(),
            BatchStrategy::Whole => vec![declarations.clone()],
        };
        info!(
            tools = declarations.len(),
            enumerated = space.enumerated,
            calls = units.len(),
            "search space ready"
        );

        advance(lifecycle, guard, RunEvent::Evaluate)?;
        let attach = self.options.pre_classify.then_some(&vectors);
        let evaluation = self.evaluate(&key, units, attach).await?;

        advance(lifecycle, guard, RunEvent::Aggregate)?;
        let Evaluation {
            mut fragments,
            mut failures,
            violation,
        } = evaluation;
        fragments.sort_by_key(|(index, _)| *index);
        failures.sort_by_key(|(index, _)| *index);
        let failures: Vec<GroupFailure> = failures.into_iter().map(|(_, failure)| failure).collect();
        let groups_evaluated = fragments.len();

        if fragments.is_empty() && (violation.is_some() || !failures.is_empty()) {
            return Err(match violation {
                Some(Violation {
                    group,
                    attempts,
                    reason,
                }) => PipelineError::ContractViolation {
                    group,
                    attempts,
                    reason,
                    partial_run: None,
                },
                None => PipelineError::AllGroupsFailed { failures },
            });
        }

        let analysis = self
            .aggregator
            .merge(fragments.into_iter().map(|(_, fragment)| fragment));
        let descriptor = self.gateway.descriptor();
        let provenance = Provenance {
            started_at,
            completed_at: Utc::now(),
            tool_count: declarations.len(),
            groups_enumerated: space.enumerated,
            groups_evaluated,
            oracle_model: descriptor.to_string(),
            temperature: descriptor.temperature,
        };
        let mut run = AnalysisRun::new(key, analysis, provenance)
            .with_run_id(guard.run_id())
            .with_failures(failures);
        if let Some(violation) = &violation {
            run = run.aborted(violation.reason.clone());
        }

        advance(lifecycle, guard, RunEvent::Persist)?;
        self.store.append(&run).await?;

        if let Some(Violation {
            group,
            attempts,
            reason,
        }) = violation
        {
            warn!(status = ?run.status(), "persisted partial analysis of an aborted run");
            return Err(PipelineError::ContractViolation {
                group,
                attempts,
                reason,
                partial_run: Some(run.run_id()),
            });
        }

        advance(lifecycle, guard, RunEvent::Complete)?;
        info!(
            status = ?run.status(),
            risk = %run.analysis().risk_score(),
            action = %run.analysis().recommended_action(),
            surpluses = run.analysis().surpluses().len(),
            failed_groups = run.failed_groups().len(),
            "analysis stored"
        );
        Ok(run)
    }

    async fn classify(&self, declarations: &[ToolDeclaration]) -> CapabilityMap {
        let mut vectors = self.mapper.map_all(declarations);
        if self.options.pre_classify {
            match self.gateway.classify(declarations).await {
                Ok(remote) => vectors.merge_all(&remote),
                Err(err) => warn!(error = %err, "oracle classification failed; using local vectors"),
            }
        }
        vectors
    }

    async fn evaluate(
        &self,
        key: &CompositionKey,
        units: Vec<Vec<ToolDeclaration>>,
        vectors: Option<&CapabilityMap>,
    ) -> PipelineResult<Evaluation> {
        let mut set: JoinSet<SchedulerResult<GroupOutcome>> = JoinSet::new();
        let mut members: Vec<Vec<ToolRef>> = Vec::with_capacity(units.len());

        for (index, tools) in units.into_iter().enumerate() {
            members.push(tools.iter().map(|decl| decl.tool_ref().clone()).collect());
            let mut request = OracleRequest::new(key.clone(), tools)?;
            if let Some(vectors) = vectors {
                request = request.with_capability_vectors(vectors);
            }
            let gateway = self.gateway.clone();
            self.scheduler.spawn_into(&mut set, async move {
                (index, gateway.analyze(&request).await)
            })?;
        }

        let mut pending: BTreeSet<usize> = (0..members.len()).collect();
        let mut evaluation = Evaluation {
            fragments: Vec::new(),
            failures: Vec::new(),
            violation: None,
        };
        let failure = |index: usize, kind: FailureKind, message: String| {
            (
                index,
                GroupFailure {
                    tools: members[index].clone(),
                    kind,
                    message,
                },
            )
        };

        while let Some(joined) = set.join_next().await {
            // Aborted, panicked, and permit-starved tasks carry no index; they
            // are accounted for from `pending` below.
            let Ok(Ok((index, outcome))) = joined else {
                continue;
            };
            pending.remove(&index);

            match outcome {
                Ok(fragment) => {
                    debug!(group = index, surpluses = fragment.surpluses.len(), "group evaluated");
                    evaluation.fragments.push((index, fragment));
                }
                Err(err) if err.failure_kind() == FailureKind::ContractViolation => {
                    warn!(group = index, error = %err, "contract violation; cancelling remaining groups");
                    evaluation
                        .failures
                        .push(failure(index, FailureKind::ContractViolation, err.to_string()));
                    if evaluation.violation.is_none() {
                        let attempts = match &err {
                            OracleError::ContractViolation { attempts, .. } => *attempts,
                            _ => 1,
                        };
                        evaluation.violation = Some(Violation {
                            group: join_refs(&members[index]),
                            attempts,
                            reason: err.to_string(),
                        });
                    }
                    set.abort_all();
                }
                Err(err) => {
                    warn!(group = index, error = %err, "group failed");
                    evaluation
                        .failures
                        .push(failure(index, err.failure_kind(), err.to_string()));
                }
            }
        }

        let (kind, message) = if evaluation.violation.is_some() {
            (FailureKind::Cancelled, "cancelled after a contract violation")
        } else {
            (FailureKind::Unavailable, "oracle task ended without a result")
        };
        for index in pending {
            evaluation
                .failures
                .push(failure(index, kind, message.to_owned()));
        }
        Ok(evaluation)
    }
}

fn advance(lifecycle: &mut RunLifecycle, guard: &RunGuard, event: RunEvent) -> PipelineResult<()> {
    let state = lifecycle.transition(event)?;
    guard.set_state(state);
    Ok(())
}

fn join_refs(tools: &[ToolRef]) -> String {
    tools
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" + ")
}
