//! Keyed registry of in-flight runs.
//!
//! At most one run per composition is in flight. A second submission for the
//! same key receives a [`RunHandle`] on the existing run instead of starting
//! another one; distinct keys never contend beyond a short map lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use scanner_primitives::{AnalysisRun, KeyId, RunId, ServerSet};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::lifecycle::RunState;

/// Final result of a run as observed by every waiter.
pub type RunOutcome = Result<AnalysisRun, Arc<PipelineError>>;

/// Progress broadcast by an in-flight run.
#[derive(Debug, Clone)]
pub enum RunProgress {
    /// The run is still going.
    Running(RunState),
    /// The run has finished.
    Finished(RunOutcome),
}

/// Snapshot of one in-flight run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightRun {
    /// Composition under analysis.
    pub key_id: KeyId,
    /// Run identifier.
    pub run_id: RunId,
    /// Servers named by the submission.
    pub servers: ServerSet,
    /// Current lifecycle state.
    pub state: RunState,
    /// When the run was registered.
    pub started_at: DateTime<Utc>,
}

struct Entry {
    run_id: RunId,
    servers: ServerSet,
    started_at: DateTime<Utc>,
    progress: watch::Receiver<RunProgress>,
    abort: Option<AbortHandle>,
    cancel_requested: bool,
}

type Entries = Arc<Mutex<HashMap<KeyId, Entry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<KeyId, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of [`InFlightRegistry::begin`].
#[derive(Debug)]
pub enum Begin {
    /// No run was in flight; the caller owns the new run.
    Started(RunGuard),
    /// A run for the key is already in flight.
    InProgress(RunHandle),
}

/// Registry of in-flight runs keyed by composition identity.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    entries: Entries,
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("in_flight", &self.len())
            .finish()
    }
}

impl InFlightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run for `key_id`, or joins the one already in flight.
    #[must_use]
    pub fn begin(&self, key_id: &KeyId, servers: ServerSet) -> Begin {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get(key_id) {
            debug!(key_id = %key_id.short(), run_id = %entry.run_id, "joining in-flight run");
            return Begin::InProgress(RunHandle {
                key_id: key_id.clone(),
                run_id: entry.run_id,
                progress: entry.progress.clone(),
            });
        }

        let run_id = RunId::random();
        let (sender, receiver) = watch::channel(RunProgress::Running(RunState::Queued));
        entries.insert(
            key_id.clone(),
            Entry {
                run_id,
                servers,
                started_at: Utc::now(),
                progress: receiver,
                abort: None,
                cancel_requested: false,
            },
        );
        Begin::Started(RunGuard {
            entries: Arc::clone(&self.entries),
            key_id: key_id.clone(),
            run_id,
            progress: sender,
            finished: false,
        })
    }

    /// Associates the task driving a run with its entry so it can be
    /// cancelled. Aborts immediately if cancellation was already requested.
    pub fn attach(&self, key_id: &KeyId, run_id: RunId, abort: AbortHandle) {
        let mut entries = lock(&self.entries);
        match entries.get_mut(key_id) {
            Some(entry) if entry.run_id == run_id => {
                if entry.cancel_requested {
                    abort.abort();
                }
                entry.abort = Some(abort);
            }
            _ => {}
        }
    }

    /// Requests cancellation of the run in flight for `key_id`.
    ///
    /// Returns `false` if nothing was in flight.
    pub fn cancel(&self, key_id: &KeyId) -> bool {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(key_id) else {
            return false;
        };
        entry.cancel_requested = true;
        if let Some(abort) = &entry.abort {
            abort.abort();
        }
        info!(key_id = %key_id.short(), run_id = %entry.run_id, "cancellation requested");
        true
    }

    /// Returns a handle on the run in flight for `key_id`, if any.
    #[must_use]
    pub fn get(&self, key_id: &KeyId) -> Option<RunHandle> {
        lock(&self.entries).get(key_id).map(|entry| RunHandle {
            key_id: key_id.clone(),
            run_id: entry.run_id,
            progress: entry.progress.clone(),
        })
    }

    /// Returns a handle on every in-flight run.
    #[must_use]
    pub fn handles(&self) -> Vec<RunHandle> {
        lock(&self.entries)
            .iter()
            .map(|(key_id, entry)| RunHandle {
                key_id: key_id.clone(),
                run_id: entry.run_id,
                progress: entry.progress.clone(),
            })
            .collect()
    }

    /// Returns every in-flight run, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InFlightRun> {
        let entries = lock(&self.entries);
        let mut runs: Vec<InFlightRun> = entries
            .iter()
            .map(|(key_id, entry)| InFlightRun {
                key_id: key_id.clone(),
                run_id: entry.run_id,
                servers: entry.servers.clone(),
                state: match &*entry.progress.borrow() {
                    RunProgress::Running(state) => *state,
                    RunProgress::Finished(Ok(_)) => RunState::Completed,
                    RunProgress::Finished(Err(_)) => RunState::Failed,
                },
                started_at: entry.started_at,
            })
            .collect();
        runs.sort_by(|a, b| (a.started_at, &a.key_id).cmp(&(b.started_at, &b.key_id)));
        runs
    }

    /// Returns the number of in-flight runs.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

/// Ownership of an in-flight run.
///
/// Finishing the guard publishes the outcome and frees the key. Dropping it
/// unfinished (for example when the driving task is aborted) publishes
/// [`PipelineError::Cancelled`].
pub struct RunGuard {
    entries: Entries,
    key_id: KeyId,
    run_id: RunId,
    progress: watch::Sender<RunProgress>,
    finished: bool,
}

impl std::fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard")
            .field("key_id", &self.key_id)
            .field("run_id", &self.run_id)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl RunGuard {
    /// Composition under analysis.
    #[must_use]
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Identifier reserved for the run.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns an observer of this run.
    #[must_use]
    pub fn handle(&self) -> RunHandle {
        RunHandle {
            key_id: self.key_id.clone(),
            run_id: self.run_id,
            progress: self.progress.subscribe(),
        }
    }

    /// Publishes a lifecycle state.
    pub fn set_state(&self, state: RunState) {
        self.progress.send_replace(RunProgress::Running(state));
    }

    /// Publishes the outcome and frees the key.
    pub fn finish(mut self, outcome: RunOutcome) {
        self.release(outcome);
    }

    fn release(&mut self, outcome: RunOutcome) {
        self.finished = true;
        {
            let mut entries = lock(&self.entries);
            if entries.get(&self.key_id).is_some_and(|entry| entry.run_id == self.run_id) {
                entries.remove(&self.key_id);
            }
        }
        self.progress.send_replace(RunProgress::Finished(outcome));
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!(key_id = %self.key_id.short(), run_id = %self.run_id, "run dropped before finishing");
            self.release(Err(Arc::new(PipelineError::Cancelled)));
        }
    }
}

/// Observer of an in-flight run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    key_id: KeyId,
    run_id: RunId,
    progress: watch::Receiver<RunProgress>,
}

impl RunHandle {
    /// Composition under analysis.
    #[must_use]
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Identifier of the in-flight run.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Latest published lifecycle state, or `None` once finished.
    #[must_use]
    pub fn state(&self) -> Option<RunState> {
        match &*self.progress.borrow() {
            RunProgress::Running(state) => Some(*state),
            RunProgress::Finished(_) => None,
        }
    }

    /// Waits for the run to finish.
    pub async fn wait(mut self) -> RunOutcome {
        let outcome = match self
            .progress
            .wait_for(|progress| matches!(progress, RunProgress::Finished(_)))
            .await
        {
            Ok(progress) => match &*progress {
                RunProgress::Finished(outcome) => outcome.clone(),
                RunProgress::Running(_) => Err(Arc::new(PipelineError::Cancelled)),
            },
            Err(_) => Err(Arc::new(PipelineError::Cancelled)),
        };
        outcome
    }
}
