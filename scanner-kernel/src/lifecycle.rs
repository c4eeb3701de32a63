//! Run lifecycle state machine.

use scanner_primitives::{KeyId, RunId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Discrete states a run occupies between submission and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Accepted but not yet started.
    Queued,
    /// Deriving capability vectors for the collected tools.
    Classifying,
    /// Building candidate groups.
    Searching,
    /// Oracle calls in flight.
    Evaluating,
    /// Merging and scoring fragments.
    Aggregating,
    /// Writing the run to the store.
    Persisting,
    /// Run stored.
    Completed,
    /// Run ended with an error; nothing usable was stored.
    Failed,
    /// Run was cancelled; nothing was stored.
    Cancelled,
}

impl RunState {
    /// Returns `true` once no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Events that trigger lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// Start classifying tools.
    Classify,
    /// Start generating the search space.
    Search,
    /// Start the oracle fan-out.
    Evaluate,
    /// Start merging.
    Aggregate,
    /// Start persisting.
    Persist,
    /// Finish after persisting.
    Complete,
    /// Abort with an error.
    Fail,
    /// Abort on request.
    Cancel,
}

/// Lifecycle state manager for one run.
#[derive(Debug, Clone)]
pub struct RunLifecycle {
    key_id: KeyId,
    run_id: RunId,
    state: RunState,
}

impl RunLifecycle {
    /// Constructs a lifecycle controller for the given run.
    #[must_use]
    pub const fn new(key_id: KeyId, run_id: RunId) -> Self {
        Self {
            key_id,
            run_id,
            state: RunState::Queued,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Applies an event, returning the resulting state.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: RunEvent) -> LifecycleResult<RunState> {
        use RunEvent as E;
        use RunState as S;

        let next = match (self.state, event) {
            (S::Queued, E::Classify) => Some(S::Classifying),
            (S::Classifying, E::Search) => Some(S::Searching),
            (S::Searching, E::Evaluate) => Some(S::Evaluating),
            (S::Evaluating, E::Aggregate) => Some(S::Aggregating),
            (S::Aggregating, E::Persist) => Some(S::Persisting),
            (S::Persisting, E::Complete) => Some(S::Completed),
            (state, E::Fail) if !state.is_terminal() => Some(S::Failed),
            (state, E::Cancel) if !state.is_terminal() => Some(S::Cancelled),
            _ => None,
        };

        let Some(next_state) = next else {
            return Err(LifecycleError::InvalidTransition {
                key_id: self.key_id.clone(),
                from: self.state,
                event,
            });
        };

        debug!(
            key_id = %self.key_id.short(),
            run_id = %self.run_id,
            from = ?self.state,
            to = ?next_state,
            "run lifecycle transition"
        );
        self.state = next_state;
        Ok(next_state)
    }
}

/// Errors emitted by the lifecycle controller.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid run transition from {from:?} via {event:?} for composition {key_id}")]
    InvalidTransition {
        /// Composition whose run failed to transition.
        key_id: KeyId,
        /// State prior to the attempted transition.
        from: RunState,
        /// Event that triggered the failure.
        event: RunEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
