//! Bounded fan-out for per-group oracle calls.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};

/// Default concurrency limit.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Maximum number of oracle calls in flight at once.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    max_concurrency: NonZeroUsize,
}

impl SchedulerConfig {
    /// Creates a new configuration with the supplied concurrency limit.
    #[must_use]
    pub const fn new(max_concurrency: NonZeroUsize) -> Self {
        Self { max_concurrency }
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub const fn max_concurrency(self) -> NonZeroUsize {
        self.max_concurrency
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(NonZeroUsize::MIN.saturating_add(DEFAULT_MAX_CONCURRENCY - 1))
    }
}

/// Semaphore-gated spawner shared by every run of a service.
///
/// Tasks go into a caller-owned [`JoinSet`], so dropping the set aborts
/// whatever is still queued or running.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Constructs a scheduler using the provided configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let permits = config.max_concurrency().get();
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Returns the associated configuration.
    #[must_use]
    pub const fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Returns `true` if the scheduler has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the scheduler, preventing new tasks from being spawned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.semaphore.close();
    }

    /// Spawns a future into `set`, respecting the configured concurrency limit.
    ///
    /// The task resolves to [`SchedulerError::Closed`] if the scheduler is
    /// closed while it waits for a permit.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler is closed before the
    /// task is enqueued.
    pub fn spawn_into<F, T>(
        &self,
        set: &mut JoinSet<SchedulerResult<T>>,
        future: F,
    ) -> SchedulerResult<AbortHandle>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let semaphore = Arc::clone(&self.semaphore);
        Ok(set.spawn(async move {
            let Ok(permit) = semaphore.acquire_owned().await else {
                return Err(SchedulerError::Closed);
            };
            let output = future.await;
            drop(permit);
            Ok(output)
        }))
    }

    /// Returns the number of permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Scheduler is closed and will not accept new tasks.
    #[error("scheduler closed")]
    Closed,
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn respects_max_concurrency() {
        let config = SchedulerConfig::new(NonZeroUsize::new(2).unwrap());
        let scheduler = TaskScheduler::new(config);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for _ in 0..3 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            scheduler
                .spawn_into(&mut set, async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        while let Some(joined) = set.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.available(), 2);
    }

    #[tokio::test]
    async fn close_prevents_new_tasks() {
        let scheduler = TaskScheduler::default();
        scheduler.close();

        let mut set = JoinSet::<SchedulerResult<()>>::new();
        let result = scheduler.spawn_into(&mut set, async move {});
        assert_eq!(result.unwrap_err(), SchedulerError::Closed);
    }

    #[tokio::test]
    async fn dropping_the_set_aborts_queued_work() {
        let scheduler = TaskScheduler::new(SchedulerConfig::new(NonZeroUsize::new(1).unwrap()));
        let finished = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for _ in 0..3 {
            let finished = Arc::clone(&finished);
            scheduler
                .spawn_into(&mut set, async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        drop(set);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.available(), 1);
    }
}
