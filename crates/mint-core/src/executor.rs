//! Bounded concurrency executor
//!
//! Runs independent units of work with at most `limit` in flight. A unit that
//! fails (or panics) is recorded and never aborts its siblings.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::debug;

/// Failure of a single unit of work
#[derive(Debug, Error)]
pub enum TaskError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("task aborted: {0}")]
    Aborted(String),
}

/// Per-unit results in submission order
#[derive(Debug)]
pub struct ExecutionSummary<T, E> {
    pub results: Vec<Result<T, TaskError<E>>>,
}

impl<T, E> ExecutionSummary<T, E> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Executor capping the number of simultaneously running units
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    limit: usize,
}

impl BoundedExecutor {
    /// Create an executor; a limit of zero is treated as one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work` over every item, starting the next queued item as soon as a
    /// running one completes, and return once all have completed.
    pub async fn run<I, T, E, F, Fut>(&self, items: Vec<I>, work: F) -> ExecutionSummary<T, E>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(items.len());

        debug!(units = items.len(), limit = self.limit, "Starting bounded execution");

        for item in items {
            // The semaphore is owned here and never closed
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let work = work.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit; // Hold permit until the unit completes
                work(item).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(TaskError::Failed(err)),
                Err(join_err) => Err(TaskError::Aborted(join_err.to_string())),
            });
        }

        ExecutionSummary { results }
    }
}
