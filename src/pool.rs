//! Bounded-parallelism task pool.
//!
//! A [`TaskPool`] is created once by the process and handed to every
//! [`ObjectStore`](crate::store::ObjectStore) by clone; clones share the
//! same permit budget.  Each submitted unit runs on its own tokio task and
//! waits for a permit before doing any work, so at most `size` units make
//! progress at once across every user of the pool.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::errors::FsError;

/// Shared executor for independent remote operations.
#[derive(Debug, Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    size: usize,
}

/// Handle to one submitted unit of work.
#[derive(Debug)]
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T, FsError>>,
}

impl TaskPool {
    /// Create a pool allowing `size` concurrently running units (minimum 1).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum number of units running at once.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Submit a unit of work.  It starts once a permit is available.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T, FsError>> + Send + 'static,
        T: Send + 'static,
    {
        TaskHandle {
            inner: tokio::spawn(self.permitted(task)),
        }
    }

    /// Run `tasks` keeping at most `limit` of them submitted at once.  A
    /// finished task frees its slot for the next one straight away.
    ///
    /// After the first failure nothing more is submitted; tasks already in
    /// flight are awaited before the first error is returned.  On success
    /// the outputs are in submission order.
    pub async fn run_windowed<I, F, T>(&self, tasks: I, limit: usize) -> Result<Vec<T>, FsError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, FsError>> + Send + 'static,
        T: Send + 'static,
    {
        let limit = limit.max(1);
        let mut tasks = tasks.into_iter().enumerate();
        let mut in_flight = JoinSet::new();
        let mut outputs = Vec::new();
        let mut first_error = None;

        loop {
            while first_error.is_none() && in_flight.len() < limit {
                let Some((index, task)) = tasks.next() else {
                    break;
                };
                let task = self.permitted(task);
                in_flight.spawn(async move { (index, task.await) });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let result = match joined {
                Ok((index, result)) => result.map(|output| (index, output)),
                Err(join_err) => Err(FsError::TaskFailed {
                    message: format!("pool task did not complete: {join_err}"),
                }),
            };
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        outputs.sort_by_key(|(index, _)| *index);
        Ok(outputs.into_iter().map(|(_, output)| output).collect())
    }

    /// Wrap `task` so it waits for a pool permit before starting.
    fn permitted<F, T>(&self, task: F) -> impl Future<Output = Result<T, FsError>> + Send + 'static
    where
        F: Future<Output = Result<T, FsError>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| FsError::TaskFailed {
                    message: format!("task pool is closed: {e}"),
                })?;
            task.await
        }
    }

    /// Wait for every handle and return their results in submission order.
    ///
    /// A task that panicked or was cancelled is reported as an error in
    /// its slot; it never aborts the wait for the others.
    pub async fn await_all<T>(handles: Vec<TaskHandle<T>>) -> Vec<Result<T, FsError>> {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.inner.await {
                Ok(result) => result,
                Err(join_err) => Err(FsError::TaskFailed {
                    message: format!("pool task did not complete: {join_err}"),
                }),
            };
            results.push(result);
        }
        results
    }
}

// -- Tests -------------------------------------------------------------------
