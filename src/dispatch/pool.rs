use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A worker task that panicked or was cancelled instead of returning
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("worker task panicked: {0}")]
pub struct TaskPanic(pub String);

/// Fan-out helper: runs one task per input with at most `max_workers` in flight
#[derive(Debug, Clone, Copy)]
pub struct BoundedPool {
    max_workers: usize,
}

impl BoundedPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    /// Effective pool size for `task_count` tasks
    pub fn size_for(&self, task_count: usize) -> usize {
        self.max_workers.min(task_count)
    }

    /// Run `task` for every input and wait for all of them
    ///
    /// Results come back in input order. A panicking task yields `Err(TaskPanic)`
    /// for its own slot only.
    pub async fn run<I, O, F, Fut>(&self, inputs: Vec<I>, task: F) -> Vec<Result<O, TaskPanic>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = O> + Send + 'static,
        O: Send + 'static,
    {
        let total = inputs.len();
        let workers = self.size_for(total);
        if workers == 0 {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let work = task(input);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = AssertUnwindSafe(work).catch_unwind().await.map_err(panic_message);
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<O, TaskPanic>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!("Worker task ended abnormally: {}", e),
            }
        }

        results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(TaskPanic("task cancelled".to_string()))))
            .collect()
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> TaskPanic {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    TaskPanic(message)
}
