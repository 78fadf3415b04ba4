//! Synchronous and asynchronous task execution.
//!
//! [`Scheduler::sync`] runs a task to completion in the caller. Asynchronous
//! work goes through a [`Scope`]: [`Scope::spawn`] hands a task to the tokio
//! runtime and returns once it is submitted, [`Scope::wait`] drains every task
//! submitted since the previous wait.
//!
//! A failing task never cancels its running siblings; all of them are drained
//! and the first failure is reported by `wait`. Dropping a scope without
//! waiting aborts whatever it still owns.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, debug_span, warn, Instrument, Span};

use crate::error::{ShuttleError, ShuttleResult};
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct Scheduler {
    max_in_flight: usize,
}

impl Scheduler {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Runs `task` to completion; its fault is returned to the caller.
    pub async fn sync<T: Task>(&self, task: T) -> ShuttleResult<T::Output> {
        let span = task_span(&task);
        task.execute().instrument(span).await
    }

    /// Opens a new asynchronous scope. At most `max_in_flight` of its tasks
    /// run at once; further submissions wait for a slot.
    pub fn scope(&self) -> Scope {
        Scope {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(self.max_in_flight)),
            submitted: 0,
        }
    }
}

fn task_span<T: Task>(task: &T) -> Span {
    let meta = task.meta();
    let parent = meta.parent.map(|p| p.to_string()).unwrap_or_default();
    debug_span!("task", kind = task.kind(), id = %meta.id, parent = %parent)
}

pub struct Scope {
    tasks: JoinSet<ShuttleResult<()>>,
    permits: Arc<Semaphore>,
    submitted: usize,
}

/// A slot in a scope's in-flight budget, held from before a task is planned
/// until it finishes executing.
#[derive(Debug)]
pub struct Slot(OwnedSemaphorePermit);

impl Scope {
    /// Submits `task` for concurrent execution.
    pub async fn spawn<T: Task<Output = ()>>(&mut self, task: T) -> ShuttleResult<()> {
        let slot = self.reserve().await?;
        self.spawn_reserved(slot, task);
        Ok(())
    }

    /// Waits for a free slot. Planning that allocates (stream buffers) takes
    /// the slot first, so at most `max_in_flight` tasks are planned or running.
    pub async fn reserve(&self) -> ShuttleResult<Slot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ShuttleError::Internal {
                message: format!("scheduler permits unavailable: {}", e),
            })?;
        Ok(Slot(permit))
    }

    /// Submits `task` into a slot obtained from [`Scope::reserve`].
    pub fn spawn_reserved<T: Task<Output = ()>>(&mut self, slot: Slot, task: T) {
        let span = task_span(&task);
        self.tasks.spawn(
            async move {
                let result = task.execute().await;
                drop(slot);
                result
            }
            .instrument(span),
        );
        self.submitted += 1;
    }

    /// Tasks submitted since the last [`Scope::wait`].
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Blocks until every submitted task has finished.
    pub async fn wait(&mut self) -> ShuttleResult<()> {
        let total = std::mem::take(&mut self.submitted);
        let mut failed = 0;
        let mut first: Option<ShuttleError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = joined.map_err(ShuttleError::from).and_then(|result| result);
            if let Err(e) = outcome {
                failed += 1;
                if first.is_none() {
                    first = Some(e);
                } else {
                    debug!("Additional task failure: {}", e);
                }
            }
        }

        match first {
            None => Ok(()),
            Some(source) => {
                warn!("{} of {} tasks failed", failed, total);
                Err(ShuttleError::PartialFailure {
                    failed,
                    total,
                    source: Box::new(source),
                })
            }
        }
    }
}
