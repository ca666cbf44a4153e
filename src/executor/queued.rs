use super::{BackgroundExecutor, Job, TaskHandle, WorkItem};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// What [`QueuedExecutor::submit`] does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Wait until the worker frees a slot.
    #[default]
    Block,
    /// Fail immediately with [`Error::QueueFull`].
    Reject,
}

/// A bounded FIFO queue drained by a single worker task.
///
/// Items start in exactly the order they were accepted, one at a time. An
/// item cancelled before the worker reaches it is skipped without running.
///
/// # Examples
///
/// ```no_run
/// use outcall::executor::{BackgroundExecutor, QueuePolicy, QueuedExecutor, WorkItem};
///
/// # async fn example() -> Result<(), outcall::Error> {
/// let executor = QueuedExecutor::start("queued", 128, QueuePolicy::Reject)?;
///
/// executor
///     .submit(WorkItem::new(|_ctx, _cancel| async { Ok(()) }).labeled("refresh-token"))
///     .await?;
///
/// executor.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct QueuedExecutor {
    name: Arc<str>,
    capacity: usize,
    policy: QueuePolicy,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedExecutor {
    /// Creates the queue and spawns its worker on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if `capacity` is zero.
    pub fn start(name: impl Into<String>, capacity: usize, policy: QueuePolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ConfigurationError(
                "Queue capacity must be at least 1".to_string(),
            ));
        }

        let name: Arc<str> = Arc::from(name.into());
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = tokio::spawn(drain(Arc::clone(&name), receiver));

        tracing::info!(
            executor = %name,
            capacity = capacity,
            policy = ?policy,
            "Queued executor started"
        );

        Ok(Self {
            name,
            capacity,
            policy,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Maximum number of items waiting in the queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The configured full-queue policy.
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Number of accepted items the worker has not picked up yet.
    pub fn pending(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map_or(0, |sender| self.capacity - sender.capacity())
    }

    fn closed(&self) -> Error {
        Error::ExecutorClosed(self.name.to_string())
    }
}

#[async_trait]
impl BackgroundExecutor for QueuedExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, item: WorkItem) -> Result<TaskHandle> {
        let sender = self.sender.lock().clone().ok_or_else(|| self.closed())?;
        let (job, handle) = Job::new(&self.name, item);

        match self.policy {
            QueuePolicy::Block => sender.send(job).await.map_err(|_| self.closed())?,
            QueuePolicy::Reject => sender.try_send(job).map_err(|e| match e {
                TrySendError::Full(_) => {
                    tracing::warn!(
                        executor = %self.name,
                        capacity = self.capacity,
                        "Queue full, rejecting submission"
                    );
                    Error::QueueFull {
                        executor: self.name.to_string(),
                        capacity: self.capacity,
                    }
                }
                TrySendError::Closed(_) => self.closed(),
            })?,
        }

        tracing::debug!(executor = %self.name, task_id = %handle.id(), "Task queued");
        Ok(handle)
    }

    async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                tracing::error!(executor = %self.name, error = %error, "Queue worker failed");
            }
        }
    }
}

/// The worker loop: runs queued jobs one by one until every sender is gone.
async fn drain(name: Arc<str>, mut receiver: mpsc::Receiver<Job>) {
    while let Some(job) = receiver.recv().await {
        if job.cancel.is_cancelled() {
            tracing::debug!(
                executor = %name,
                task_id = %job.ctx.task_id(),
                "Skipping task cancelled before start"
            );
            continue;
        }
        job.run_contained().await;
    }
    tracing::info!(executor = %name, "Queued executor stopped");
}
