//! Background execution of deferred work.
//!
//! Callers that must not wait on an integration wrap the call in a
//! [`WorkItem`] and hand it to a [`BackgroundExecutor`], usually resolved by
//! name from an [`ExecutorRegistry`]:
//!
//! - [`QueuedExecutor`] keeps a bounded FIFO queue drained by one worker;
//! - [`ImmediateExecutor`] spawns every item right away.
//!
//! Failures inside a work item never reach the submitter: they are logged at
//! the executor boundary, and a panicking item does not take its executor down.
//!
//! # Examples
//!
//! ```no_run
//! use outcall::executor::{ExecutorRegistry, ImmediateExecutor, WorkItem, IMMEDIATE};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), outcall::Error> {
//! let registry = ExecutorRegistry::new();
//! registry.register(IMMEDIATE, Arc::new(ImmediateExecutor::new(IMMEDIATE)))?;
//!
//! let handle = registry
//!     .resolve(IMMEDIATE)?
//!     .submit(WorkItem::new(|ctx, cancel| async move {
//!         if cancel.is_cancelled() {
//!             return Ok(());
//!         }
//!         tracing::info!(task_id = %ctx.task_id(), "syncing boards");
//!         Ok(())
//!     }))
//!     .await?;
//!
//! // Changed our mind.
//! handle.cancel();
//! # Ok(())
//! # }
//! ```

mod immediate;
mod queued;
mod registry;

pub use immediate::ImmediateExecutor;
pub use queued::{QueuePolicy, QueuedExecutor};
pub use registry::{ExecutorRegistry, IMMEDIATE, QUEUED};

use crate::error::BoxError;
use crate::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// The future a work item runs.
pub type WorkFuture = Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send>>;

type WorkFn = Box<dyn FnOnce(ExecutionContext, CancellationToken) -> WorkFuture + Send>;

/// A deferred unit of work.
///
/// The work is a function of its [`ExecutionContext`] and a cancellation
/// token; it is not started until an executor runs it.
pub struct WorkItem {
    label: Option<String>,
    run: WorkFn,
}

impl WorkItem {
    /// Wraps `work` into an item.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: FnOnce(ExecutionContext, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        Self {
            label: None,
            run: Box::new(move |ctx, cancel| Box::pin(work(ctx, cancel))),
        }
    }

    /// Attaches a human-readable label, used in logs.
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The label, if one was attached.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl std::fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItem")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Per-item context, created fresh for every submission.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task_id: Uuid,
    executor: Arc<str>,
    label: Option<Arc<str>>,
    submitted_at: Instant,
}

impl ExecutionContext {
    fn new(executor: &Arc<str>, label: Option<&str>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            executor: Arc::clone(executor),
            label: label.map(Arc::from),
            submitted_at: Instant::now(),
        }
    }

    /// Unique id of this submission.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Name of the executor running the item.
    pub fn executor(&self) -> &str {
        &self.executor
    }

    /// The item's label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Time elapsed since submission.
    pub fn since_submitted(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// Returned to the submitter; lets it identify or cancel the work.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Uuid,
    cancel: CancellationToken,
}

impl TaskHandle {
    /// Id of the submitted task, matching [`ExecutionContext::task_id`].
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Requests cancellation.
    ///
    /// A queued item that has not started yet is skipped; a running item sees
    /// its token fire.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// An execution strategy for deferred work.
#[async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// The executor's registered name.
    fn name(&self) -> &str;

    /// Hands `item` to the executor.
    ///
    /// Returns once the executor has accepted the item, not when the item
    /// finishes.
    async fn submit(&self, item: WorkItem) -> Result<TaskHandle>;

    /// Stops accepting work and waits for accepted work to finish.
    async fn shutdown(&self);
}

/// An item together with everything needed to run it.
struct Job {
    ctx: ExecutionContext,
    cancel: CancellationToken,
    run: WorkFn,
}

impl Job {
    fn new(executor: &Arc<str>, item: WorkItem) -> (Self, TaskHandle) {
        let ctx = ExecutionContext::new(executor, item.label());
        let cancel = CancellationToken::new();
        let handle = TaskHandle {
            id: ctx.task_id(),
            cancel: cancel.clone(),
        };
        (
            Self {
                ctx,
                cancel,
                run: item.run,
            },
            handle,
        )
    }

    /// Runs the item on its own task and reports how it ended.
    ///
    /// Never fails: errors and panics are logged here.
    async fn run_contained(self) {
        let span = tracing::info_span!(
            "background_task",
            executor = %self.ctx.executor(),
            task_id = %self.ctx.task_id(),
            label = self.ctx.label().unwrap_or(""),
        );
        let queued_ms = self.ctx.since_submitted().as_millis() as u64;
        let future = (self.run)(self.ctx, self.cancel);

        async move {
            tracing::debug!(queued_ms = queued_ms, "Background task started");
            match tokio::spawn(future.in_current_span()).await {
                Ok(Ok(())) => tracing::debug!("Background task finished"),
                Ok(Err(error)) => tracing::error!(error = %error, "Background task failed"),
                Err(join_error) if join_error.is_panic() => {
                    tracing::error!("Background task panicked")
                }
                Err(join_error) => {
                    tracing::warn!(error = %join_error, "Background task aborted")
                }
            }
        }
        .instrument(span)
        .await
    }
}
