use super::{BackgroundExecutor, Job, TaskHandle, WorkItem};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Fire-and-forget execution: every item gets its own task at once.
///
/// There is no queue and no ordering between items. The cancellation token is
/// handed to the item, which is expected to check it itself.
///
/// Intake and [`shutdown`](BackgroundExecutor::shutdown) are serialized: an
/// item accepted by `submit` is always awaited by a concurrent shutdown.
#[derive(Debug)]
pub struct ImmediateExecutor {
    name: Arc<str>,
    tracker: TaskTracker,
    closed: Mutex<bool>,
}

impl ImmediateExecutor {
    /// Creates an executor spawning onto the current Tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            tracker: TaskTracker::new(),
            closed: Mutex::new(false),
        }
    }

    /// Number of items still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

#[async_trait]
impl BackgroundExecutor for ImmediateExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, item: WorkItem) -> Result<TaskHandle> {
        let closed = self.closed.lock();
        if *closed {
            return Err(Error::ExecutorClosed(self.name.to_string()));
        }

        let (job, handle) = Job::new(&self.name, item);
        tracing::debug!(executor = %self.name, task_id = %handle.id(), "Task spawned");
        self.tracker.spawn(job.run_contained());
        drop(closed);
        Ok(handle)
    }

    async fn shutdown(&self) {
        {
            let mut closed = self.closed.lock();
            *closed = true;
            self.tracker.close();
        }
        self.tracker.wait().await;
        tracing::info!(executor = %self.name, "Immediate executor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_waits_for_every_accepted_item() {
        let executor = Arc::new(ImmediateExecutor::new("immediate"));
        let ran = Arc::new(AtomicUsize::new(0));

        let submitters: Vec<_> = (0..64)
            .map(|_| {
                let executor = Arc::clone(&executor);
                let ran = Arc::clone(&ran);
                tokio::spawn(async move {
                    executor
                        .submit(WorkItem::new(move |_, _| async move {
                            tokio::task::yield_now().await;
                            ran.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }))
                        .await
                })
            })
            .collect();

        executor.shutdown().await;
        let ran_at_shutdown = ran.load(Ordering::SeqCst);

        let mut accepted = 0;
        for submitter in submitters {
            match submitter.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(error) => assert!(matches!(error, Error::ExecutorClosed(_))),
            }
        }
        assert_eq!(ran_at_shutdown, accepted);
    }
}
