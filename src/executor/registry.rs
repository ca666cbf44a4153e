use super::{BackgroundExecutor, TaskHandle, WorkItem};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Conventional name of the bounded-queue executor.
pub const QUEUED: &str = "queued";

/// Conventional name of the fire-and-forget executor.
pub const IMMEDIATE: &str = "immediate";

/// Executors addressed by name.
///
/// Executors are registered once at startup and resolved at each call site.
/// Names are unique: registering a taken name is an error, and deliberate
/// replacement goes through [`replace`](Self::replace).
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<BTreeMap<String, Arc<dyn BackgroundExecutor>>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `executor` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateExecutor`] if `name` is already taken.
    pub fn register(
        &self,
        name: impl Into<String>,
        executor: Arc<dyn BackgroundExecutor>,
    ) -> Result<()> {
        let name = name.into();
        let mut executors = self.executors.write();
        if executors.contains_key(&name) {
            return Err(Error::DuplicateExecutor(name));
        }
        tracing::debug!(executor = %name, "Executor registered");
        executors.insert(name, executor);
        Ok(())
    }

    /// Registers `executor` under `name`, returning the executor it displaced.
    pub fn replace(
        &self,
        name: impl Into<String>,
        executor: Arc<dyn BackgroundExecutor>,
    ) -> Option<Arc<dyn BackgroundExecutor>> {
        let name = name.into();
        tracing::info!(executor = %name, "Executor replaced");
        self.executors.write().insert(name, executor)
    }

    /// Looks up the executor registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExecutorNotFound`] if nothing is registered there.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BackgroundExecutor>> {
        self.executors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ExecutorNotFound(name.to_string()))
    }

    /// Resolves `name` and submits `item` to it.
    pub async fn submit(&self, name: &str, item: WorkItem) -> Result<TaskHandle> {
        let executor = self.resolve(name)?;
        executor.submit(item).await
    }

    /// Registered names, in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.executors.read().keys().cloned().collect()
    }

    /// Shuts every registered executor down.
    pub async fn shutdown_all(&self) {
        let executors: Vec<_> = self.executors.read().values().cloned().collect();
        for executor in executors {
            executor.shutdown().await;
        }
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.names())
            .finish()
    }
}
