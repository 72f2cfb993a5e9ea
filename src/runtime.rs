//! Worker pool for parallel sub-operations.
//!
//! Sub-operations of a multi-destination operation run as tasks on a
//! [`WorkerPool`]. The pool is either the ambient tokio runtime (the default,
//! and what tests use) or a dedicated multi-thread runtime with named threads,
//! which keeps fan-out work from competing with the caller's own runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use kvgrid::runtime::{WorkerPool, WorkerPoolConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorkerPoolConfig {
//!         worker_threads: Some(4),
//!         ..Default::default()
//!     };
//!     let pool = WorkerPool::new(&config)?;
//!     let answer = pool.handle().block_on(async { 42 });
//!     assert_eq!(answer, 42);
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::parse_var;
use crate::error::{GridError, GridResult};
use crate::metrics;

/// Configuration of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of dedicated worker threads.
    ///
    /// `None` runs sub-operations on the ambient runtime.
    ///
    /// Default: `None`
    pub worker_threads: Option<usize>,

    /// Thread name prefix for dedicated worker threads.
    ///
    /// Default: "grid-worker"
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: "grid-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create configuration from environment variables.
    ///
    /// - `GRID_WORKER_THREADS`: dedicated worker threads, `0` for the ambient runtime
    /// - `GRID_WORKER_THREAD_NAME`: thread name prefix
    pub fn from_env() -> GridResult<Self> {
        let defaults = Self::default();

        let threads: usize = parse_var("GRID_WORKER_THREADS", 0)?;
        let thread_name = std::env::var("GRID_WORKER_THREAD_NAME")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(defaults.thread_name);

        Ok(Self {
            worker_threads: (threads > 0).then_some(threads),
            thread_name,
        })
    }
}

/// Owned runtime, shut down without blocking when the last pool clone drops.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

/// Cloneable handle to the runtime that runs sub-operation tasks.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    owned: Option<Arc<OwnedRuntime>>,
    spawned: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Build a pool from configuration.
    ///
    /// Without dedicated threads this must be called from within a tokio runtime.
    pub fn new(config: &WorkerPoolConfig) -> GridResult<Self> {
        match config.worker_threads {
            None => Self::try_current(),
            Some(0) => Err(GridError::Config(
                "worker_threads must be at least 1 when set".to_string(),
            )),
            Some(threads) => {
                let runtime = Builder::new_multi_thread()
                    .worker_threads(threads)
                    .thread_name(&config.thread_name)
                    .enable_all()
                    .build()
                    .map_err(|e| {
                        GridError::Config(format!("failed to build worker runtime: {}", e))
                    })?;
                debug!(threads, thread_name = %config.thread_name, "Started dedicated worker pool");
                Ok(Self {
                    handle: runtime.handle().clone(),
                    owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
                    spawned: Arc::new(AtomicUsize::new(0)),
                })
            }
        }
    }

    /// Pool backed by the ambient runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::from_handle(Handle::current())
    }

    /// Pool backed by the ambient runtime, failing outside one.
    pub fn try_current() -> GridResult<Self> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|e| GridError::Config(format!("no tokio runtime available: {}", e)))
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn a task on the pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        metrics::record_worker_spawn();
        self.handle.spawn(future)
    }

    /// Number of tasks spawned through this pool and its clones.
    pub fn spawned_tasks(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Check if the pool owns a dedicated runtime.
    pub fn is_dedicated(&self) -> bool {
        self.owned.is_some()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("runtime", &self.handle.id())
            .field("dedicated", &self.is_dedicated())
            .field("spawned", &self.spawned_tasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.worker_threads, None);
        assert_eq!(config.thread_name, "grid-worker");
    }

    #[test]
    fn test_try_current_outside_runtime_fails() {
        let err = WorkerPool::try_current().unwrap_err();
        assert!(matches!(err, GridError::Config(_)));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = WorkerPoolConfig {
            worker_threads: Some(0),
            ..Default::default()
        };
        assert!(WorkerPool::new(&config).is_err());
    }

    #[test]
    fn test_dedicated_pool_runs_tasks() {
        let config = WorkerPoolConfig {
            worker_threads: Some(1),
            thread_name: "test-worker".to_string(),
        };
        let pool = WorkerPool::new(&config).expect("Failed to create pool");
        assert!(pool.is_dedicated());

        let task = pool.spawn(async {
            std::thread::current()
                .name()
                .map(str::to_owned)
                .unwrap_or_default()
        });
        let name = pool.handle().block_on(task).expect("task failed");

        assert_eq!(name, "test-worker");
        assert_eq!(pool.spawned_tasks(), 1);
    }

    #[tokio::test]
    async fn test_current_pool_counts_spawns_across_clones() {
        let pool = WorkerPool::current();
        let clone = pool.clone();

        let a = pool.spawn(async { 1 });
        let b = clone.spawn(async { 2 });

        assert_eq!(a.await.unwrap() + b.await.unwrap(), 3);
        assert_eq!(pool.spawned_tasks(), 2);
        assert!(!pool.is_dedicated());
    }

    #[tokio::test]
    async fn test_dropping_dedicated_pool_inside_async_context() {
        let pool = WorkerPool::new(&WorkerPoolConfig {
            worker_threads: Some(1),
            ..Default::default()
        })
        .unwrap();
        let value = pool.spawn(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        drop(pool);
    }
}
