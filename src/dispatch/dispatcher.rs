//! Fan-out/fan-in execution of parallel operations.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::dispatch::{Completion, CompletionState, ParallelOperation, SubOperation};
use crate::error::{GridError, GridResult};
use crate::metrics;
use crate::runtime::WorkerPool;

/// Runs parallel operations on a worker pool.
///
/// # Paths
///
/// - No sub-operations: the collector (or `Output::default()`) is returned
///   immediately and nothing is spawned.
/// - One sub-operation: awaited inline in the caller's task; its result or
///   error is returned unchanged.
/// - Several sub-operations: each runs as a pool task. Successes are merged
///   into one collector under a mutex and counted down; the last success
///   completes the operation. The first failure completes it exceptionally and
///   sends one cancellation request to every other sub-operation. Cancelling
///   a sub-operation that already finished is a no-op on its side.
///
/// Dropping the future returned by [`execute`](Self::execute) before it
/// resolves fails the operation with [`GridError::Abandoned`] and cancels
/// every sub-operation the same way.
#[derive(Debug, Clone)]
pub struct ParallelDispatcher {
    pool: WorkerPool,
}

impl ParallelDispatcher {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Execute `operation` and return its merged result.
    pub async fn execute<O: ParallelOperation>(&self, operation: Arc<O>) -> GridResult<O::Output> {
        let name = operation.name();
        let started = Instant::now();

        let result = match operation.map_operations() {
            Ok(sub_ops) => match sub_ops.len() {
                0 => {
                    metrics::record_dispatch_path(name, "empty", 0);
                    debug!(operation = name, "No sub-operations, completing immediately");
                    Ok(operation.create_collector().unwrap_or_default())
                }
                1 => {
                    metrics::record_dispatch_path(name, "inline", 1);
                    let mut sub_ops = sub_ops;
                    match sub_ops.pop() {
                        Some(sub_op) => execute_inline(name, sub_op).await,
                        None => Ok(operation.create_collector().unwrap_or_default()),
                    }
                }
                fanout => {
                    metrics::record_dispatch_path(name, "parallel", fanout);
                    self.execute_parallel(operation, sub_ops).await
                }
            },
            Err(e) => {
                warn!(operation = name, error = %e, "Failed to split operation");
                Err(e)
            }
        };

        let status = match &result {
            Ok(_) => "success",
            Err(_) => "failure",
        };
        metrics::record_completion(name, status, started.elapsed().as_secs_f64());
        result
    }

    async fn execute_parallel<O: ParallelOperation>(
        &self,
        operation: Arc<O>,
        sub_ops: Vec<O::SubOp>,
    ) -> GridResult<O::Output> {
        let name = operation.name();
        let count = sub_ops.len();
        let (completion, rx) = Completion::new();
        let fan_in = Arc::new(FanIn {
            collector: Mutex::new(operation.create_collector()),
            sub_ops: sub_ops.into_iter().map(Arc::new).collect(),
            remaining: AtomicUsize::new(count),
            cancelled: AtomicBool::new(false),
            completion,
            operation,
        });

        debug!(operation = name, sub_operations = count, "Dispatching sub-operations in parallel");

        let guard = AbandonGuard {
            fan_in: Arc::clone(&fan_in),
        };

        for index in 0..count {
            let fan_in = Arc::clone(&fan_in);
            self.pool.spawn(async move {
                let sub_op = Arc::clone(&fan_in.sub_ops[index]);
                let result = match AssertUnwindSafe(sub_op.execute()).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(GridError::Worker(panic_message(panic.as_ref()))),
                };
                fan_in.on_result(index, result);
            });
        }

        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(GridError::Worker(
                "completion dropped before a result was delivered".to_string(),
            )),
        };
        drop(guard);
        result
    }
}

async fn execute_inline<S: SubOperation>(operation: &'static str, sub_op: S) -> GridResult<S::Output> {
    let mut guard = InlineGuard {
        sub_op: &sub_op,
        finished: false,
    };
    let result = match AssertUnwindSafe(sub_op.execute()).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(GridError::Worker(panic_message(panic.as_ref()))),
    };
    guard.finished = true;

    if let Err(e) = &result {
        metrics::record_sub_operation_failure(operation, e.as_metric_label());
        warn!(operation, member = %sub_op.target(), error = %e, "Sub-operation failed");
    }
    result
}

/// Shared state of one parallel execution.
struct FanIn<O: ParallelOperation> {
    operation: Arc<O>,
    sub_ops: Vec<Arc<O::SubOp>>,
    collector: Mutex<Option<O::Output>>,
    remaining: AtomicUsize,
    cancelled: AtomicBool,
    completion: Completion<O::Output>,
}

impl<O: ParallelOperation> FanIn<O> {
    fn on_result(&self, index: usize, result: GridResult<O::Output>) {
        match result {
            Ok(partial) => self.on_success(partial),
            Err(e) => self.on_failure(index, e),
        }
    }

    fn on_success(&self, partial: O::Output) {
        if self.completion.is_done() {
            return;
        }
        {
            let mut collector = self.collector.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(collector) = collector.as_mut() {
                self.operation.combine(collector, partial);
            }
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let merged = self
                .collector
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take()
                .unwrap_or_default();
            self.completion.complete(merged);
        }
    }

    fn on_failure(&self, index: usize, error: GridError) {
        let operation = self.operation.name();
        let member = self.sub_ops[index].target();
        metrics::record_sub_operation_failure(operation, error.as_metric_label());

        if self.completion.transition(CompletionState::Failed) {
            warn!(operation, %member, error = %error, "Sub-operation failed, failing operation");
            self.cancel_siblings(Some(index));
            self.completion.deliver(Err(error));
        } else {
            debug!(operation, %member, error = %error, "Sub-operation failed after completion");
        }
    }

    /// Send one cancellation request to every sub-operation except `failed`.
    /// Runs at most once per execution.
    fn cancel_siblings(&self, failed: Option<usize>) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut cancelled = 0;
        for (index, sub_op) in self.sub_ops.iter().enumerate() {
            if Some(index) != failed {
                sub_op.cancel(true);
                cancelled += 1;
            }
        }
        metrics::record_cancellations(self.operation.name(), cancelled);
        debug!(operation = self.operation.name(), cancelled, "Cancelled sibling sub-operations");
    }
}

/// Fails and cancels a parallel execution whose caller went away.
struct AbandonGuard<O: ParallelOperation> {
    fan_in: Arc<FanIn<O>>,
}

impl<O: ParallelOperation> Drop for AbandonGuard<O> {
    fn drop(&mut self) {
        let fan_in = &self.fan_in;
        if fan_in.completion.transition(CompletionState::Failed) {
            let operation = fan_in.operation.name();
            warn!(operation, "Operation dropped before completion, cancelling sub-operations");
            metrics::record_completion(operation, "abandoned", 0.0);
            fan_in.cancel_siblings(None);
            fan_in.completion.deliver(Err(GridError::Abandoned { operation }));
        }
    }
}

/// Cancels an inline sub-operation whose caller went away.
struct InlineGuard<'a, S: SubOperation> {
    sub_op: &'a S,
    finished: bool,
}

impl<S: SubOperation> Drop for InlineGuard<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            self.sub_op.cancel(true);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "sub-operation panicked".to_string()
    }
}
