//! Scripted operations for exercising the dispatcher.
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! kvgrid = { path = ".", features = ["test-utilities"] }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::dispatch::{ParallelOperation, SubOperation};
use crate::error::{GridError, GridResult};
use crate::types::MemberId;

/// What a scripted sub-operation does when executed.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return `values` after `delay`.
    Succeed { values: Vec<u32>, delay: Duration },
    /// Fail with `error()` after `delay`.
    Fail {
        error: fn() -> GridError,
        delay: Duration,
    },
    /// Block until cancelled, then fail with [`GridError::Cancelled`].
    UntilCancelled,
    /// Panic when executed.
    Panic,
}

impl Script {
    pub fn succeed(values: Vec<u32>) -> Self {
        Self::succeed_after(values, Duration::ZERO)
    }

    pub fn succeed_after(values: Vec<u32>, delay: Duration) -> Self {
        Script::Succeed { values, delay }
    }

    pub fn fail(error: fn() -> GridError) -> Self {
        Self::fail_after(error, Duration::ZERO)
    }

    pub fn fail_after(error: fn() -> GridError, delay: Duration) -> Self {
        Script::Fail { error, delay }
    }
}

/// Observations shared between a scripted sub-operation and its test.
#[derive(Debug, Clone, Default)]
struct Tracker {
    cancels: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

/// Sub-operation that follows a [`Script`] and records cancellations.
#[derive(Debug)]
pub struct ScriptedSubOperation {
    target: MemberId,
    script: Script,
    tracker: Tracker,
}

#[async_trait]
impl SubOperation for ScriptedSubOperation {
    type Output = Vec<u32>;

    fn target(&self) -> MemberId {
        self.target
    }

    async fn execute(&self) -> GridResult<Vec<u32>> {
        let result = match &self.script {
            Script::Succeed { values, delay } => {
                pause(*delay).await;
                Ok(values.clone())
            }
            Script::Fail { error, delay } => {
                pause(*delay).await;
                Err(error())
            }
            Script::UntilCancelled => {
                self.tracker.wake.notified().await;
                Err(GridError::Cancelled {
                    member: self.target,
                })
            }
            Script::Panic => panic!("scripted panic on {}", self.target),
        };
        self.tracker.finished.store(true, Ordering::Release);
        result
    }

    fn cancel(&self, _may_interrupt: bool) {
        self.tracker.cancels.fetch_add(1, Ordering::SeqCst);
        self.tracker.wake.notify_one();
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

/// Parallel operation whose sub-operations follow fixed scripts.
///
/// Partial results are `Vec<u32>` and are merged by concatenation.
#[derive(Debug)]
pub struct ScriptedOperation {
    scripts: Vec<(MemberId, Script)>,
    trackers: Vec<Tracker>,
    collect: bool,
    split_error: Option<fn() -> GridError>,
}

impl ScriptedOperation {
    pub fn new(scripts: Vec<(MemberId, Script)>) -> Self {
        let trackers = scripts.iter().map(|_| Tracker::default()).collect();
        Self {
            scripts,
            trackers,
            collect: true,
            split_error: None,
        }
    }

    /// Operation whose split fails with `error()`.
    pub fn failing_split(error: fn() -> GridError) -> Self {
        Self {
            split_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    /// Discard partial results instead of collecting them.
    pub fn without_collector(mut self) -> Self {
        self.collect = false;
        self
    }

    /// Number of times sub-operation `index` was cancelled.
    pub fn cancels(&self, index: usize) -> usize {
        self.trackers[index].cancels.load(Ordering::SeqCst)
    }

    /// Check if sub-operation `index` returned a result.
    pub fn finished(&self, index: usize) -> bool {
        self.trackers[index].finished.load(Ordering::Acquire)
    }
}

impl ParallelOperation for ScriptedOperation {
    type Output = Vec<u32>;
    type SubOp = ScriptedSubOperation;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn map_operations(&self) -> GridResult<Vec<ScriptedSubOperation>> {
        if let Some(error) = self.split_error {
            return Err(error());
        }
        Ok(self
            .scripts
            .iter()
            .zip(&self.trackers)
            .map(|((target, script), tracker)| ScriptedSubOperation {
                target: *target,
                script: script.clone(),
                tracker: tracker.clone(),
            })
            .collect())
    }

    fn create_collector(&self) -> Option<Vec<u32>> {
        self.collect.then(Vec::new)
    }

    fn combine(&self, collector: &mut Vec<u32>, partial: Vec<u32>) {
        collector.extend(partial);
    }
}
