//! Statistics fed by enveloped entry outcomes.
//!
//! Every [`EntryOutcome::Enveloped`](crate::functional::EntryOutcome) carries
//! [`AccessFlags`]. The node pipeline hands those flags to a
//! [`StatisticsSink`] after a command succeeds. Two sinks are provided:
//!
//! - [`GridStatistics`]: node-wide hit/miss/store/remove counters, mirrored
//!   to Prometheus
//! - [`TransactionStatistics`]: per-transaction counters that are folded into
//!   success counters when the transaction terminates

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::functional::AccessFlags;
use crate::metrics;

/// Receives the access flags of enveloped outcomes.
pub trait StatisticsSink: Send + Sync {
    fn record(&self, flags: AccessFlags);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatistics;

impl StatisticsSink for NoopStatistics {
    fn record(&self, _flags: AccessFlags) {}
}

/// Point-in-time copy of [`GridStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub removes: u64,
    pub read_skips: u64,
    pub write_skips: u64,
}

/// Node-wide entry access counters.
#[derive(Debug, Default)]
pub struct GridStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    removes: AtomicU64,
    read_skips: AtomicU64,
    write_skips: AtomicU64,
}

impl GridStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            read_skips: self.read_skips.load(Ordering::Relaxed),
            write_skips: self.write_skips.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.stores,
            &self.removes,
            &self.read_skips,
            &self.write_skips,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl StatisticsSink for GridStatistics {
    fn record(&self, flags: AccessFlags) {
        if flags.is_hit() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_entry_outcome("hit");
        } else if flags.is_miss() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_entry_outcome("miss");
        } else {
            self.read_skips.fetch_add(1, Ordering::Relaxed);
        }

        if flags.is_put() {
            self.stores.fetch_add(1, Ordering::Relaxed);
            metrics::record_entry_outcome("put");
        } else if flags.is_delete() {
            self.removes.fetch_add(1, Ordering::Relaxed);
            metrics::record_entry_outcome("delete");
        } else if flags.is_write_skip() {
            self.write_skips.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Locking scheme of the transactional layer in front of the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LockingMode {
    /// Locks are acquired at prepare time.
    #[default]
    Optimistic,
    /// Locks are acquired as keys are written.
    Pessimistic,
}

impl fmt::Display for LockingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockingMode::Optimistic => write!(f, "optimistic"),
            LockingMode::Pessimistic => write!(f, "pessimistic"),
        }
    }
}

impl FromStr for LockingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "optimistic" => Ok(LockingMode::Optimistic),
            "pessimistic" => Ok(LockingMode::Pessimistic),
            _ => Err(format!(
                "Unknown locking mode '{}'. Valid modes: optimistic, pessimistic",
                s
            )),
        }
    }
}

/// Counters kept per local transaction. Durations are in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxStat {
    NumPuts,
    NumSuccessfulPuts,
    NumHeldLocks,
    NumHeldLocksSuccessTx,
    LockWaitingTime,
    WrTxLocalExecutionTime,
    LocalExecNoCont,
    NumPrepares,
    NumReads,
}

impl TxStat {
    pub const COUNT: usize = 9;

    pub const ALL: [TxStat; Self::COUNT] = [
        TxStat::NumPuts,
        TxStat::NumSuccessfulPuts,
        TxStat::NumHeldLocks,
        TxStat::NumHeldLocksSuccessTx,
        TxStat::LockWaitingTime,
        TxStat::WrTxLocalExecutionTime,
        TxStat::LocalExecNoCont,
        TxStat::NumPrepares,
        TxStat::NumReads,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Statistics of one transaction executing locally.
///
/// The transaction is read-only until a recorded outcome writes. Local
/// execution ends once, at prepare; termination folds the transaction's
/// counters into its success counters when it committed a write.
pub struct TransactionStatistics {
    locking_mode: LockingMode,
    started: Instant,
    read_only: AtomicBool,
    still_local_execution: AtomicBool,
    committed: AtomicBool,
    terminated: AtomicBool,
    values: [AtomicU64; TxStat::COUNT],
}

impl TransactionStatistics {
    pub fn new(locking_mode: LockingMode) -> Self {
        Self {
            locking_mode,
            started: Instant::now(),
            read_only: AtomicBool::new(true),
            still_local_execution: AtomicBool::new(true),
            committed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            values: Default::default(),
        }
    }

    pub fn locking_mode(&self) -> LockingMode {
        self.locking_mode
    }

    pub fn value(&self, stat: TxStat) -> u64 {
        self.values[stat.index()].load(Ordering::Relaxed)
    }

    pub fn add_value(&self, stat: TxStat, delta: u64) {
        self.values[stat.index()].fetch_add(delta, Ordering::Relaxed);
    }

    pub fn increment(&self, stat: TxStat) {
        self.add_value(stat, 1);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn is_still_local_execution(&self) -> bool {
        self.still_local_execution.load(Ordering::Acquire)
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    pub fn add_held_lock(&self) {
        self.increment(TxStat::NumHeldLocks);
    }

    pub fn add_lock_waiting_time(&self, waited: Duration) {
        self.add_value(TxStat::LockWaitingTime, duration_nanos(waited));
    }

    /// End local execution (the prepare phase started).
    ///
    /// Only the first call has an effect.
    pub fn terminate_local_execution(&self) {
        self.terminate_local_execution_after(self.started.elapsed());
    }

    fn terminate_local_execution_after(&self, elapsed: Duration) {
        if !self.still_local_execution.swap(false, Ordering::AcqRel) {
            return;
        }
        if !self.is_read_only() {
            self.add_value(TxStat::WrTxLocalExecutionTime, duration_nanos(elapsed));
        }
        self.increment(TxStat::NumPrepares);
    }

    /// Terminate the transaction. Only the first call has an effect.
    pub fn terminate(&self, committed: bool) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.committed.store(committed, Ordering::Release);

        if !self.is_read_only() && committed {
            self.add_value(TxStat::NumSuccessfulPuts, self.value(TxStat::NumPuts));
            self.add_value(
                TxStat::NumHeldLocksSuccessTx,
                self.value(TxStat::NumHeldLocks),
            );
            let execution = self.value(TxStat::WrTxLocalExecutionTime);
            let no_contention = match self.locking_mode {
                LockingMode::Optimistic => execution,
                LockingMode::Pessimistic => {
                    execution.saturating_sub(self.value(TxStat::LockWaitingTime))
                }
            };
            self.add_value(TxStat::LocalExecNoCont, no_contention);
        }

        let outcome = if committed { "committed" } else { "rolled_back" };
        metrics::record_transaction_termination(outcome);
        debug!(outcome, read_only = self.is_read_only(), "Terminated transaction statistics");
    }
}

impl StatisticsSink for TransactionStatistics {
    fn record(&self, flags: AccessFlags) {
        if flags.was_read() {
            self.increment(TxStat::NumReads);
        }
        if flags.is_changed() {
            self.read_only.store(false, Ordering::Release);
            self.increment(TxStat::NumPuts);
        }
    }
}

impl fmt::Debug for TransactionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("TransactionStatistics");
        s.field("still_local_execution", &self.is_still_local_execution())
            .field("locking_mode", &self.locking_mode)
            .field("read_only", &self.is_read_only());
        for stat in TxStat::ALL {
            s.field(stat_name(stat), &self.value(stat));
        }
        s.finish()
    }
}

fn stat_name(stat: TxStat) -> &'static str {
    match stat {
        TxStat::NumPuts => "num_puts",
        TxStat::NumSuccessfulPuts => "num_successful_puts",
        TxStat::NumHeldLocks => "num_held_locks",
        TxStat::NumHeldLocksSuccessTx => "num_held_locks_success_tx",
        TxStat::LockWaitingTime => "lock_waiting_time",
        TxStat::WrTxLocalExecutionTime => "wr_tx_local_execution_time",
        TxStat::LocalExecNoCont => "local_exec_no_cont",
        TxStat::NumPrepares => "num_prepares",
        TxStat::NumReads => "num_reads",
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
