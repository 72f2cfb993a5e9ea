//! Configuration for a grid member.
//!
//! # Environment Variables
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `GRID_MEMBER_ID` | Identity of this member | `0` |
//! | `GRID_VIRTUAL_NODES` | Ring replicas per member | `64` |
//! | `GRID_STATISTICS` | `accumulate` or `skip` | `accumulate` |
//! | `GRID_LOCKING_MODE` | `optimistic` or `pessimistic` | `optimistic` |
//! | `GRID_WORKER_THREADS` | Dedicated worker threads, `0` for the ambient runtime | `0` |
//! | `GRID_WORKER_THREAD_NAME` | Worker thread name prefix | `grid-worker` |

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{GridError, GridResult};
use crate::functional::{Params, StatisticsMode};
use crate::runtime::WorkerPoolConfig;
use crate::stats::LockingMode;
use crate::types::MemberId;

/// Upper bound on ring replicas per member.
pub const MAX_VIRTUAL_NODES: usize = 4096;

/// Configuration of one grid member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridConfig {
    /// Identity of this member in the topology.
    pub member_id: MemberId,

    /// Number of virtual nodes each member places on the consistent-hash ring.
    ///
    /// More virtual nodes spread keys more evenly at the cost of a larger ring.
    pub virtual_nodes: usize,

    /// Statistics mode applied to commands built from this config.
    pub statistics: StatisticsMode,

    /// Locking mode reported to transaction statistics.
    pub locking_mode: LockingMode,

    /// Worker pool running parallel sub-operations.
    pub worker_pool: WorkerPoolConfig,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            member_id: MemberId::new(0),
            virtual_nodes: 64,
            statistics: StatisticsMode::Accumulate,
            locking_mode: LockingMode::Optimistic,
            worker_pool: WorkerPoolConfig::default(),
        }
    }
}

impl GridConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> GridResult<Self> {
        let defaults = Self::default();

        let member_id: u32 = parse_var("GRID_MEMBER_ID", defaults.member_id.value())?;
        let virtual_nodes: usize = parse_var("GRID_VIRTUAL_NODES", defaults.virtual_nodes)?;
        let statistics: StatisticsMode = parse_var("GRID_STATISTICS", defaults.statistics)?;
        let locking_mode: LockingMode = parse_var("GRID_LOCKING_MODE", defaults.locking_mode)?;
        let worker_pool = WorkerPoolConfig::from_env()?;

        Ok(Self {
            member_id: MemberId::new(member_id),
            virtual_nodes,
            statistics,
            locking_mode,
            worker_pool,
        })
    }

    /// Validate the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.virtual_nodes == 0 {
            errors.push("virtual_nodes must be at least 1".to_string());
        }
        if self.virtual_nodes > MAX_VIRTUAL_NODES {
            errors.push(format!(
                "virtual_nodes ({}) must not exceed {}",
                self.virtual_nodes, MAX_VIRTUAL_NODES
            ));
        }
        if let Some(0) = self.worker_pool.worker_threads {
            errors.push("worker_threads must be at least 1 when set".to_string());
        }
        if self.worker_pool.thread_name.trim().is_empty() {
            errors.push("worker thread name must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding all problems into one [`GridError::Config`].
    pub fn validated(self) -> GridResult<Self> {
        self.validate()
            .map_err(|errors| GridError::Config(errors.join("; ")))?;
        Ok(self)
    }

    pub fn worker_pool_config(&self) -> &WorkerPoolConfig {
        &self.worker_pool
    }

    /// Default params for commands issued by this member.
    pub fn default_params(&self) -> Params {
        Params::new().with_statistics(self.statistics)
    }
}

/// Parse an environment variable, using `default` when it is unset.
pub(crate) fn parse_var<T>(name: &str, default: T) -> GridResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| GridError::Config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
