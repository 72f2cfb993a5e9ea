//! Shared fixtures for integration tests.
//!
//! - [`Cluster`]: an in-process grid of [`GridNode`]s behind a [`LocalTransport`]
//! - [`GatedOperation`]: a parallel operation whose sub-operations finish only
//!   when the test releases them, so completion order is under test control

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use kvgrid::client::GridClient;
use kvgrid::dispatch::{ParallelDispatcher, ParallelOperation, SubOperation};
use kvgrid::error::{BoxError, GridError, GridResult};
use kvgrid::functional::{Batch, CommandHeader, ReadWriteEntryView, ReadWriteManyEntriesCommand, Utf8Conversion};
use kvgrid::node::GridNode;
use kvgrid::runtime::WorkerPool;
use kvgrid::stats::GridStatistics;
use kvgrid::topology::{ClusterTopology, DEFAULT_VIRTUAL_NODES, Topology};
use kvgrid::transport::{LocalTransport, Transport};
use kvgrid::types::{Key, MemberId};
use tokio::sync::Notify;

// ============================================================================
// In-process cluster
// ============================================================================

pub struct Cluster<T: Transport = LocalTransport> {
    pub topology: Arc<ClusterTopology>,
    pub local: Arc<LocalTransport>,
    pub statistics: Arc<GridStatistics>,
    pub client: GridClient<T>,
}

impl Cluster<LocalTransport> {
    /// Cluster with one node per member, all sharing one statistics sink.
    pub fn new(members: &[u32]) -> Self {
        let (topology, local, statistics) = nodes(members);
        let client = GridClient::new(
            ParallelDispatcher::new(WorkerPool::current()),
            local.clone(),
            topology.clone(),
        );
        Self {
            topology,
            local,
            statistics,
            client,
        }
    }
}

impl<T: Transport> Cluster<T> {
    pub fn node(&self, member: u32) -> Arc<GridNode> {
        self.local
            .node(MemberId::new(member))
            .expect("member should be registered")
    }

    /// Register a node for `member` without adding it to the topology.
    pub fn start_node(&self, member: u32) {
        self.local.register(Arc::new(
            GridNode::new(MemberId::new(member), self.topology.clone())
                .with_statistics(self.statistics.clone()),
        ));
    }

    /// Total number of committed entries across every registered node.
    pub fn stored_entries(&self, members: &[u32]) -> usize {
        members
            .iter()
            .map(|m| self.node(*m).container().len())
            .sum()
    }
}

/// Topology, transport and nodes for `members`.
pub fn nodes(members: &[u32]) -> (Arc<ClusterTopology>, Arc<LocalTransport>, Arc<GridStatistics>) {
    let topology = Arc::new(ClusterTopology::new(
        members.iter().copied().map(MemberId::new),
        DEFAULT_VIRTUAL_NODES,
    ));
    let statistics = Arc::new(GridStatistics::new());
    let local = Arc::new(LocalTransport::new());
    for member in members {
        local.register(Arc::new(
            GridNode::new(MemberId::new(*member), topology.clone())
                .with_statistics(statistics.clone()),
        ));
    }
    (topology, local, statistics)
}

pub fn keys(count: usize) -> Vec<Key> {
    (0..count).map(|i| Key::from(format!("key-{}", i))).collect()
}

pub fn uppercase(
    value: String,
    view: &mut dyn ReadWriteEntryView<String>,
) -> Result<String, BoxError> {
    let upper = value.to_uppercase();
    view.set(upper.clone())?;
    Ok(upper)
}

/// Command uppercasing every batch value into its entry.
pub fn uppercase_command(
    topology: &dyn Topology,
    pairs: impl IntoIterator<Item = (Key, Bytes)>,
) -> ReadWriteManyEntriesCommand<String, String> {
    ReadWriteManyEntriesCommand::new(
        CommandHeader::new(Arc::new(Utf8Conversion)).with_topology_id(topology.current_id()),
        Batch::from_pairs(pairs).expect("keys should be unique"),
        uppercase,
    )
}

// ============================================================================
// Gated operations
// ============================================================================

/// Result a gated sub-operation produces once released.
#[derive(Clone, Copy)]
pub enum Release {
    Value(u64),
    Fail(fn() -> GridError),
}

/// Control point of one gated sub-operation.
#[derive(Default)]
pub struct Gate {
    release: Notify,
    cancel: Notify,
    cancels: AtomicUsize,
    finished: AtomicBool,
}

impl Gate {
    pub fn open(&self) {
        self.release.notify_one();
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

pub struct GatedSubOperation {
    target: MemberId,
    release: Release,
    gate: Arc<Gate>,
}

#[async_trait]
impl SubOperation for GatedSubOperation {
    type Output = Vec<u64>;

    fn target(&self) -> MemberId {
        self.target
    }

    async fn execute(&self) -> GridResult<Vec<u64>> {
        let result = tokio::select! {
            _ = self.gate.release.notified() => match self.release {
                Release::Value(value) => Ok(vec![value]),
                Release::Fail(error) => Err(error()),
            },
            _ = self.gate.cancel.notified() => Err(GridError::Cancelled { member: self.target }),
        };
        self.gate.finished.store(true, Ordering::SeqCst);
        result
    }

    fn cancel(&self, _may_interrupt: bool) {
        self.gate.cancels.fetch_add(1, Ordering::SeqCst);
        self.gate.cancel.notify_one();
    }
}

/// Parallel operation over gated sub-operations, merging values into a `Vec`.
pub struct GatedOperation {
    releases: Vec<Release>,
    gates: Vec<Arc<Gate>>,
}

impl GatedOperation {
    pub fn new(releases: Vec<Release>) -> Self {
        let gates = releases.iter().map(|_| Arc::new(Gate::default())).collect();
        Self { releases, gates }
    }

    pub fn gate(&self, index: usize) -> &Gate {
        &self.gates[index]
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }
}

impl ParallelOperation for GatedOperation {
    type Output = Vec<u64>;
    type SubOp = GatedSubOperation;

    fn name(&self) -> &'static str {
        "gated"
    }

    fn map_operations(&self) -> GridResult<Vec<GatedSubOperation>> {
        Ok(self
            .releases
            .iter()
            .zip(&self.gates)
            .enumerate()
            .map(|(i, (release, gate))| GatedSubOperation {
                target: MemberId::new(i as u32 + 1),
                release: *release,
                gate: Arc::clone(gate),
            })
            .collect())
    }

    fn create_collector(&self) -> Option<Vec<u64>> {
        Some(Vec::new())
    }

    fn combine(&self, collector: &mut Vec<u64>, partial: Vec<u64>) {
        collector.extend(partial);
    }
}
