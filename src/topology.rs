//! Key ownership.
//!
//! Keys are assigned to members with a consistent hash ring (`conhash`). Each
//! member is added with a number of virtual nodes so that keys spread evenly
//! and only about 1/n of them move when a member joins or leaves.
//!
//! A [`TopologySnapshot`] pairs the ring with the [`TopologyId`] it was built
//! under. Splitting a request uses a single snapshot, so every key in one
//! logical operation is routed under the same topology generation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use conhash::{ConsistentHash, Node};
use tracing::{debug, info};

use crate::error::{GridError, GridResult};
use crate::types::{Key, MemberId, TopologyId, display_key};

/// Default virtual nodes per member.
pub const DEFAULT_VIRTUAL_NODES: usize = 64;

/// Ring node for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MemberNode(MemberId);

impl Node for MemberNode {
    fn name(&self) -> String {
        self.0.to_string()
    }
}

/// Provider of the current cluster topology.
pub trait Topology: Send + Sync {
    /// Current ownership, captured atomically with its topology ID.
    fn snapshot(&self) -> TopologySnapshot;

    fn current_id(&self) -> TopologyId;

    /// Check if membership changed after topology `since`.
    fn members_changed(&self, since: TopologyId) -> bool {
        self.current_id() != since
    }
}

/// Immutable view of key ownership under one topology ID.
#[derive(Clone)]
pub struct TopologySnapshot {
    id: TopologyId,
    members: Vec<MemberId>,
    ring: Arc<ConsistentHash<MemberNode>>,
}

impl TopologySnapshot {
    fn build(id: TopologyId, members: Vec<MemberId>, virtual_nodes: usize) -> Self {
        let mut ring = ConsistentHash::new();
        for member in &members {
            ring.add(&MemberNode(*member), virtual_nodes);
        }
        Self {
            id,
            members,
            ring: Arc::new(ring),
        }
    }

    pub fn id(&self) -> TopologyId {
        self.id
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    /// Member that owns `key`, or `None` for an empty topology.
    pub fn owner_of(&self, key: &[u8]) -> Option<MemberId> {
        match self.members.as_slice() {
            [] => None,
            [only] => Some(*only),
            _ => self.ring.get(key).map(|node| node.0),
        }
    }

    pub fn is_owner(&self, member: MemberId, key: &[u8]) -> bool {
        self.owner_of(key) == Some(member)
    }
}

impl fmt::Debug for TopologySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologySnapshot")
            .field("id", &self.id)
            .field("members", &self.members)
            .finish()
    }
}

/// Mutable topology shared by the members of one in-process cluster.
///
/// Every membership change rebuilds the ring and bumps the topology ID.
pub struct ClusterTopology {
    virtual_nodes: usize,
    current: RwLock<TopologySnapshot>,
}

impl ClusterTopology {
    pub fn new(members: impl IntoIterator<Item = MemberId>, virtual_nodes: usize) -> Self {
        let members = normalize(members);
        let initial = if members.is_empty() {
            TopologyId::INITIAL
        } else {
            TopologyId::INITIAL.next()
        };
        Self {
            virtual_nodes,
            current: RwLock::new(TopologySnapshot::build(initial, members, virtual_nodes)),
        }
    }

    /// Replace the member set. Returns the new topology ID.
    pub fn update_members(&self, members: impl IntoIterator<Item = MemberId>) -> TopologyId {
        let members = normalize(members);
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let id = current.id.next();
        info!(topology = %id, members = members.len(), "Topology updated");
        *current = TopologySnapshot::build(id, members, self.virtual_nodes);
        id
    }

    pub fn add_member(&self, member: MemberId) -> TopologyId {
        let mut members = self.snapshot().members;
        members.push(member);
        self.update_members(members)
    }

    pub fn remove_member(&self, member: MemberId) -> TopologyId {
        let members = self
            .snapshot()
            .members
            .into_iter()
            .filter(|m| *m != member);
        self.update_members(members)
    }
}

impl Topology for ClusterTopology {
    fn snapshot(&self) -> TopologySnapshot {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn current_id(&self) -> TopologyId {
        self.current.read().unwrap_or_else(|e| e.into_inner()).id
    }
}

impl fmt::Debug for ClusterTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterTopology")
            .field("virtual_nodes", &self.virtual_nodes)
            .field("current", &self.snapshot())
            .finish()
    }
}

fn normalize(members: impl IntoIterator<Item = MemberId>) -> Vec<MemberId> {
    let mut members: Vec<MemberId> = members.into_iter().collect();
    members.sort_unstable();
    members.dedup();
    members
}

/// Keys grouped by owner, routed under one topology.
#[derive(Debug, Clone)]
pub struct Split<T> {
    pub topology_id: TopologyId,
    pub groups: BTreeMap<MemberId, Vec<T>>,
}

/// Group `items` by the owner of `key_of(item)` under one topology snapshot.
///
/// Fails with [`GridError::TopologyChanged`] when membership changed while
/// splitting, and with [`GridError::NoOwner`] when no member owns a key.
pub fn split_by_owner<T>(
    topology: &dyn Topology,
    items: impl IntoIterator<Item = T>,
    key_of: impl Fn(&T) -> &Key,
) -> GridResult<Split<T>> {
    let snapshot = topology.snapshot();
    let mut groups: BTreeMap<MemberId, Vec<T>> = BTreeMap::new();

    for item in items {
        let key = key_of(&item);
        let owner = snapshot.owner_of(key).ok_or_else(|| GridError::NoOwner {
            key: display_key(key),
            topology: snapshot.id(),
        })?;
        groups.entry(owner).or_default().push(item);
    }

    if topology.members_changed(snapshot.id()) {
        let observed = topology.current_id();
        debug!(expected = %snapshot.id(), observed = %observed, "Topology changed during split");
        return Err(GridError::TopologyChanged {
            expected: snapshot.id(),
            observed,
        });
    }

    Ok(Split {
        topology_id: snapshot.id(),
        groups,
    })
}
