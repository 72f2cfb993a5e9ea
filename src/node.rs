//! Invocation pipeline of one grid member.
//!
//! A [`GridNode`] owns the member's committed [`DataContainer`] and runs
//! commands against it:
//!
//! 1. Check that every affected key is owned by this member under the current
//!    topology. Commands routed under an older topology whose keys are still
//!    owned here are marked forwarded and re-tagged.
//! 2. Wrap the affected entries into a fresh [`InvocationContext`] according to
//!    the command's [`LoadType`].
//! 3. Perform the command. A failure discards the context, so nothing the
//!    command did before failing is committed.
//! 4. Feed enveloped outcomes to the statistics sink and commit.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::container::{DataContainer, EntryContext, InvocationContext, LoadType};
use crate::error::{GridError, GridResult};
use crate::functional::{Batch, EntryOutcome, FunctionalCommand, Mutation, ValueConversion};
use crate::metrics;
use crate::stats::{NoopStatistics, StatisticsSink};
use crate::topology::{Topology, TopologySnapshot};
use crate::types::{InvocationId, Key, MemberId, TopologyId, display_key};

/// One member of the grid.
pub struct GridNode {
    member: MemberId,
    container: DataContainer,
    topology: Arc<dyn Topology>,
    statistics: Arc<dyn StatisticsSink>,
}

impl GridNode {
    pub fn new(member: MemberId, topology: Arc<dyn Topology>) -> Self {
        Self {
            member,
            container: DataContainer::new(),
            topology,
            statistics: Arc::new(NoopStatistics),
        }
    }

    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsSink>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn member(&self) -> MemberId {
        self.member
    }

    pub fn container(&self) -> &DataContainer {
        &self.container
    }

    /// Run a functional command on the keys this member owns.
    pub fn invoke<V: 'static, R: 'static>(
        &self,
        command: &FunctionalCommand<V, R>,
        origin: Option<MemberId>,
    ) -> GridResult<Vec<EntryOutcome<R>>> {
        let name = command.name();
        let keys = command.affected_keys();
        let snapshot = self.check_owned(&keys)?;

        let mut command = command.clone();
        if command.topology_id() != snapshot.id() {
            debug!(
                command = name,
                member = %self.member,
                routed = %command.topology_id(),
                current = %snapshot.id(),
                "Command routed under a stale topology, applying as forwarded"
            );
            command.set_forwarded(true);
            command.set_topology_id(snapshot.id());
        }

        let mut ctx = InvocationContext::new(command.header().invocation_id(), origin);
        self.container
            .wrap_entries(&mut ctx, keys.iter(), command.load_type());

        let outcomes = match command.perform(&mut ctx) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                metrics::record_invocation(name, "failure");
                warn!(
                    command = name,
                    member = %self.member,
                    invocation = %ctx.invocation_id(),
                    error = %e,
                    "Command failed, discarding invocation context"
                );
                return Err(e);
            }
        };

        for flags in outcomes.iter().filter_map(EntryOutcome::access) {
            self.statistics.record(flags);
        }

        if command.is_write() {
            let summary = self.container.commit(&ctx);
            trace!(
                command = name,
                member = %self.member,
                written = summary.written,
                removed = summary.removed,
                "Committed invocation"
            );
        }
        metrics::record_invocation(name, "success");
        Ok(outcomes)
    }

    /// Read the committed values of `keys`. Absent keys are left out.
    pub fn get_all(&self, keys: &[Key]) -> GridResult<HashMap<Key, Bytes>> {
        self.check_owned(keys)?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.container
                    .get(key)
                    .map(|stored| (key.clone(), stored.value))
            })
            .collect())
    }

    /// Write every entry of `entries`. Returns the number of entries written.
    pub fn put_all(&self, entries: &Batch) -> GridResult<usize> {
        let keys: Vec<Key> = entries.keys().cloned().collect();
        self.check_owned(&keys)?;
        for (key, value) in entries.iter() {
            self.container.put(key.clone(), value.clone());
        }
        Ok(entries.len())
    }

    /// Replay a primary's mutation on this member's copy of `key`.
    ///
    /// Backups do not own the key, so ownership is not checked.
    pub fn apply_mutation<V: 'static, R>(
        &self,
        key: &Key,
        mutation: &Mutation<V, R>,
        conversion: &dyn ValueConversion<V>,
    ) -> GridResult<R> {
        let mut ctx = InvocationContext::new(InvocationId::random(), None);
        self.container
            .wrap_entries(&mut ctx, std::iter::once(key), LoadType::Owner);
        let entry = ctx.lookup_entry(key).ok_or_else(|| GridError::MissingEntry {
            key: display_key(key),
        })?;
        let result = mutation.apply_to(entry, conversion)?;
        self.container.commit(&ctx);
        trace!(member = %self.member, key = %display_key(key), kind = mutation.kind(), "Applied backup mutation");
        Ok(result)
    }

    pub fn topology_id(&self) -> TopologyId {
        self.topology.current_id()
    }

    fn check_owned(&self, keys: &[Key]) -> GridResult<TopologySnapshot> {
        let snapshot = self.topology.snapshot();
        if let Some(key) = keys.iter().find(|k| !snapshot.is_owner(self.member, k)) {
            debug!(member = %self.member, key = %display_key(key), topology = %snapshot.id(), "Rejecting key not owned here");
            return Err(GridError::NotOwner {
                member: self.member,
                key: display_key(key),
            });
        }
        Ok(snapshot)
    }
}

impl std::fmt::Debug for GridNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridNode")
            .field("member", &self.member)
            .field("entries", &self.container.len())
            .field("topology", &self.topology.current_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functional::{
        CommandHeader, ReadWriteEntryView, ReadWriteManyEntriesCommand, Utf8Conversion,
    };
    use crate::stats::GridStatistics;
    use crate::topology::{ClusterTopology, DEFAULT_VIRTUAL_NODES};
    use crate::error::BoxError;

    fn single_node() -> (GridNode, Arc<GridStatistics>) {
        let topology = Arc::new(ClusterTopology::new(
            [MemberId::new(1)],
            DEFAULT_VIRTUAL_NODES,
        ));
        let stats = Arc::new(GridStatistics::new());
        let node = GridNode::new(MemberId::new(1), topology).with_statistics(stats.clone());
        (node, stats)
    }

    fn header(node: &GridNode) -> CommandHeader<String> {
        CommandHeader::new(Arc::new(Utf8Conversion)).with_topology_id(node.topology_id())
    }

    fn append_command(
        node: &GridNode,
        pairs: &[(&'static str, &'static str)],
    ) -> FunctionalCommand<String, String> {
        let batch = Batch::from_pairs(pairs.iter().copied()).unwrap();
        ReadWriteManyEntriesCommand::new(
            header(node),
            batch,
            |suffix: String, view: &mut dyn ReadWriteEntryView<String>| -> Result<String, BoxError> {
                let current = view.find()?.unwrap_or_default();
                let next = format!("{}{}", current, suffix);
                view.set(next.clone())?;
                Ok(next)
            },
        )
        .into()
    }

    #[test]
    fn test_invoke_commits_changes() {
        let (node, stats) = single_node();
        node.container().put(Key::from("k1"), Bytes::from("a"));

        let command = append_command(&node, &[("k1", "b"), ("k2", "c")]);
        let outcomes = node.invoke(&command, None).unwrap();

        let values: Vec<_> = outcomes.into_iter().map(EntryOutcome::into_value).collect();
        assert_eq!(values, vec!["ab".to_string(), "c".to_string()]);
        assert_eq!(node.container().get(b"k1").unwrap().value, Bytes::from("ab"));
        assert_eq!(node.container().get(b"k2").unwrap().value, Bytes::from("c"));
        assert_eq!(stats.snapshot().stores, 2);
    }

    #[test]
    fn test_failed_invoke_commits_nothing() {
        let (node, _) = single_node();
        let batch = Batch::from_pairs([("k1", "x"), ("k2", "y")]).unwrap();
        let command: FunctionalCommand<String, ()> = ReadWriteManyEntriesCommand::new(
            header(&node),
            batch,
            |value: String, view: &mut dyn ReadWriteEntryView<String>| -> Result<(), BoxError> {
                if value == "y" {
                    return Err("refused".into());
                }
                view.set(value)?;
                Ok(())
            },
        )
        .into();

        let err = node.invoke(&command, None).unwrap_err();

        assert!(matches!(err, GridError::UserFunction(_)));
        assert!(node.container().is_empty());
    }

    #[test]
    fn test_stale_topology_applies_as_forwarded() {
        let topology = Arc::new(ClusterTopology::new(
            [MemberId::new(1)],
            DEFAULT_VIRTUAL_NODES,
        ));
        let node = GridNode::new(MemberId::new(1), topology.clone());
        let command = append_command(&node, &[("k1", "z")]);

        topology.update_members([MemberId::new(1)]);
        let outcomes = node.invoke(&command, None).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(node.container().get(b"k1").unwrap().value, Bytes::from("z"));
    }

    #[test]
    fn test_not_owner_is_rejected() {
        let topology = Arc::new(ClusterTopology::new(
            [MemberId::new(1), MemberId::new(2)],
            DEFAULT_VIRTUAL_NODES,
        ));
        let node = GridNode::new(MemberId::new(1), topology.clone());
        let foreign = (0..100)
            .map(|i| Key::from(format!("key-{}", i)))
            .find(|k| !topology.snapshot().is_owner(MemberId::new(1), k))
            .unwrap();

        let err = node.get_all(std::slice::from_ref(&foreign)).unwrap_err();

        assert!(matches!(err, GridError::NotOwner { member, .. } if member == MemberId::new(1)));
        assert!(err.needs_forwarding());
    }

    #[test]
    fn test_put_all_then_get_all() {
        let (node, _) = single_node();
        let batch = Batch::from_pairs([("a", "1"), ("b", "2")]).unwrap();

        assert_eq!(node.put_all(&batch).unwrap(), 2);

        let found = node
            .get_all(&[Key::from("a"), Key::from("b"), Key::from("missing")])
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&Key::from("b")], Bytes::from("2"));
    }

    #[test]
    fn test_apply_mutation_on_backup() {
        let (node, _) = single_node();
        node.container().put(Key::from("k1"), Bytes::from("a"));
        let command = append_command(&node, &[("k1", "b")]);
        let mutation = command.to_mutation(b"k1").unwrap();

        let result = node
            .apply_mutation(&Key::from("k1"), &mutation, &Utf8Conversion)
            .unwrap();

        assert_eq!(result, "ab");
        assert_eq!(node.container().get(b"k1").unwrap().value, Bytes::from("ab"));
    }
}
