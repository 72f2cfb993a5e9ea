//! Multi-key client operations.
//!
//! Every operation here is a [`ParallelOperation`]: its keys are split by
//! owner under one topology snapshot, each owner receives one
//! [`TransportSubOperation`], and the [`ParallelDispatcher`] merges the
//! partial results.
//!
//! | Operation | Collector |
//! |---|---|
//! | [`GetAllOperation`] | key → value map |
//! | [`PutAllOperation`] | none |
//! | [`EvalManyEntriesOperation`] | key → outcome map |
//! | [`EvalManyOperation`] | key → outcome map |
//!
//! Partial results merge in whatever order owners answer. The functional
//! entry points then rebuild the result in the command's key order as
//! [`BatchOutcomes`].
//!
//! [`GridClient`] retries an operation when ownership moved underneath it
//! (see [`GridError::needs_forwarding`](crate::error::GridError::needs_forwarding)).
//! Retried functional commands are marked forwarded; owners that already
//! applied them see the post-state.

use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use tracing::{debug, info};

use crate::dispatch::{ParallelDispatcher, ParallelOperation};
use crate::error::GridResult;
use crate::functional::{
    Batch, EntryOutcome, FunctionalCommand, ReadWriteManyCommand, ReadWriteManyEntriesCommand,
};
use crate::topology::{Topology, split_by_owner};
use crate::transport::{Transport, TransportSubOperation};
use crate::types::{Key, MemberId, display_key};

/// Attempts made before a forwarding error is returned to the caller.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Per-key outcomes merged from the owners of a functional command.
pub type OutcomeMap<R> = HashMap<Key, EntryOutcome<R>>;

/// Per-key outcomes of a functional command, in the command's key order.
#[derive(Debug, Clone)]
pub struct BatchOutcomes<R> {
    entries: Vec<(Key, EntryOutcome<R>)>,
    index: HashMap<Key, usize>,
}

impl<R> BatchOutcomes<R> {
    /// Order `merged` by `keys`. Keys with no outcome are skipped.
    fn in_order<'a>(keys: impl IntoIterator<Item = &'a Key>, mut merged: OutcomeMap<R>) -> Self {
        let entries: Vec<(Key, EntryOutcome<R>)> = keys
            .into_iter()
            .filter_map(|key| merged.remove_entry(key))
            .collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, (key, _))| (key.clone(), i))
            .collect();
        Self { entries, index }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&EntryOutcome<R>> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &EntryOutcome<R>> {
        self.entries.iter().map(|(_, o)| o)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &EntryOutcome<R>)> {
        self.entries.iter().map(|(k, o)| (k, o))
    }
}

impl<R> Index<&Key> for BatchOutcomes<R> {
    type Output = EntryOutcome<R>;

    fn index(&self, key: &Key) -> &EntryOutcome<R> {
        match self.get(key) {
            Some(outcome) => outcome,
            None => panic!("no outcome for key {}", display_key(key)),
        }
    }
}

impl<R> IntoIterator for BatchOutcomes<R> {
    type Item = (Key, EntryOutcome<R>);
    type IntoIter = std::vec::IntoIter<(Key, EntryOutcome<R>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Read many keys at once.
pub struct GetAllOperation<T> {
    transport: Arc<T>,
    topology: Arc<dyn Topology>,
    keys: Vec<Key>,
}

impl<T: Transport> GetAllOperation<T> {
    pub fn new(transport: Arc<T>, topology: Arc<dyn Topology>, keys: Vec<Key>) -> Self {
        Self {
            transport,
            topology,
            keys,
        }
    }
}

impl<T: Transport> ParallelOperation for GetAllOperation<T> {
    type Output = HashMap<Key, Bytes>;
    type SubOp = TransportSubOperation<HashMap<Key, Bytes>>;

    fn name(&self) -> &'static str {
        "get_all"
    }

    fn map_operations(&self) -> GridResult<Vec<Self::SubOp>> {
        let split = split_by_owner(self.topology.as_ref(), self.keys.iter().cloned(), |k| k)?;
        Ok(split
            .groups
            .into_iter()
            .map(|(target, keys)| {
                let transport = Arc::clone(&self.transport);
                TransportSubOperation::new(target, move || {
                    let transport = Arc::clone(&transport);
                    let keys = keys.clone();
                    async move { transport.get_all(target, keys).await }.boxed()
                })
            })
            .collect())
    }

    fn create_collector(&self) -> Option<Self::Output> {
        Some(HashMap::with_capacity(self.keys.len()))
    }

    fn combine(&self, collector: &mut Self::Output, partial: Self::Output) {
        collector.extend(partial);
    }
}

/// Write many entries at once. Partial results are discarded.
pub struct PutAllOperation<T> {
    transport: Arc<T>,
    topology: Arc<dyn Topology>,
    entries: Batch,
}

impl<T: Transport> PutAllOperation<T> {
    pub fn new(transport: Arc<T>, topology: Arc<dyn Topology>, entries: Batch) -> Self {
        Self {
            transport,
            topology,
            entries,
        }
    }
}

impl<T: Transport> ParallelOperation for PutAllOperation<T> {
    type Output = ();
    type SubOp = TransportSubOperation<()>;

    fn name(&self) -> &'static str {
        "put_all"
    }

    fn map_operations(&self) -> GridResult<Vec<Self::SubOp>> {
        let split = split_by_owner(
            self.topology.as_ref(),
            owned_pairs(&self.entries),
            |e| &e.0,
        )?;
        let mut sub_ops = Vec::with_capacity(split.groups.len());
        for (target, group) in split.groups {
            let batch = Batch::from_pairs(group)?;
            let transport = Arc::clone(&self.transport);
            sub_ops.push(TransportSubOperation::new(target, move || {
                let transport = Arc::clone(&transport);
                let batch = batch.clone();
                async move { transport.put_all(target, batch).await.map(|_| ()) }.boxed()
            }));
        }
        Ok(sub_ops)
    }

    fn create_collector(&self) -> Option<()> {
        None
    }

    fn combine(&self, _collector: &mut (), _partial: ()) {}
}

/// Apply a [`ReadWriteManyEntriesCommand`] on the owners of its entries.
pub struct EvalManyEntriesOperation<T, V, R> {
    transport: Arc<T>,
    topology: Arc<dyn Topology>,
    command: ReadWriteManyEntriesCommand<V, R>,
}

impl<T, V, R> EvalManyEntriesOperation<T, V, R>
where
    T: Transport,
    V: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(
        transport: Arc<T>,
        topology: Arc<dyn Topology>,
        command: ReadWriteManyEntriesCommand<V, R>,
    ) -> Self {
        Self {
            transport,
            topology,
            command,
        }
    }
}

impl<T, V, R> ParallelOperation for EvalManyEntriesOperation<T, V, R>
where
    T: Transport,
    V: Send + Sync + 'static,
    R: Send + 'static,
{
    type Output = OutcomeMap<R>;
    type SubOp = TransportSubOperation<OutcomeMap<R>>;

    fn name(&self) -> &'static str {
        "eval_many_entries"
    }

    fn map_operations(&self) -> GridResult<Vec<Self::SubOp>> {
        let split = split_by_owner(
            self.topology.as_ref(),
            owned_pairs(self.command.entries()),
            |e| &e.0,
        )?;
        let mut sub_ops = Vec::with_capacity(split.groups.len());
        for (target, group) in split.groups {
            let mut command = self.command.with_entries(Batch::from_pairs(group)?);
            command.set_topology_id(split.topology_id);
            let transport = Arc::clone(&self.transport);
            sub_ops.push(TransportSubOperation::new(target, move || {
                apply_entries_on(Arc::clone(&transport), target, command.clone()).boxed()
            }));
        }
        Ok(sub_ops)
    }

    fn create_collector(&self) -> Option<Self::Output> {
        Some(HashMap::with_capacity(self.command.entries().len()))
    }

    fn combine(&self, collector: &mut Self::Output, partial: Self::Output) {
        collector.extend(partial);
    }
}

/// Apply a [`ReadWriteManyCommand`] on the owners of its keys.
pub struct EvalManyOperation<T, V, R> {
    transport: Arc<T>,
    topology: Arc<dyn Topology>,
    command: ReadWriteManyCommand<V, R>,
}

impl<T, V, R> EvalManyOperation<T, V, R>
where
    T: Transport,
    V: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(
        transport: Arc<T>,
        topology: Arc<dyn Topology>,
        command: ReadWriteManyCommand<V, R>,
    ) -> Self {
        Self {
            transport,
            topology,
            command,
        }
    }
}

impl<T, V, R> ParallelOperation for EvalManyOperation<T, V, R>
where
    T: Transport,
    V: Send + Sync + 'static,
    R: Send + 'static,
{
    type Output = OutcomeMap<R>;
    type SubOp = TransportSubOperation<OutcomeMap<R>>;

    fn name(&self) -> &'static str {
        "eval_many"
    }

    fn map_operations(&self) -> GridResult<Vec<Self::SubOp>> {
        let split = split_by_owner(
            self.topology.as_ref(),
            self.command.keys().iter().cloned(),
            |k| k,
        )?;
        let mut sub_ops = Vec::with_capacity(split.groups.len());
        for (target, keys) in split.groups {
            let mut command = FunctionalCommand::from(self.command.with_keys(keys));
            command.set_topology_id(split.topology_id);
            let transport = Arc::clone(&self.transport);
            sub_ops.push(TransportSubOperation::new(target, move || {
                invoke_on(Arc::clone(&transport), target, command.clone()).boxed()
            }));
        }
        Ok(sub_ops)
    }

    fn create_collector(&self) -> Option<Self::Output> {
        Some(HashMap::with_capacity(self.command.keys().len()))
    }

    fn combine(&self, collector: &mut Self::Output, partial: Self::Output) {
        collector.extend(partial);
    }
}

fn owned_pairs(entries: &Batch) -> impl Iterator<Item = (Key, Bytes)> + '_ {
    entries.iter().map(|(k, v)| (k.clone(), v.clone()))
}

async fn apply_entries_on<T, V, R>(
    transport: Arc<T>,
    target: MemberId,
    command: ReadWriteManyEntriesCommand<V, R>,
) -> GridResult<OutcomeMap<R>>
where
    T: Transport,
    V: Send + Sync + 'static,
    R: Send + 'static,
{
    let keys = command.affected_keys();
    let outcomes = transport.read_write_many_entries(target, command).await?;
    Ok(keys.into_iter().zip(outcomes).collect())
}

async fn invoke_on<T, V, R>(
    transport: Arc<T>,
    target: MemberId,
    command: FunctionalCommand<V, R>,
) -> GridResult<OutcomeMap<R>>
where
    T: Transport,
    V: Send + Sync + 'static,
    R: Send + 'static,
{
    let keys = command.affected_keys();
    let outcomes = transport.invoke(target, command).await?;
    Ok(keys.into_iter().zip(outcomes).collect())
}

/// Entry point for multi-key operations against the grid.
pub struct GridClient<T> {
    dispatcher: ParallelDispatcher,
    transport: Arc<T>,
    topology: Arc<dyn Topology>,
    max_attempts: usize,
}

impl<T: Transport> GridClient<T> {
    pub fn new(
        dispatcher: ParallelDispatcher,
        transport: Arc<T>,
        topology: Arc<dyn Topology>,
    ) -> Self {
        Self {
            dispatcher,
            transport,
            topology,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set how many times an operation is tried when ownership moves. At least 1.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn dispatcher(&self) -> &ParallelDispatcher {
        &self.dispatcher
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub async fn get_all(
        &self,
        keys: impl IntoIterator<Item = Key>,
    ) -> GridResult<HashMap<Key, Bytes>> {
        let keys: Vec<Key> = keys.into_iter().collect();
        self.run(|_| {
            GetAllOperation::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.topology),
                keys.clone(),
            )
        })
        .await
    }

    pub async fn put_all(&self, entries: Batch) -> GridResult<()> {
        self.run(|_| {
            PutAllOperation::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.topology),
                entries.clone(),
            )
        })
        .await
    }

    /// Apply `command` to every entry of its batch on the entries' owners.
    pub async fn eval_many_entries<V, R>(
        &self,
        command: ReadWriteManyEntriesCommand<V, R>,
    ) -> GridResult<BatchOutcomes<R>>
    where
        V: Send + Sync + 'static,
        R: Send + 'static,
    {
        let merged = self
            .run(|forwarded| {
                let mut command = command.clone();
                command.set_forwarded(command.is_forwarded() || forwarded);
                EvalManyEntriesOperation::new(
                    Arc::clone(&self.transport),
                    Arc::clone(&self.topology),
                    command,
                )
            })
            .await?;
        Ok(BatchOutcomes::in_order(command.entries().keys(), merged))
    }

    /// Apply `command` to every one of its keys on the keys' owners.
    pub async fn eval_many<V, R>(
        &self,
        command: ReadWriteManyCommand<V, R>,
    ) -> GridResult<BatchOutcomes<R>>
    where
        V: Send + Sync + 'static,
        R: Send + 'static,
    {
        let merged = self
            .run(|forwarded| {
                let mut command = command.clone();
                command.set_forwarded(command.is_forwarded() || forwarded);
                EvalManyOperation::new(
                    Arc::clone(&self.transport),
                    Arc::clone(&self.topology),
                    command,
                )
            })
            .await?;
        Ok(BatchOutcomes::in_order(command.keys(), merged))
    }

    /// Dispatch the operation built by `build`, rebuilding it while ownership
    /// keeps moving. `build` receives `true` for every attempt after the first.
    async fn run<O, B>(&self, mut build: B) -> GridResult<O::Output>
    where
        O: ParallelOperation,
        B: FnMut(bool) -> O,
    {
        let mut attempt = 1;
        loop {
            let operation = Arc::new(build(attempt > 1));
            let name = operation.name();
            match self.dispatcher.execute(operation).await {
                Err(e) if e.needs_forwarding() && attempt < self.max_attempts => {
                    debug!(operation = name, attempt, error = %e, "Ownership moved, retrying as forwarded");
                    attempt += 1;
                }
                Err(e) if e.needs_forwarding() => {
                    info!(operation = name, attempts = attempt, error = %e, "Giving up after repeated ownership changes");
                    return Err(e);
                }
                result => return result,
            }
        }
    }
}

impl<T> std::fmt::Debug for GridClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridClient")
            .field("dispatcher", &self.dispatcher)
            .field("topology", &self.topology.current_id())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, GridError};
    use crate::functional::{CommandHeader, ReadWriteEntryView, Utf8Conversion};
    use crate::node::GridNode;
    use crate::runtime::WorkerPool;
    use crate::topology::{ClusterTopology, DEFAULT_VIRTUAL_NODES};
    use crate::transport::LocalTransport;

    struct Cluster {
        topology: Arc<ClusterTopology>,
        transport: Arc<LocalTransport>,
        client: GridClient<LocalTransport>,
    }

    fn cluster(members: &[u32]) -> Cluster {
        let topology = Arc::new(ClusterTopology::new(
            members.iter().copied().map(MemberId::new),
            DEFAULT_VIRTUAL_NODES,
        ));
        let transport = Arc::new(LocalTransport::new());
        for member in members {
            transport.register(Arc::new(GridNode::new(
                MemberId::new(*member),
                topology.clone(),
            )));
        }
        let client = GridClient::new(
            ParallelDispatcher::new(WorkerPool::current()),
            transport.clone(),
            topology.clone(),
        );
        Cluster {
            topology,
            transport,
            client,
        }
    }

    fn keys(count: usize) -> Vec<Key> {
        (0..count).map(|i| Key::from(format!("key-{}", i))).collect()
    }

    fn uppercase_command(
        topology: &ClusterTopology,
        pairs: Vec<(Key, Bytes)>,
    ) -> ReadWriteManyEntriesCommand<String, String> {
        ReadWriteManyEntriesCommand::new(
            CommandHeader::new(Arc::new(Utf8Conversion)).with_topology_id(topology.current_id()),
            Batch::from_pairs(pairs).unwrap(),
            |value: String, view: &mut dyn ReadWriteEntryView<String>| -> Result<String, BoxError> {
                let upper = value.to_uppercase();
                view.set(upper.clone())?;
                Ok(upper)
            },
        )
    }

    #[tokio::test]
    async fn test_put_all_then_get_all_across_members() {
        let cluster = cluster(&[1, 2, 3]);
        let pairs: Vec<(Key, Bytes)> = keys(30)
            .into_iter()
            .map(|k| {
                let v = Bytes::from(format!("value-of-{}", String::from_utf8_lossy(&k)));
                (k, v)
            })
            .collect();

        cluster
            .client
            .put_all(Batch::from_pairs(pairs.clone()).unwrap())
            .await
            .unwrap();
        let found = cluster.client.get_all(keys(30)).await.unwrap();

        assert_eq!(found.len(), 30);
        for (key, value) in pairs {
            assert_eq!(found[&key], value);
        }
        let stored: usize = [1, 2, 3]
            .iter()
            .map(|m| cluster.transport.node(MemberId::new(*m)).unwrap().container().len())
            .sum();
        assert_eq!(stored, 30);
    }

    #[tokio::test]
    async fn test_get_all_of_nothing_spawns_nothing() {
        let cluster = cluster(&[1, 2]);
        let found = cluster.client.get_all(Vec::new()).await.unwrap();
        assert!(found.is_empty());
        assert_eq!(cluster.client.dispatcher().pool().spawned_tasks(), 0);
    }

    #[tokio::test]
    async fn test_eval_many_entries_returns_outcome_per_key() {
        let cluster = cluster(&[1, 2, 3]);
        let pairs: Vec<(Key, Bytes)> = keys(12)
            .into_iter()
            .map(|k| (k, Bytes::from("abc")))
            .collect();
        let command = uppercase_command(&cluster.topology, pairs);

        let outcomes = cluster.client.eval_many_entries(command).await.unwrap();

        assert_eq!(outcomes.len(), 12);
        assert_eq!(outcomes.keys().cloned().collect::<Vec<_>>(), keys(12));
        for key in keys(12) {
            let outcome = &outcomes[&key];
            assert_eq!(outcome.value(), "ABC");
            let flags = outcome.access().unwrap();
            assert!(!flags.existed_before());
            assert!(flags.is_put());
        }
    }

    #[tokio::test]
    async fn test_eval_many_applies_to_each_key() {
        let cluster = cluster(&[1, 2]);
        cluster
            .client
            .put_all(Batch::from_pairs(keys(8).into_iter().map(|k| (k, Bytes::from("x")))).unwrap())
            .await
            .unwrap();
        let command = ReadWriteManyCommand::new(
            CommandHeader::new(Arc::new(Utf8Conversion)),
            keys(8),
            |view: &mut dyn ReadWriteEntryView<String>| -> Result<Option<String>, BoxError> {
                let previous = view.find()?;
                view.remove();
                Ok(previous)
            },
        );

        let outcomes = cluster.client.eval_many(command).await.unwrap();

        assert_eq!(outcomes.keys().cloned().collect::<Vec<_>>(), keys(8));
        assert!(outcomes.values().all(|o| o.value().as_deref() == Some("x")));
        assert!(cluster.client.get_all(keys(8)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_client_view_gives_up_after_max_attempts() {
        let cluster = cluster(&[1, 2]);
        // The client routes with a view that still includes member 3.
        let stale = Arc::new(ClusterTopology::new(
            [1, 2, 3].map(MemberId::new),
            DEFAULT_VIRTUAL_NODES,
        ));
        cluster.transport.register(Arc::new(GridNode::new(
            MemberId::new(3),
            cluster.topology.clone(),
        )));
        let client = GridClient::new(
            ParallelDispatcher::new(WorkerPool::current()),
            cluster.transport.clone(),
            stale,
        )
        .with_max_attempts(2);

        let err = client.get_all(keys(40)).await.unwrap_err();

        assert!(matches!(err, GridError::NotOwner { member, .. } if member == MemberId::new(3)));
    }
}
