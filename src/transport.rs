//! Delivery of sub-operations to members.
//!
//! [`Transport`] is the seam between the dispatcher and the network. The crate
//! ships [`LocalTransport`], which routes requests to [`GridNode`]s living in
//! the same process.
//!
//! [`TransportSubOperation`] adapts one transport request into a
//! [`SubOperation`]: cancelling it drops the in-flight request and resolves
//! the sub-operation with [`GridError::Cancelled`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::dispatch::SubOperation;
use crate::error::{GridError, GridResult};
use crate::functional::{Batch, EntryOutcome, FunctionalCommand, ReadWriteManyEntriesCommand};
use crate::node::GridNode;
use crate::types::{Key, MemberId};

/// Request/response exchange with a single member.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Read the committed values of `keys` on `target`.
    async fn get_all(&self, target: MemberId, keys: Vec<Key>) -> GridResult<HashMap<Key, Bytes>>;

    /// Write `entries` on `target`. Returns the number of entries written.
    async fn put_all(&self, target: MemberId, entries: Batch) -> GridResult<usize>;

    /// Run a functional command on `target`.
    async fn invoke<V, R>(
        &self,
        target: MemberId,
        command: FunctionalCommand<V, R>,
    ) -> GridResult<Vec<EntryOutcome<R>>>
    where
        V: Send + Sync + 'static,
        R: Send + 'static;

    async fn read_write_many_entries<V, R>(
        &self,
        target: MemberId,
        command: ReadWriteManyEntriesCommand<V, R>,
    ) -> GridResult<Vec<EntryOutcome<R>>>
    where
        V: Send + Sync + 'static,
        R: Send + 'static,
    {
        self.invoke(target, FunctionalCommand::from(command)).await
    }
}

/// Transport to nodes in the same process.
#[derive(Default)]
pub struct LocalTransport {
    nodes: DashMap<MemberId, Arc<GridNode>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node: Arc<GridNode>) {
        debug!(member = %node.member(), "Registered local node");
        self.nodes.insert(node.member(), node);
    }

    pub fn unregister(&self, member: MemberId) -> Option<Arc<GridNode>> {
        self.nodes.remove(&member).map(|(_, node)| node)
    }

    pub fn node(&self, member: MemberId) -> GridResult<Arc<GridNode>> {
        self.nodes
            .get(&member)
            .map(|node| Arc::clone(node.value()))
            .ok_or_else(|| GridError::Transport(format!("no route to {}", member)))
    }
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut members: Vec<MemberId> = self.nodes.iter().map(|e| *e.key()).collect();
        members.sort_unstable();
        f.debug_struct("LocalTransport")
            .field("members", &members)
            .finish()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn get_all(&self, target: MemberId, keys: Vec<Key>) -> GridResult<HashMap<Key, Bytes>> {
        trace!(member = %target, keys = keys.len(), "get_all");
        self.node(target)?.get_all(&keys)
    }

    async fn put_all(&self, target: MemberId, entries: Batch) -> GridResult<usize> {
        trace!(member = %target, entries = entries.len(), "put_all");
        self.node(target)?.put_all(&entries)
    }

    async fn invoke<V, R>(
        &self,
        target: MemberId,
        command: FunctionalCommand<V, R>,
    ) -> GridResult<Vec<EntryOutcome<R>>>
    where
        V: Send + Sync + 'static,
        R: Send + 'static,
    {
        trace!(member = %target, command = command.name(), "invoke");
        self.node(target)?.invoke(&command, None)
    }
}

/// Produces the request future of a [`TransportSubOperation`].
pub type RequestFn<T> = Box<dyn Fn() -> BoxFuture<'static, GridResult<T>> + Send + Sync>;

/// A transport request addressed to one member, cancellable while in flight.
pub struct TransportSubOperation<T> {
    target: MemberId,
    request: RequestFn<T>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl<T> TransportSubOperation<T> {
    pub fn new<F>(target: MemberId, request: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, GridResult<T>> + Send + Sync + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            target,
            request: Box::new(request),
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }
}

#[async_trait]
impl<T: Send + 'static> SubOperation for TransportSubOperation<T> {
    type Output = T;

    fn target(&self) -> MemberId {
        self.target
    }

    async fn execute(&self) -> GridResult<T> {
        tokio::select! {
            biased;
            _ = cancelled(self.cancel_rx.clone()) => Err(GridError::Cancelled { member: self.target }),
            result = (self.request)() => result,
        }
    }

    fn cancel(&self, _may_interrupt: bool) {
        if !self.cancel_tx.send_replace(true) {
            trace!(member = %self.target, "Cancelled in-flight request");
        }
    }
}

/// Resolves once the cancel flag is raised.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

impl<T> fmt::Debug for TransportSubOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSubOperation")
            .field("target", &self.target)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
