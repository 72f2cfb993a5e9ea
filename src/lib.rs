//! # kvgrid
//! Execution core of a clustered, in-memory key-value data grid.
//!
//! The crate covers the two halves of running a multi-key request:
//!
//! - **Dispatch**: a [`ParallelDispatcher`](dispatch::ParallelDispatcher)
//!   splits a request into one sub-operation per owning member, runs them
//!   concurrently on a worker pool, merges the partial results and completes
//!   the request exactly once. The first failure cancels the sub-operations
//!   still in flight.
//! - **Apply**: on each owner, a
//!   [`ReadWriteManyEntriesCommand`](functional::ReadWriteManyEntriesCommand)
//!   runs a user function against every entry of its batch through an
//!   access-logging entry view and reports one outcome per entry, optionally
//!   enveloped with hit/miss/put/delete information for statistics.
//!
//! Membership, transport and storage are collaborators behind traits
//! ([`Topology`](topology::Topology), [`Transport`](transport::Transport),
//! [`EntryContext`](container::EntryContext)). The crate ships in-process
//! implementations of each so a whole cluster can run inside one test.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kvgrid::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let topology = Arc::new(ClusterTopology::new(
//!         [MemberId::new(1), MemberId::new(2)],
//!         DEFAULT_VIRTUAL_NODES,
//!     ));
//!     let transport = Arc::new(LocalTransport::new());
//!     for member in topology.snapshot().members() {
//!         transport.register(Arc::new(GridNode::new(*member, topology.clone())));
//!     }
//!
//!     let client = GridClient::new(
//!         ParallelDispatcher::new(WorkerPool::current()),
//!         transport,
//!         topology.clone(),
//!     );
//!
//!     let command = ReadWriteManyEntriesCommand::new(
//!         CommandHeader::new(Arc::new(Utf8Conversion)),
//!         Batch::from_pairs([("k1", "a"), ("k2", "b")])?,
//!         |value: String, view: &mut dyn ReadWriteEntryView<String>| -> Result<String, BoxError> {
//!             let upper = value.to_uppercase();
//!             view.set(upper.clone())?;
//!             Ok(upper)
//!         },
//!     );
//!     let outcomes = client.eval_many_entries(command).await?;
//!     assert_eq!(outcomes.len(), 2);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod functional;
pub mod metrics;
pub mod node;
pub mod runtime;
pub mod stats;
pub mod telemetry;
pub mod topology;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testing;

pub mod prelude {
    //! Common imports for building and running grid operations.
    pub use crate::client::{BatchOutcomes, GridClient, OutcomeMap};
    pub use crate::config::GridConfig;
    pub use crate::container::{EntryContext, InvocationContext, MvccEntry};
    pub use crate::dispatch::{ParallelDispatcher, ParallelOperation, SubOperation};
    pub use crate::error::{BoxError, GridError, GridResult};
    pub use crate::functional::{
        Batch, CommandHeader, EntryOutcome, FunctionalCommand, ManyEntriesApplier, Params,
        ReadEntryView, ReadWriteEntryView, ReadWriteManyCommand, ReadWriteManyEntriesCommand,
        StatisticsMode, Utf8Conversion, ValueConversion, WriteEntryView,
    };
    pub use crate::node::GridNode;
    pub use crate::runtime::WorkerPool;
    pub use crate::stats::{GridStatistics, StatisticsSink};
    pub use crate::topology::{ClusterTopology, DEFAULT_VIRTUAL_NODES, Topology};
    pub use crate::transport::{LocalTransport, Transport};
    pub use crate::types::{Key, MemberId, TopologyId};

    pub use bytes;
}
