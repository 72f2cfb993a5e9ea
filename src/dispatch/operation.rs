//! Contracts between the dispatcher and the operations it runs.

use async_trait::async_trait;
use tracing::error;

use crate::error::{GridError, GridResult};
use crate::types::MemberId;

/// One unit of remote work addressed to a single member.
///
/// A sub-operation is created when the logical operation is split and never
/// changes afterwards.
#[async_trait]
pub trait SubOperation: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Member this sub-operation is sent to.
    fn target(&self) -> MemberId;

    /// Run the sub-operation to completion.
    async fn execute(&self) -> GridResult<Self::Output>;

    /// Ask a running sub-operation to stop.
    ///
    /// Advisory: the sub-operation may already have finished, and may still
    /// complete normally afterwards.
    fn cancel(&self, may_interrupt: bool);
}

/// A multi-key request that fans out into per-owner sub-operations.
///
/// Partial results are folded into a collector with [`combine`](Self::combine).
/// Sub-operations complete in any order, so `combine` must be order-independent.
pub trait ParallelOperation: Send + Sync + 'static {
    type Output: Default + Send + 'static;
    type SubOp: SubOperation<Output = Self::Output>;

    /// Label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Split into one sub-operation per destination.
    fn map_operations(&self) -> GridResult<Vec<Self::SubOp>>;

    /// Empty accumulator, or `None` when partial results are discarded.
    fn create_collector(&self) -> Option<Self::Output>;

    /// Fold one partial result into the collector.
    fn combine(&self, collector: &mut Self::Output, partial: Self::Output);

    /// Decode a response payload directly.
    ///
    /// Aggregating operations have no payload of their own; reaching this is
    /// a bug in the caller.
    fn decode_payload(&self, _payload: &[u8]) -> GridResult<Self::Output> {
        let operation = self.name();
        error!(operation, "Payload decode requested on an aggregating operation");
        Err(GridError::UnsupportedDecode { operation })
    }
}
