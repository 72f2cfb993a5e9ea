//! Parallel execution of multi-destination operations.
//!
//! A [`ParallelOperation`] splits itself into [`SubOperation`]s, one per
//! destination member. The [`ParallelDispatcher`] runs them, folds their
//! partial results into one collector and resolves the caller exactly once.

mod completion;
mod dispatcher;
mod operation;

pub use completion::{Completion, CompletionState};
pub use dispatcher::ParallelDispatcher;
pub use operation::{ParallelOperation, SubOperation};
