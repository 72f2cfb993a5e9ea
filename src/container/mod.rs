//! In-memory entry storage and per-invocation entry contexts.
//!
//! - [`DataContainer`]: the committed key space of a node
//! - [`InvocationContext`]: the entries one command invocation may touch
//! - [`MvccEntry`]: a mutable, versioned handle over one key

mod context;
mod data_container;
mod entry;

pub use context::{EntryContext, InvocationContext};
pub use data_container::{CommitSummary, DataContainer, LoadType, StoredValue};
pub use entry::MvccEntry;
