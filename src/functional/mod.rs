//! Functional entry application.
//!
//! User functions never touch entries directly. A command wraps each
//! [`MvccEntry`](crate::container::MvccEntry) the pipeline pre-loaded into an
//! [`AccessLoggingView`], calls the function, and turns what the function did
//! into an [`EntryOutcome`]: the function's return value, optionally enveloped
//! with [`AccessFlags`] for statistics.
//!
//! - [`view`]: entry views and the access log
//! - [`outcome`]: per-entry outcomes and statistics envelopes
//! - [`many_entries`]: the batch applier and its command
//! - [`command`]: the closed set of functional commands
//! - [`mutation`]: per-key effects replayed on backups

mod batch;
pub mod command;
mod conversion;
pub mod many_entries;
pub mod mutation;
pub mod outcome;
mod params;
pub mod view;

pub use batch::Batch;
pub use command::{
    CommandHeader, FunctionalCommand, ReadFn, ReadOnlyKeyCommand, ReadWriteFn,
    ReadWriteKeyCommand, ReadWriteManyCommand, ReadWriteValueFn, WriteFn,
    WriteOnlyKeyValueCommand,
};
pub use conversion::{IdentityConversion, JsonConversion, Utf8Conversion, ValueConversion};
pub use many_entries::{ManyEntriesApplier, ReadWriteManyEntriesCommand};
pub use mutation::Mutation;
pub use outcome::{AccessFlags, EntryOutcome, StatsEnvelope};
pub use params::{Params, StatisticsMode};
pub use view::{
    AccessLoggingView, EntrySnapshot, ReadEntryView, ReadWriteEntryView, ViewAccess,
    WriteEntryView,
};
