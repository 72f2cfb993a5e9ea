//! Batch read-write command over explicit key/value entries.
//!
//! # Application
//!
//! [`ManyEntriesApplier`] walks a [`Batch`] in order. For every key it looks
//! up the entry the pipeline wrapped into the context, decodes the batch value
//! and calls the user function with that value and an [`AccessLoggingView`]
//! over the entry. Outcomes come back in batch order, one per key.
//!
//! The applier never commits and never replicates. It can run again over a
//! context it already mutated (forwarded commands do this), in which case the
//! function observes the state the first application left behind.
//!
//! # Failures
//!
//! A key with no wrapped entry means the pipeline skipped pre-loading; the
//! whole invocation aborts with [`GridError::MissingEntry`]. A failing user
//! function aborts the remaining keys with [`GridError::UserFunction`]; changes
//! made to earlier entries stay in the context for the pipeline to discard.

use std::fmt;
use std::sync::Arc;

use tracing::{error, trace};

use crate::container::{EntryContext, LoadType, MvccEntry};
use crate::error::{BoxError, GridError, GridResult};
use crate::functional::command::{CommandHeader, ReadWriteValueFn};
use crate::functional::{
    AccessLoggingView, Batch, EntryOutcome, Mutation, Params, ReadWriteEntryView, StatisticsMode,
    StatsEnvelope, ValueConversion,
};
use crate::metrics;
use crate::types::{InvocationId, Key, TopologyId, display_key};

const COMMAND_NAME: &str = "read_write_many_entries";

/// Apply `f` to one entry and classify the access.
///
/// `existed_before` is taken from the entry as the context holds it right now,
/// so a re-application sees the previous application's writes.
pub(crate) fn apply_to_entry<V, R>(
    entry: &mut MvccEntry,
    conversion: &dyn ValueConversion<V>,
    statistics: StatisticsMode,
    f: impl FnOnce(&mut AccessLoggingView<'_, V>) -> Result<R, BoxError>,
) -> GridResult<EntryOutcome<R>> {
    let existed_before = entry.exists();
    let mut view = AccessLoggingView::new(entry, conversion);
    let value = f(&mut view).map_err(GridError::UserFunction)?;
    let access = view.into_access();

    Ok(match statistics {
        StatisticsMode::Skip => EntryOutcome::Bare(value),
        StatisticsMode::Accumulate => {
            EntryOutcome::Enveloped(StatsEnvelope::create(value, entry, existed_before, access))
        }
    })
}

/// Look up a pre-loaded entry, treating absence as a pipeline bug.
pub(crate) fn require_entry<'c>(
    ctx: &'c mut dyn EntryContext,
    key: &[u8],
    command: &'static str,
) -> GridResult<&'c mut MvccEntry> {
    match ctx.lookup_entry(key) {
        Some(entry) => Ok(entry),
        None => {
            let key = display_key(key);
            error!(command, key = %key, "Entry was not wrapped before the command ran");
            Err(GridError::MissingEntry { key })
        }
    }
}

/// Applies a two-argument function to every entry of a batch.
pub struct ManyEntriesApplier<'a, V> {
    conversion: &'a dyn ValueConversion<V>,
    statistics: StatisticsMode,
}

impl<'a, V: 'static> ManyEntriesApplier<'a, V> {
    pub fn new(conversion: &'a dyn ValueConversion<V>, statistics: StatisticsMode) -> Self {
        Self {
            conversion,
            statistics,
        }
    }

    /// Run `f` over `batch` against the entries in `ctx`.
    pub fn apply<R, F>(
        &self,
        batch: &Batch,
        f: &F,
        ctx: &mut dyn EntryContext,
    ) -> GridResult<Vec<EntryOutcome<R>>>
    where
        F: Fn(V, &mut dyn ReadWriteEntryView<V>) -> Result<R, BoxError> + ?Sized,
    {
        let mut outcomes = Vec::with_capacity(batch.len());
        for (key, raw) in batch.iter() {
            let entry = require_entry(ctx, key, COMMAND_NAME)?;
            let argument = self.conversion.from_storage(raw)?;
            let outcome = apply_to_entry(entry, self.conversion, self.statistics, |view| {
                f(argument, view)
            })?;
            trace!(key = %display_key(key), access = ?outcome.access(), "Applied function to entry");
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Read-write function applied to a batch of keys, each paired with an argument.
///
/// This is the owner-side form of an "eval many entries" request: the origin
/// splits the request by owner and sends each owner a copy re-targeted at its
/// own sub-batch with [`with_entries`](Self::with_entries).
pub struct ReadWriteManyEntriesCommand<V, R> {
    header: CommandHeader<V>,
    entries: Batch,
    function: ReadWriteValueFn<V, R>,
    function_name: &'static str,
    forwarded: bool,
}

impl<V: 'static, R: 'static> ReadWriteManyEntriesCommand<V, R> {
    /// Wire command identifier.
    pub const COMMAND_ID: u8 = 53;

    pub const NAME: &'static str = COMMAND_NAME;

    pub fn new<F>(header: CommandHeader<V>, entries: Batch, function: F) -> Self
    where
        F: Fn(V, &mut dyn ReadWriteEntryView<V>) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            header,
            entries,
            function: Arc::new(function),
            function_name: std::any::type_name::<F>(),
            forwarded: false,
        }
    }

    /// Build from an already shared function.
    pub fn from_shared(
        header: CommandHeader<V>,
        entries: Batch,
        function: ReadWriteValueFn<V, R>,
        function_name: &'static str,
    ) -> Self {
        Self {
            header,
            entries,
            function,
            function_name,
            forwarded: false,
        }
    }

    /// Copy of this command targeting `entries` instead.
    pub fn with_entries(&self, entries: Batch) -> Self {
        Self {
            header: self.header.clone(),
            entries,
            function: Arc::clone(&self.function),
            function_name: self.function_name,
            forwarded: self.forwarded,
        }
    }

    pub fn header(&self) -> &CommandHeader<V> {
        &self.header
    }

    pub fn invocation_id(&self) -> InvocationId {
        self.header.invocation_id()
    }

    pub fn params(&self) -> Params {
        self.header.params()
    }

    pub fn entries(&self) -> &Batch {
        &self.entries
    }

    pub fn set_entries(&mut self, entries: Batch) {
        self.entries = entries;
    }

    pub fn function(&self) -> &ReadWriteValueFn<V, R> {
        &self.function
    }

    pub fn function_name(&self) -> &'static str {
        self.function_name
    }

    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    /// Mark the command as re-sent after a topology change.
    pub fn set_forwarded(&mut self, forwarded: bool) {
        self.forwarded = forwarded;
    }

    pub fn topology_id(&self) -> TopologyId {
        self.header.topology_id()
    }

    pub fn set_topology_id(&mut self, topology_id: TopologyId) {
        self.header.set_topology_id(topology_id);
    }

    pub fn load_type(&self) -> LoadType {
        LoadType::Owner
    }

    pub fn affected_keys(&self) -> Vec<Key> {
        self.entries.keys().cloned().collect()
    }

    pub fn keys_to_lock(&self) -> Vec<Key> {
        self.affected_keys()
    }

    pub fn is_return_value_expected(&self) -> bool {
        true
    }

    /// The command has no condition that could fail it.
    pub fn is_successful(&self) -> bool {
        true
    }

    pub fn is_conditional(&self) -> bool {
        false
    }

    /// Mutation replaying this command's effect on `key` at a backup.
    pub fn to_mutation(&self, key: &[u8]) -> Option<Mutation<V, R>> {
        self.entries
            .get(key)
            .map(|value| Mutation::ReadWriteWithValue {
                value: value.clone(),
                f: Arc::clone(&self.function),
            })
    }

    /// Apply the function to every batch entry wrapped in `ctx`.
    pub fn perform(&self, ctx: &mut dyn EntryContext) -> GridResult<Vec<EntryOutcome<R>>> {
        let conversion = self.header.conversion();
        let applier = ManyEntriesApplier::new(conversion.as_ref(), self.params().statistics());
        let outcomes = applier.apply(&self.entries, self.function.as_ref(), ctx)?;
        metrics::record_applied_entries(Self::NAME, outcomes.len());
        Ok(outcomes)
    }
}

impl<V, R> Clone for ReadWriteManyEntriesCommand<V, R> {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            entries: self.entries.clone(),
            function: Arc::clone(&self.function),
            function_name: self.function_name,
            forwarded: self.forwarded,
        }
    }
}

impl<V, R> fmt::Debug for ReadWriteManyEntriesCommand<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadWriteManyEntriesCommand")
            .field("header", &self.header)
            .field("entries", &self.entries.len())
            .field("function", &self.function_name)
            .field("forwarded", &self.forwarded)
            .finish()
    }
}

impl<V, R> fmt::Display for ReadWriteManyEntriesCommand<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.entries.keys().map(|k| display_key(k)).collect();
        write!(
            f,
            "ReadWriteManyEntriesCommand {{ entries: [{}], function: {}, forwarded: {}, conversion: {}, topology: {}, invocation: {} }}",
            keys.join(", "),
            self.function_name,
            self.forwarded,
            self.header.conversion().name(),
            self.header.topology_id(),
            self.header.invocation_id(),
        )
    }
}
