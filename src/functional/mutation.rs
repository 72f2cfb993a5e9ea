//! Replayable per-key effects of functional commands.

use std::fmt;

use bytes::Bytes;

use crate::container::MvccEntry;
use crate::error::GridResult;
use crate::functional::command::{ReadWriteFn, ReadWriteValueFn, WriteFn};
use crate::functional::many_entries::apply_to_entry;
use crate::functional::{StatisticsMode, ValueConversion};

/// The effect of a functional command on a single key.
///
/// Backups receive mutations instead of whole commands and replay them
/// against their own copy of the entry.
pub enum Mutation<V, R> {
    ReadWrite { f: ReadWriteFn<V, R> },
    ReadWriteWithValue { value: Bytes, f: ReadWriteValueFn<V, R> },
    Write { value: Bytes, f: WriteFn<V, R> },
}

impl<V: 'static, R> Mutation<V, R> {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::ReadWrite { .. } => "read_write",
            Mutation::ReadWriteWithValue { .. } => "read_write_with_value",
            Mutation::Write { .. } => "write",
        }
    }

    /// Replay the mutation on `entry`. Statistics are never collected on replay.
    pub fn apply_to(
        &self,
        entry: &mut MvccEntry,
        conversion: &dyn ValueConversion<V>,
    ) -> GridResult<R> {
        let outcome = match self {
            Mutation::ReadWrite { f } => {
                apply_to_entry(entry, conversion, StatisticsMode::Skip, |view| f(view))?
            }
            Mutation::ReadWriteWithValue { value, f } => {
                let argument = conversion.from_storage(value)?;
                apply_to_entry(entry, conversion, StatisticsMode::Skip, |view| {
                    f(argument, view)
                })?
            }
            Mutation::Write { value, f } => {
                let argument = conversion.from_storage(value)?;
                apply_to_entry(entry, conversion, StatisticsMode::Skip, |view| {
                    f(argument, view)
                })?
            }
        };
        Ok(outcome.into_value())
    }
}

impl<V, R> fmt::Debug for Mutation<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::ReadWrite { .. } => f.write_str("Mutation::ReadWrite"),
            Mutation::ReadWriteWithValue { value, .. } => f
                .debug_struct("Mutation::ReadWriteWithValue")
                .field("value_len", &value.len())
                .finish(),
            Mutation::Write { value, .. } => f
                .debug_struct("Mutation::Write")
                .field("value_len", &value.len())
                .finish(),
        }
    }
}
