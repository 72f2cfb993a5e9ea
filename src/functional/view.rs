//! Entry views handed to user functions.
//!
//! A view is the only way a function touches an entry. The concrete
//! [`AccessLoggingView`] records whether the function read and whether it
//! wrote, so statistics can tell a hit from a blind write and skip entries
//! the function never looked at.

use crate::container::MvccEntry;
use crate::error::{GridError, GridResult};
use crate::functional::ValueConversion;
use crate::types::{EntryVersion, Key, display_key};

/// Read access to one entry.
pub trait ReadEntryView<V> {
    fn key(&self) -> &Key;

    /// Current value, if any. Marks the view as read.
    fn find(&mut self) -> GridResult<Option<V>>;

    /// Current value, failing with [`GridError::NoSuchElement`] when absent.
    fn get(&mut self) -> GridResult<V> {
        match self.find()? {
            Some(value) => Ok(value),
            None => Err(GridError::NoSuchElement {
                key: display_key(self.key()),
            }),
        }
    }

    /// Version the entry was loaded at.
    fn version(&self) -> EntryVersion;

    /// Owned copy of the entry's current state. Marks the view as read.
    fn snapshot(&mut self) -> GridResult<EntrySnapshot<V>> {
        let value = self.find()?;
        Ok(EntrySnapshot {
            key: self.key().clone(),
            value,
            version: self.version(),
        })
    }
}

/// Write access to one entry.
pub trait WriteEntryView<V> {
    /// Replace the value. Marks the view as written.
    fn set(&mut self, value: V) -> GridResult<()>;

    /// Remove the value. Marks the view as written.
    fn remove(&mut self);
}

/// Read and write access to one entry.
pub trait ReadWriteEntryView<V>: ReadEntryView<V> + WriteEntryView<V> {}

impl<V, T> ReadWriteEntryView<V> for T where T: ReadEntryView<V> + WriteEntryView<V> + ?Sized {}

/// What a function did through a view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewAccess {
    pub read: bool,
    pub written: bool,
}

/// View over an [`MvccEntry`] that logs reads and writes.
pub struct AccessLoggingView<'a, V> {
    entry: &'a mut MvccEntry,
    conversion: &'a dyn ValueConversion<V>,
    access: ViewAccess,
}

impl<'a, V> AccessLoggingView<'a, V> {
    pub fn new(entry: &'a mut MvccEntry, conversion: &'a dyn ValueConversion<V>) -> Self {
        Self {
            entry,
            conversion,
            access: ViewAccess::default(),
        }
    }

    pub fn is_read(&self) -> bool {
        self.access.read
    }

    pub fn is_written(&self) -> bool {
        self.access.written
    }

    /// Release the entry, returning the access that was logged.
    pub fn into_access(self) -> ViewAccess {
        self.access
    }
}

impl<V> ReadEntryView<V> for AccessLoggingView<'_, V> {
    fn key(&self) -> &Key {
        self.entry.key()
    }

    fn find(&mut self) -> GridResult<Option<V>> {
        self.access.read = true;
        self.entry
            .value()
            .map(|raw| self.conversion.from_storage(raw))
            .transpose()
    }

    fn version(&self) -> EntryVersion {
        self.entry.version()
    }
}

impl<V> WriteEntryView<V> for AccessLoggingView<'_, V> {
    fn set(&mut self, value: V) -> GridResult<()> {
        let raw = self.conversion.to_storage(&value)?;
        self.entry.set_value(raw);
        self.access.written = true;
        Ok(())
    }

    fn remove(&mut self) {
        self.entry.set_removed();
        self.access.written = true;
    }
}

/// Immutable copy of an entry, safe to return out of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot<V> {
    key: Key,
    value: Option<V>,
    version: EntryVersion,
}

impl<V> EntrySnapshot<V> {
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn find(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.value
    }

    pub fn version(&self) -> EntryVersion {
        self.version
    }
}
