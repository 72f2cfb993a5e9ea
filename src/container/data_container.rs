//! Committed in-memory key space of one node.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::trace;

use crate::container::{EntryContext, InvocationContext, MvccEntry};
use crate::types::{EntryVersion, Key, display_key};

/// How a command wants its entries wrapped before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadType {
    /// The command never reads the previous value; entries are wrapped absent.
    DontLoad,
    /// Load the previous value on the primary owner only.
    Primary,
    /// Load the previous value on every owner the command runs on.
    Owner,
}

/// A committed value and the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Bytes,
    pub version: EntryVersion,
}

/// Summary of one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub written: usize,
    pub removed: usize,
}

/// Concurrent committed key space.
///
/// Readers and writers on different keys never contend; per-key atomicity is
/// provided by the map shards. Command isolation on the same key is the
/// responsibility of the locking layer in front of the container.
#[derive(Debug, Default)]
pub struct DataContainer {
    entries: DashMap<Key, StoredValue>,
    last_version: AtomicU64,
}

impl DataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<StoredValue> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write a value directly, bypassing any invocation context.
    pub fn put(&self, key: Key, value: Bytes) -> EntryVersion {
        let version = self.next_version();
        self.entries.insert(key, StoredValue { value, version });
        version
    }

    pub fn remove(&self, key: &[u8]) -> Option<StoredValue> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Wrap `keys` into `ctx` according to `load_type`.
    ///
    /// Keys already present in the context are left untouched so a context can
    /// be reused for a forwarded re-application.
    pub fn wrap_entries<'k>(
        &self,
        ctx: &mut InvocationContext,
        keys: impl IntoIterator<Item = &'k Key>,
        load_type: LoadType,
    ) {
        for key in keys {
            if ctx.get(key).is_some() {
                continue;
            }
            let entry = match load_type {
                LoadType::DontLoad => MvccEntry::absent(key.clone()),
                LoadType::Primary | LoadType::Owner => match self.get(key) {
                    Some(stored) => MvccEntry::new(key.clone(), Some(stored.value), stored.version),
                    None => MvccEntry::absent(key.clone()),
                },
            };
            ctx.put_lookup_entry(entry);
        }
    }

    /// Apply every changed entry of `ctx` to the committed state.
    pub fn commit(&self, ctx: &InvocationContext) -> CommitSummary {
        let mut summary = CommitSummary::default();
        for entry in ctx.entries().filter(|e| e.is_changed()) {
            match entry.value() {
                Some(value) => {
                    let version = self.put(entry.key().clone(), value.clone());
                    trace!(key = %display_key(entry.key()), %version, "Committed entry");
                    summary.written += 1;
                }
                None => {
                    if self.remove(entry.key()).is_some() {
                        trace!(key = %display_key(entry.key()), "Removed entry");
                    }
                    summary.removed += 1;
                }
            }
        }
        summary
    }

    fn next_version(&self) -> EntryVersion {
        EntryVersion(self.last_version.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
