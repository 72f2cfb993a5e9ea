//! Per-invocation view over the key space.

use std::collections::HashMap;

use crate::container::MvccEntry;
use crate::types::{InvocationId, Key, MemberId};

/// Lookup of the entries an invocation may touch.
///
/// The invocation pipeline populates the context before a command runs;
/// commands only look entries up and mutate them in place.
pub trait EntryContext {
    /// Find the entry wrapped for `key`, if the pipeline loaded one.
    fn lookup_entry(&mut self, key: &[u8]) -> Option<&mut MvccEntry>;

    /// Add (or replace) a wrapped entry.
    fn put_lookup_entry(&mut self, entry: MvccEntry);

    /// Number of entries currently wrapped.
    fn lookup_count(&self) -> usize;
}

/// Default [`EntryContext`] used by the node pipeline.
#[derive(Debug)]
pub struct InvocationContext {
    invocation_id: InvocationId,
    origin: Option<MemberId>,
    entries: HashMap<Key, MvccEntry>,
}

impl InvocationContext {
    pub fn new(invocation_id: InvocationId, origin: Option<MemberId>) -> Self {
        Self {
            invocation_id,
            origin,
            entries: HashMap::new(),
        }
    }

    pub fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    /// Member that originated the command, `None` for local invocations.
    pub fn origin(&self) -> Option<MemberId> {
        self.origin
    }

    pub fn is_origin_local(&self) -> bool {
        self.origin.is_none()
    }

    /// Iterate over wrapped entries (unordered).
    pub fn entries(&self) -> impl Iterator<Item = &MvccEntry> {
        self.entries.values()
    }

    /// Read-only lookup.
    pub fn get(&self, key: &[u8]) -> Option<&MvccEntry> {
        self.entries.get(key)
    }
}

impl EntryContext for InvocationContext {
    fn lookup_entry(&mut self, key: &[u8]) -> Option<&mut MvccEntry> {
        self.entries.get_mut(key)
    }

    fn put_lookup_entry(&mut self, entry: MvccEntry) {
        self.entries.insert(entry.key().clone(), entry);
    }

    fn lookup_count(&self) -> usize {
        self.entries.len()
    }
}
