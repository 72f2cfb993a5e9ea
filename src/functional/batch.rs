//! Ordered key/value batches submitted as one functional command.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{GridError, GridResult};
use crate::types::{Key, display_key};

/// Ordered mapping from key to raw value.
///
/// Keys are unique and iteration follows insertion order, which is also the
/// order of the outcomes a command produces for the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<(Key, Bytes)>,
    index: HashMap<Key, usize>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Build a batch from pairs, rejecting duplicate keys.
    pub fn from_pairs<I, K, V>(pairs: I) -> GridResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<Bytes>,
    {
        let iter = pairs.into_iter();
        let mut batch = Self::with_capacity(iter.size_hint().0);
        for (key, value) in iter {
            batch.insert(key.into(), value.into())?;
        }
        Ok(batch)
    }

    /// Append an entry at the end of the batch.
    pub fn insert(&mut self, key: Key, value: Bytes) -> GridResult<()> {
        if self.index.contains_key(&key) {
            return Err(GridError::DuplicateKey {
                key: display_key(&key),
            });
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Bytes)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl IntoIterator for Batch {
    type Item = (Key, Bytes);
    type IntoIter = std::vec::IntoIter<(Key, Bytes)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
