//! Versioned, mutable entry handle used during one invocation.

use bytes::Bytes;

use crate::types::{EntryVersion, Key};

/// A multi-version entry wrapped into an invocation context.
///
/// The entry starts as a copy of the committed state (or as absent) and
/// accumulates the invocation's mutations. The `changed`, `created` and
/// `removed` flags only ever go from `false` to `true`; the data container
/// inspects them at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvccEntry {
    key: Key,
    value: Option<Bytes>,
    version: EntryVersion,
    changed: bool,
    created: bool,
    removed: bool,
}

impl MvccEntry {
    /// Wrap a committed (or absent) value.
    pub fn new(key: Key, value: Option<Bytes>, version: EntryVersion) -> Self {
        Self {
            key,
            value,
            version,
            changed: false,
            created: false,
            removed: false,
        }
    }

    /// Wrap a key with no committed value.
    pub fn absent(key: Key) -> Self {
        Self::new(key, None, EntryVersion::NONE)
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Current value as seen by this invocation.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// Version the entry was wrapped at.
    pub fn version(&self) -> EntryVersion {
        self.version
    }

    /// Check if the entry currently holds a value.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// Replace the value, marking the entry changed.
    pub fn set_value(&mut self, value: Bytes) {
        if self.value.is_none() {
            self.created = true;
        }
        self.value = Some(value);
        self.changed = true;
    }

    /// Clear the value, marking the entry changed and removed.
    ///
    /// Setting a value again after a removal keeps the `removed` flag; the
    /// commit looks at the final value, not at the flag.
    pub fn set_removed(&mut self) {
        self.value = None;
        self.changed = true;
        self.removed = true;
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_entry() {
        let entry = MvccEntry::absent(Bytes::from_static(b"k"));
        assert!(!entry.exists());
        assert_eq!(entry.version(), EntryVersion::NONE);
        assert!(!entry.is_changed());
    }

    #[test]
    fn test_set_value_on_absent_marks_created() {
        let mut entry = MvccEntry::absent(Bytes::from_static(b"k"));
        entry.set_value(Bytes::from_static(b"v"));
        assert!(entry.exists());
        assert!(entry.is_changed());
        assert!(entry.is_created());
        assert!(!entry.is_removed());
    }

    #[test]
    fn test_set_value_on_existing_is_not_created() {
        let mut entry = MvccEntry::new(
            Bytes::from_static(b"k"),
            Some(Bytes::from_static(b"a")),
            EntryVersion(4),
        );
        entry.set_value(Bytes::from_static(b"b"));
        assert_eq!(entry.value(), Some(&Bytes::from_static(b"b")));
        assert!(!entry.is_created());
        assert_eq!(entry.version(), EntryVersion(4));
    }

    #[test]
    fn test_flags_are_monotonic() {
        let mut entry = MvccEntry::new(
            Bytes::from_static(b"k"),
            Some(Bytes::from_static(b"a")),
            EntryVersion(1),
        );
        entry.set_removed();
        entry.set_value(Bytes::from_static(b"c"));
        assert!(entry.is_removed());
        assert!(entry.is_changed());
        assert!(entry.exists());
    }
}
