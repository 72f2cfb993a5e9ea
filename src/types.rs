//! Type-safe wrappers for grid identifiers.
//!
//! These newtypes keep member identities, topology generations and entry
//! versions from being mixed up even though they share integer representations.

use std::fmt;

use uuid::Uuid;

/// Raw key as stored in the grid.
pub type Key = bytes::Bytes;

/// Identity of a cluster member.
///
/// Member IDs are assigned by the membership layer and are stable for the
/// lifetime of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MemberId(pub u32);

impl MemberId {
    /// Create a new member ID from a raw value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        MemberId(value)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for MemberId {
    fn from(value: u32) -> Self {
        MemberId(value)
    }
}

impl From<MemberId> for u32 {
    fn from(id: MemberId) -> Self {
        id.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// Generation of the cluster topology.
///
/// Every membership change produces a strictly greater topology ID. Commands
/// carry the ID they were routed under so owners can detect stale routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TopologyId(pub u64);

impl TopologyId {
    /// The topology before any member joined.
    pub const INITIAL: Self = TopologyId(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        TopologyId(value)
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The generation following this one.
    #[inline]
    pub const fn next(self) -> Self {
        TopologyId(self.0 + 1)
    }
}

impl fmt::Display for TopologyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version of a committed entry.
///
/// Versions come from a per-container counter, so a higher version always
/// means a later commit on that node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryVersion(pub u64);

impl EntryVersion {
    /// Version of an entry that was never committed.
    pub const NONE: Self = EntryVersion(0);

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Unique identifier of one command invocation.
///
/// A forwarded command keeps the invocation ID of the original submission so
/// that both applications can be correlated in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Generate a fresh random invocation ID.
    pub fn random() -> Self {
        InvocationId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render a raw key for logs and error messages.
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_display() {
        assert_eq!(MemberId::new(3).to_string(), "member-3");
        assert_eq!(u32::from(MemberId::from(7)), 7);
    }

    #[test]
    fn test_topology_id_next_is_strictly_greater() {
        let id = TopologyId::INITIAL;
        assert!(id.next() > id);
        assert_eq!(id.next().value(), 1);
    }

    #[test]
    fn test_invocation_ids_are_unique() {
        let a = InvocationId::random();
        let b = InvocationId::random();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_display_key_is_lossy_utf8() {
        assert_eq!(display_key(b"k1"), "k1");
        assert_eq!(display_key(&[0xff, b'a']), "\u{fffd}a");
    }
}
