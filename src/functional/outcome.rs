//! Per-entry results of functional application.

use crate::container::MvccEntry;
use crate::functional::ViewAccess;

/// How a function accessed one entry.
///
/// Bits are captured once, right after the function returns, from the entry
/// state and the view's access log. The write bit comes from the view, not
/// from the entry: an entry stays changed for the whole invocation, so a
/// read-only re-application over the same context is not a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccessFlags(u8);

impl AccessFlags {
    const READ: u8 = 1;
    const EXISTED_BEFORE: u8 = 1 << 1;
    const EXISTS_AFTER: u8 = 1 << 2;
    const CHANGED: u8 = 1 << 3;

    pub fn from_entry(entry: &MvccEntry, existed_before: bool, access: ViewAccess) -> Self {
        let mut bits = 0;
        if access.read {
            bits |= Self::READ;
        }
        if existed_before {
            bits |= Self::EXISTED_BEFORE;
        }
        if entry.exists() {
            bits |= Self::EXISTS_AFTER;
        }
        if access.written {
            bits |= Self::CHANGED;
        }
        AccessFlags(bits)
    }

    #[inline]
    pub fn was_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    #[inline]
    pub fn existed_before(self) -> bool {
        self.0 & Self::EXISTED_BEFORE != 0
    }

    #[inline]
    pub fn exists_after(self) -> bool {
        self.0 & Self::EXISTS_AFTER != 0
    }

    #[inline]
    pub fn is_changed(self) -> bool {
        self.0 & Self::CHANGED != 0
    }

    /// The function read a value that was present.
    pub fn is_hit(self) -> bool {
        self.was_read() && self.existed_before()
    }

    /// The function read and found nothing.
    pub fn is_miss(self) -> bool {
        self.was_read() && !self.existed_before()
    }

    /// The function stored a value.
    pub fn is_put(self) -> bool {
        self.is_changed() && self.exists_after()
    }

    /// The function removed a value that was present.
    pub fn is_delete(self) -> bool {
        self.is_changed() && !self.exists_after() && self.existed_before()
    }

    /// Reads can be skipped when accounting this entry.
    pub fn is_read_skip(self) -> bool {
        !self.was_read()
    }

    /// Writes can be skipped when accounting or replicating this entry.
    pub fn is_write_skip(self) -> bool {
        !self.is_changed()
    }
}

/// A function result together with the access flags of its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsEnvelope<R> {
    value: R,
    flags: AccessFlags,
}

impl<R> StatsEnvelope<R> {
    pub fn create(value: R, entry: &MvccEntry, existed_before: bool, access: ViewAccess) -> Self {
        Self {
            value,
            flags: AccessFlags::from_entry(entry, existed_before, access),
        }
    }

    pub fn value(&self) -> &R {
        &self.value
    }

    pub fn into_value(self) -> R {
        self.value
    }

    pub fn flags(&self) -> AccessFlags {
        self.flags
    }
}

/// Result of applying a function to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome<R> {
    /// Statistics were skipped for this invocation.
    Bare(R),
    /// Statistics are accumulated; the flags travel with the value.
    Enveloped(StatsEnvelope<R>),
}

impl<R> EntryOutcome<R> {
    pub fn value(&self) -> &R {
        match self {
            EntryOutcome::Bare(value) => value,
            EntryOutcome::Enveloped(envelope) => envelope.value(),
        }
    }

    pub fn into_value(self) -> R {
        match self {
            EntryOutcome::Bare(value) => value,
            EntryOutcome::Enveloped(envelope) => envelope.into_value(),
        }
    }

    pub fn envelope(&self) -> Option<&StatsEnvelope<R>> {
        match self {
            EntryOutcome::Bare(_) => None,
            EntryOutcome::Enveloped(envelope) => Some(envelope),
        }
    }

    /// Access flags, when statistics were accumulated.
    pub fn access(&self) -> Option<AccessFlags> {
        self.envelope().map(StatsEnvelope::flags)
    }

    pub fn map<U>(self, f: impl FnOnce(R) -> U) -> EntryOutcome<U> {
        match self {
            EntryOutcome::Bare(value) => EntryOutcome::Bare(f(value)),
            EntryOutcome::Enveloped(envelope) => EntryOutcome::Enveloped(StatsEnvelope {
                value: f(envelope.value),
                flags: envelope.flags,
            }),
        }
    }
}
