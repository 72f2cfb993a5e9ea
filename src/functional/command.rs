//! Functional commands and their shared header.
//!
//! Every functional command applies a user function to one or more entries
//! through an entry view. They differ in which view the function receives,
//! whether the function takes an argument, and how entries are loaded before
//! the command runs:
//!
//! | Command | Function | Load type |
//! |---|---|---|
//! | [`ReadOnlyKeyCommand`] | `Fn(&mut dyn ReadEntryView<V>)` | Owner |
//! | [`WriteOnlyKeyValueCommand`] | `Fn(V, &mut dyn WriteEntryView<V>)` | DontLoad |
//! | [`ReadWriteKeyCommand`] | `Fn(&mut dyn ReadWriteEntryView<V>)` | Owner |
//! | [`ReadWriteManyCommand`] | `Fn(&mut dyn ReadWriteEntryView<V>)` per key | Owner |
//! | [`ReadWriteManyEntriesCommand`] | `Fn(V, &mut dyn ReadWriteEntryView<V>)` per entry | Owner |
//!
//! [`FunctionalCommand`] closes the set so the node pipeline can dispatch on
//! it with a single `match`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::container::{EntryContext, LoadType};
use crate::error::{BoxError, GridResult};
use crate::functional::many_entries::{apply_to_entry, require_entry};
use crate::functional::{
    EntryOutcome, Mutation, Params, ReadEntryView, ReadWriteEntryView, ReadWriteManyEntriesCommand,
    ValueConversion, WriteEntryView,
};
use crate::metrics;
use crate::types::{InvocationId, Key, TopologyId, display_key};

/// Function reading one entry.
pub type ReadFn<V, R> =
    Arc<dyn Fn(&mut dyn ReadEntryView<V>) -> Result<R, BoxError> + Send + Sync>;

/// Function writing one entry from an argument, without reading it.
pub type WriteFn<V, R> =
    Arc<dyn Fn(V, &mut dyn WriteEntryView<V>) -> Result<R, BoxError> + Send + Sync>;

/// Function reading and writing one entry.
pub type ReadWriteFn<V, R> =
    Arc<dyn Fn(&mut dyn ReadWriteEntryView<V>) -> Result<R, BoxError> + Send + Sync>;

/// Function reading and writing one entry given an argument.
pub type ReadWriteValueFn<V, R> =
    Arc<dyn Fn(V, &mut dyn ReadWriteEntryView<V>) -> Result<R, BoxError> + Send + Sync>;

/// State every functional command carries besides its keys and function.
pub struct CommandHeader<V> {
    invocation_id: InvocationId,
    params: Params,
    topology_id: TopologyId,
    conversion: Arc<dyn ValueConversion<V>>,
}

impl<V> CommandHeader<V> {
    pub fn new(conversion: Arc<dyn ValueConversion<V>>) -> Self {
        Self {
            invocation_id: InvocationId::random(),
            params: Params::default(),
            topology_id: TopologyId::INITIAL,
            conversion,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_topology_id(mut self, topology_id: TopologyId) -> Self {
        self.topology_id = topology_id;
        self
    }

    pub fn with_invocation_id(mut self, invocation_id: InvocationId) -> Self {
        self.invocation_id = invocation_id;
        self
    }

    pub fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    pub fn params(&self) -> Params {
        self.params
    }

    /// Topology the command was routed under.
    pub fn topology_id(&self) -> TopologyId {
        self.topology_id
    }

    pub fn set_topology_id(&mut self, topology_id: TopologyId) {
        self.topology_id = topology_id;
    }

    pub fn conversion(&self) -> &Arc<dyn ValueConversion<V>> {
        &self.conversion
    }
}

impl<V> Clone for CommandHeader<V> {
    fn clone(&self) -> Self {
        Self {
            invocation_id: self.invocation_id,
            params: self.params,
            topology_id: self.topology_id,
            conversion: Arc::clone(&self.conversion),
        }
    }
}

impl<V> fmt::Debug for CommandHeader<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHeader")
            .field("invocation_id", &self.invocation_id)
            .field("params", &self.params)
            .field("topology_id", &self.topology_id)
            .field("conversion", &self.conversion.name())
            .finish()
    }
}

/// Read one key.
pub struct ReadOnlyKeyCommand<V, R> {
    header: CommandHeader<V>,
    key: Key,
    function: ReadFn<V, R>,
}

impl<V: 'static, R: 'static> ReadOnlyKeyCommand<V, R> {
    pub const NAME: &'static str = "read_only_key";

    pub fn new<F>(header: CommandHeader<V>, key: impl Into<Key>, function: F) -> Self
    where
        F: Fn(&mut dyn ReadEntryView<V>) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            header,
            key: key.into(),
            function: Arc::new(function),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn perform(&self, ctx: &mut dyn EntryContext) -> GridResult<EntryOutcome<R>> {
        let entry = require_entry(ctx, &self.key, Self::NAME)?;
        apply_to_entry(
            entry,
            self.header.conversion.as_ref(),
            self.header.params.statistics(),
            |view| (self.function)(view),
        )
    }
}

/// Write one key from an argument without loading its previous value.
pub struct WriteOnlyKeyValueCommand<V, R> {
    header: CommandHeader<V>,
    key: Key,
    value: Bytes,
    function: WriteFn<V, R>,
}

impl<V: 'static, R: 'static> WriteOnlyKeyValueCommand<V, R> {
    pub const NAME: &'static str = "write_only_key_value";

    pub fn new<F>(
        header: CommandHeader<V>,
        key: impl Into<Key>,
        value: impl Into<Bytes>,
        function: F,
    ) -> Self
    where
        F: Fn(V, &mut dyn WriteEntryView<V>) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            header,
            key: key.into(),
            value: value.into(),
            function: Arc::new(function),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn perform(&self, ctx: &mut dyn EntryContext) -> GridResult<EntryOutcome<R>> {
        let entry = require_entry(ctx, &self.key, Self::NAME)?;
        let argument = self.header.conversion.from_storage(&self.value)?;
        apply_to_entry(
            entry,
            self.header.conversion.as_ref(),
            self.header.params.statistics(),
            |view| (self.function)(argument, view),
        )
    }
}

/// Read and write one key.
pub struct ReadWriteKeyCommand<V, R> {
    header: CommandHeader<V>,
    key: Key,
    function: ReadWriteFn<V, R>,
}

impl<V: 'static, R: 'static> ReadWriteKeyCommand<V, R> {
    pub const NAME: &'static str = "read_write_key";

    pub fn new<F>(header: CommandHeader<V>, key: impl Into<Key>, function: F) -> Self
    where
        F: Fn(&mut dyn ReadWriteEntryView<V>) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            header,
            key: key.into(),
            function: Arc::new(function),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn perform(&self, ctx: &mut dyn EntryContext) -> GridResult<EntryOutcome<R>> {
        let entry = require_entry(ctx, &self.key, Self::NAME)?;
        apply_to_entry(
            entry,
            self.header.conversion.as_ref(),
            self.header.params.statistics(),
            |view| (self.function)(view),
        )
    }
}

/// Read and write every key of a set with the same function.
pub struct ReadWriteManyCommand<V, R> {
    header: CommandHeader<V>,
    keys: Vec<Key>,
    function: ReadWriteFn<V, R>,
    forwarded: bool,
}

impl<V: 'static, R: 'static> ReadWriteManyCommand<V, R> {
    pub const NAME: &'static str = "read_write_many";

    pub fn new<F>(header: CommandHeader<V>, keys: Vec<Key>, function: F) -> Self
    where
        F: Fn(&mut dyn ReadWriteEntryView<V>) -> Result<R, BoxError> + Send + Sync + 'static,
    {
        Self {
            header,
            keys,
            function: Arc::new(function),
            forwarded: false,
        }
    }

    /// Copy of this command targeting `keys` instead.
    pub fn with_keys(&self, keys: Vec<Key>) -> Self {
        Self {
            header: self.header.clone(),
            keys,
            function: Arc::clone(&self.function),
            forwarded: self.forwarded,
        }
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    pub fn set_forwarded(&mut self, forwarded: bool) {
        self.forwarded = forwarded;
    }

    pub fn perform(&self, ctx: &mut dyn EntryContext) -> GridResult<Vec<EntryOutcome<R>>> {
        let mut outcomes = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let entry = require_entry(ctx, key, Self::NAME)?;
            outcomes.push(apply_to_entry(
                entry,
                self.header.conversion.as_ref(),
                self.header.params.statistics(),
                |view| (self.function)(view),
            )?);
        }
        metrics::record_applied_entries(Self::NAME, outcomes.len());
        Ok(outcomes)
    }
}

macro_rules! impl_clone_single_key {
    ($($command:ident),+) => {
        $(
            impl<V, R> Clone for $command<V, R> {
                fn clone(&self) -> Self {
                    Self {
                        header: self.header.clone(),
                        key: self.key.clone(),
                        function: Arc::clone(&self.function),
                    }
                }
            }
        )+
    };
}

impl_clone_single_key!(ReadOnlyKeyCommand, ReadWriteKeyCommand);

impl<V, R> Clone for WriteOnlyKeyValueCommand<V, R> {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
            function: Arc::clone(&self.function),
        }
    }
}

impl<V, R> Clone for ReadWriteManyCommand<V, R> {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            keys: self.keys.clone(),
            function: Arc::clone(&self.function),
            forwarded: self.forwarded,
        }
    }
}

/// Closed set of functional commands.
pub enum FunctionalCommand<V, R> {
    ReadOnlyKey(ReadOnlyKeyCommand<V, R>),
    WriteOnlyKeyValue(WriteOnlyKeyValueCommand<V, R>),
    ReadWriteKey(ReadWriteKeyCommand<V, R>),
    ReadWriteMany(ReadWriteManyCommand<V, R>),
    ReadWriteManyEntries(ReadWriteManyEntriesCommand<V, R>),
}

impl<V: 'static, R: 'static> FunctionalCommand<V, R> {
    pub fn name(&self) -> &'static str {
        match self {
            FunctionalCommand::ReadOnlyKey(_) => ReadOnlyKeyCommand::<V, R>::NAME,
            FunctionalCommand::WriteOnlyKeyValue(_) => WriteOnlyKeyValueCommand::<V, R>::NAME,
            FunctionalCommand::ReadWriteKey(_) => ReadWriteKeyCommand::<V, R>::NAME,
            FunctionalCommand::ReadWriteMany(_) => ReadWriteManyCommand::<V, R>::NAME,
            FunctionalCommand::ReadWriteManyEntries(_) => {
                ReadWriteManyEntriesCommand::<V, R>::NAME
            }
        }
    }

    pub fn header(&self) -> &CommandHeader<V> {
        match self {
            FunctionalCommand::ReadOnlyKey(c) => &c.header,
            FunctionalCommand::WriteOnlyKeyValue(c) => &c.header,
            FunctionalCommand::ReadWriteKey(c) => &c.header,
            FunctionalCommand::ReadWriteMany(c) => &c.header,
            FunctionalCommand::ReadWriteManyEntries(c) => c.header(),
        }
    }

    pub fn topology_id(&self) -> TopologyId {
        self.header().topology_id()
    }

    pub fn set_topology_id(&mut self, topology_id: TopologyId) {
        match self {
            FunctionalCommand::ReadOnlyKey(c) => c.header.set_topology_id(topology_id),
            FunctionalCommand::WriteOnlyKeyValue(c) => c.header.set_topology_id(topology_id),
            FunctionalCommand::ReadWriteKey(c) => c.header.set_topology_id(topology_id),
            FunctionalCommand::ReadWriteMany(c) => c.header.set_topology_id(topology_id),
            FunctionalCommand::ReadWriteManyEntries(c) => c.set_topology_id(topology_id),
        }
    }

    /// Only multi-key commands track forwarding.
    pub fn is_forwarded(&self) -> bool {
        match self {
            FunctionalCommand::ReadWriteMany(c) => c.is_forwarded(),
            FunctionalCommand::ReadWriteManyEntries(c) => c.is_forwarded(),
            _ => false,
        }
    }

    pub fn set_forwarded(&mut self, forwarded: bool) {
        match self {
            FunctionalCommand::ReadWriteMany(c) => c.set_forwarded(forwarded),
            FunctionalCommand::ReadWriteManyEntries(c) => c.set_forwarded(forwarded),
            _ => {}
        }
    }

    pub fn load_type(&self) -> LoadType {
        match self {
            FunctionalCommand::WriteOnlyKeyValue(_) => LoadType::DontLoad,
            FunctionalCommand::ReadWriteManyEntries(c) => c.load_type(),
            _ => LoadType::Owner,
        }
    }

    /// Keys in the order their outcomes are produced.
    pub fn affected_keys(&self) -> Vec<Key> {
        match self {
            FunctionalCommand::ReadOnlyKey(c) => vec![c.key.clone()],
            FunctionalCommand::WriteOnlyKeyValue(c) => vec![c.key.clone()],
            FunctionalCommand::ReadWriteKey(c) => vec![c.key.clone()],
            FunctionalCommand::ReadWriteMany(c) => c.keys.clone(),
            FunctionalCommand::ReadWriteManyEntries(c) => c.affected_keys(),
        }
    }

    /// Check if the command may change entries.
    pub fn is_write(&self) -> bool {
        !matches!(self, FunctionalCommand::ReadOnlyKey(_))
    }

    /// Apply the command to the entries wrapped in `ctx`.
    pub fn perform(&self, ctx: &mut dyn EntryContext) -> GridResult<Vec<EntryOutcome<R>>> {
        match self {
            FunctionalCommand::ReadOnlyKey(c) => Ok(vec![c.perform(ctx)?]),
            FunctionalCommand::WriteOnlyKeyValue(c) => Ok(vec![c.perform(ctx)?]),
            FunctionalCommand::ReadWriteKey(c) => Ok(vec![c.perform(ctx)?]),
            FunctionalCommand::ReadWriteMany(c) => c.perform(ctx),
            FunctionalCommand::ReadWriteManyEntries(c) => c.perform(ctx),
        }
    }

    /// Mutation replaying this command on `key` at a backup owner.
    ///
    /// Read-only commands and keys outside the command yield `None`.
    pub fn to_mutation(&self, key: &[u8]) -> Option<Mutation<V, R>> {
        match self {
            FunctionalCommand::ReadOnlyKey(_) => None,
            FunctionalCommand::WriteOnlyKeyValue(c) => {
                (c.key.as_ref() == key).then(|| Mutation::Write {
                    value: c.value.clone(),
                    f: Arc::clone(&c.function),
                })
            }
            FunctionalCommand::ReadWriteKey(c) => (c.key.as_ref() == key).then(|| {
                Mutation::ReadWrite {
                    f: Arc::clone(&c.function),
                }
            }),
            FunctionalCommand::ReadWriteMany(c) => {
                c.keys.iter().any(|k| k.as_ref() == key).then(|| Mutation::ReadWrite {
                    f: Arc::clone(&c.function),
                })
            }
            FunctionalCommand::ReadWriteManyEntries(c) => c.to_mutation(key),
        }
    }
}

impl<V, R> Clone for FunctionalCommand<V, R> {
    fn clone(&self) -> Self {
        match self {
            FunctionalCommand::ReadOnlyKey(c) => FunctionalCommand::ReadOnlyKey(c.clone()),
            FunctionalCommand::WriteOnlyKeyValue(c) => {
                FunctionalCommand::WriteOnlyKeyValue(c.clone())
            }
            FunctionalCommand::ReadWriteKey(c) => FunctionalCommand::ReadWriteKey(c.clone()),
            FunctionalCommand::ReadWriteMany(c) => FunctionalCommand::ReadWriteMany(c.clone()),
            FunctionalCommand::ReadWriteManyEntries(c) => {
                FunctionalCommand::ReadWriteManyEntries(c.clone())
            }
        }
    }
}

impl<V: 'static, R: 'static> fmt::Debug for FunctionalCommand<V, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.affected_keys().iter().map(|k| display_key(k)).collect();
        f.debug_struct("FunctionalCommand")
            .field("name", &self.name())
            .field("keys", &keys)
            .field("header", self.header())
            .finish()
    }
}

impl<V, R> From<ReadOnlyKeyCommand<V, R>> for FunctionalCommand<V, R> {
    fn from(command: ReadOnlyKeyCommand<V, R>) -> Self {
        FunctionalCommand::ReadOnlyKey(command)
    }
}

impl<V, R> From<WriteOnlyKeyValueCommand<V, R>> for FunctionalCommand<V, R> {
    fn from(command: WriteOnlyKeyValueCommand<V, R>) -> Self {
        FunctionalCommand::WriteOnlyKeyValue(command)
    }
}

impl<V, R> From<ReadWriteKeyCommand<V, R>> for FunctionalCommand<V, R> {
    fn from(command: ReadWriteKeyCommand<V, R>) -> Self {
        FunctionalCommand::ReadWriteKey(command)
    }
}

impl<V, R> From<ReadWriteManyCommand<V, R>> for FunctionalCommand<V, R> {
    fn from(command: ReadWriteManyCommand<V, R>) -> Self {
        FunctionalCommand::ReadWriteMany(command)
    }
}

impl<V, R> From<ReadWriteManyEntriesCommand<V, R>> for FunctionalCommand<V, R> {
    fn from(command: ReadWriteManyEntriesCommand<V, R>) -> Self {
        FunctionalCommand::ReadWriteManyEntries(command)
    }
}
