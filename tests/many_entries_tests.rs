//! Integration tests for applying functions over batches of entries.

use std::error::Error;
use std::sync::Arc;

use bytes::Bytes;
use kvgrid::container::{EntryContext, InvocationContext, LoadType, MvccEntry};
use kvgrid::error::{BoxError, GridError};
use kvgrid::functional::{
    Batch, CommandHeader, EntryOutcome, FunctionalCommand, JsonConversion, ManyEntriesApplier,
    Params, ReadWriteEntryView, ReadWriteManyEntriesCommand, StatisticsMode, Utf8Conversion,
};
use kvgrid::node::GridNode;
use kvgrid::stats::{GridStatistics, LockingMode, TransactionStatistics, TxStat};
use kvgrid::topology::{ClusterTopology, DEFAULT_VIRTUAL_NODES, Topology};
use kvgrid::types::{EntryVersion, InvocationId, Key, MemberId};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("quota exceeded for {0}")]
struct QuotaExceeded(String);

fn single_member() -> Arc<ClusterTopology> {
    Arc::new(ClusterTopology::new(
        [MemberId::new(1)],
        DEFAULT_VIRTUAL_NODES,
    ))
}

fn context_for(batch: &Batch) -> InvocationContext {
    let mut ctx = InvocationContext::new(InvocationId::random(), None);
    for key in batch.keys() {
        ctx.put_lookup_entry(MvccEntry::absent(key.clone()));
    }
    ctx
}

fn numbered(count: usize) -> Batch {
    let mut batch = Batch::with_capacity(count);
    for i in 0..count {
        batch
            .insert(Key::from(format!("key-{}", i)), Bytes::from(i.to_string()))
            .unwrap();
    }
    batch
}

fn parse_and_store(
    value: String,
    view: &mut dyn ReadWriteEntryView<String>,
) -> Result<usize, BoxError> {
    let n: usize = value.parse()?;
    view.set(value)?;
    Ok(n)
}

fn reject_over_quota(
    value: String,
    view: &mut dyn ReadWriteEntryView<String>,
) -> Result<String, BoxError> {
    if value == "over" {
        let owner = String::from_utf8_lossy(view.key()).into_owned();
        return Err(Box::new(QuotaExceeded(owner)));
    }
    view.set(value.clone())?;
    Ok(value)
}

// ============================================================================
// Applier
// ============================================================================

#[test]
fn test_applier_reports_one_outcome_per_key_in_batch_order() {
    let batch = numbered(200);
    let mut ctx = context_for(&batch);
    let applier = ManyEntriesApplier::<String>::new(&Utf8Conversion, StatisticsMode::Accumulate);

    let outcomes = applier.apply(&batch, &parse_and_store, &mut ctx).unwrap();

    let values: Vec<usize> = outcomes.into_iter().map(EntryOutcome::into_value).collect();
    assert_eq!(values, (0..200).collect::<Vec<_>>());
    assert!(ctx.entries().all(MvccEntry::is_created));
}

#[test]
fn test_applier_without_wrapped_entry_is_a_contract_violation() {
    let batch = numbered(3);
    let mut ctx = InvocationContext::new(InvocationId::random(), None);
    ctx.put_lookup_entry(MvccEntry::absent(Key::from("key-0")));
    let applier = ManyEntriesApplier::<String>::new(&Utf8Conversion, StatisticsMode::Accumulate);

    let err = applier.apply(&batch, &parse_and_store, &mut ctx).unwrap_err();

    assert!(matches!(err, GridError::MissingEntry { ref key } if key == "key-1"));
    assert!(err.is_contract_violation());
    assert!(!err.is_retriable());
}

#[test]
fn test_applier_keeps_user_error_as_source() {
    let batch = Batch::from_pairs([("k1", "ok"), ("k2", "over"), ("k3", "ok")]).unwrap();
    let mut ctx = context_for(&batch);
    let applier = ManyEntriesApplier::<String>::new(&Utf8Conversion, StatisticsMode::Accumulate);

    let err = applier.apply(&batch, &reject_over_quota, &mut ctx).unwrap_err();

    assert!(matches!(err, GridError::UserFunction(_)));
    let source = err.source().expect("user error should be the source");
    let quota = source
        .downcast_ref::<QuotaExceeded>()
        .expect("source should downcast to the user error");
    assert_eq!(quota.0, "k2");
    assert!(ctx.get(b"k1").unwrap().is_changed());
    assert!(!ctx.get(b"k3").unwrap().is_changed());
}

#[test]
fn test_applier_skip_statistics_returns_bare_outcomes() {
    let batch = numbered(4);
    let mut ctx = context_for(&batch);
    let applier = ManyEntriesApplier::<String>::new(&Utf8Conversion, StatisticsMode::Skip);

    let outcomes = applier.apply(&batch, &parse_and_store, &mut ctx).unwrap();

    assert!(outcomes.iter().all(|o| o.access().is_none()));
    assert_eq!(outcomes[3], EntryOutcome::Bare(3));
}

#[test]
fn test_snapshot_outlives_the_invocation() {
    let batch = Batch::from_pairs([("k1", "new")]).unwrap();
    let mut ctx = InvocationContext::new(InvocationId::random(), None);
    ctx.put_lookup_entry(MvccEntry::new(
        Key::from("k1"),
        Some(Bytes::from("old")),
        EntryVersion(7),
    ));
    let command = ReadWriteManyEntriesCommand::new(
        CommandHeader::new(Arc::new(Utf8Conversion)),
        batch,
        |value: String, view: &mut dyn ReadWriteEntryView<String>| -> Result<_, BoxError> {
            let before = view.snapshot()?;
            view.set(value)?;
            Ok(before)
        },
    );

    let outcome = command.perform(&mut ctx).unwrap().remove(0);
    drop(ctx);

    let flags = outcome.access().unwrap();
    assert!(flags.is_hit());
    assert!(flags.is_put());
    let snapshot = outcome.into_value();
    assert_eq!(snapshot.find().map(String::as_str), Some("old"));
    assert_eq!(snapshot.version(), EntryVersion(7));
}

// ============================================================================
// Node pipeline
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
}

fn deposit(
    amount: Account,
    view: &mut dyn ReadWriteEntryView<Account>,
) -> Result<i64, BoxError> {
    let mut account = view.find()?.unwrap_or(Account {
        owner: amount.owner.clone(),
        balance: 0,
    });
    account.balance += amount.balance;
    view.set(account.clone())?;
    Ok(account.balance)
}

fn deposits(topology: &dyn Topology, amounts: &[(&str, i64)]) -> FunctionalCommand<Account, i64> {
    let mut batch = Batch::new();
    for (owner, balance) in amounts {
        let account = Account {
            owner: owner.to_string(),
            balance: *balance,
        };
        batch
            .insert(
                Key::from(format!("account/{}", owner)),
                Bytes::from(serde_json::to_vec(&account).unwrap()),
            )
            .unwrap();
    }
    ReadWriteManyEntriesCommand::new(
        CommandHeader::new(Arc::new(JsonConversion::<Account>::new()))
            .with_topology_id(topology.current_id()),
        batch,
        deposit,
    )
    .into()
}

#[test]
fn test_json_values_are_read_modified_and_committed() {
    let topology = single_member();
    let statistics = Arc::new(GridStatistics::new());
    let node = GridNode::new(MemberId::new(1), topology.clone()).with_statistics(statistics.clone());
    let command = deposits(topology.as_ref(), &[("alice", 10), ("bob", 5)]);
    assert_eq!(command.load_type(), LoadType::Owner);

    let first = node.invoke(&command, None).unwrap();
    let second = node.invoke(&command, None).unwrap();

    let balances: Vec<i64> = first.iter().chain(&second).map(|o| *o.value()).collect();
    assert_eq!(balances, vec![10, 5, 20, 10]);
    let stored = node.container().get(b"account/alice").unwrap();
    let account: Account = serde_json::from_slice(&stored.value).unwrap();
    assert_eq!(
        account,
        Account {
            owner: "alice".to_string(),
            balance: 20
        }
    );

    let stats = statistics.snapshot();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 2);
}

#[test]
fn test_failed_invocation_commits_nothing() {
    let topology = single_member();
    let node = GridNode::new(MemberId::new(1), topology.clone());
    let command: FunctionalCommand<String, String> = ReadWriteManyEntriesCommand::new(
        CommandHeader::new(Arc::new(Utf8Conversion)).with_topology_id(topology.current_id()),
        Batch::from_pairs([("k1", "ok"), ("k2", "over")]).unwrap(),
        reject_over_quota,
    )
    .into();

    let err = node.invoke(&command, None).unwrap_err();

    assert!(matches!(err, GridError::UserFunction(_)));
    assert!(node.container().is_empty());
}

#[test]
fn test_skip_statistics_leaves_the_sink_untouched() {
    let topology = single_member();
    let statistics = Arc::new(GridStatistics::new());
    let node = GridNode::new(MemberId::new(1), topology.clone()).with_statistics(statistics.clone());
    let command: FunctionalCommand<String, usize> = ReadWriteManyEntriesCommand::new(
        CommandHeader::new(Arc::new(Utf8Conversion))
            .with_params(Params::new().with_statistics(StatisticsMode::Skip))
            .with_topology_id(topology.current_id()),
        numbered(5),
        parse_and_store,
    )
    .into();

    let outcomes = node.invoke(&command, None).unwrap();

    assert_eq!(outcomes.len(), 5);
    assert_eq!(node.container().len(), 5);
    assert_eq!(statistics.snapshot(), GridStatistics::new().snapshot());
}

#[test]
fn test_transaction_statistics_fold_on_commit() {
    let topology = single_member();
    let transaction = Arc::new(TransactionStatistics::new(LockingMode::Optimistic));
    let node =
        GridNode::new(MemberId::new(1), topology.clone()).with_statistics(transaction.clone());

    let command = deposits(topology.as_ref(), &[("alice", 1), ("bob", 2), ("carol", 3)]);
    node.invoke(&command, None).unwrap();
    transaction.terminate_local_execution();
    transaction.terminate(true);

    assert!(!transaction.is_read_only());
    assert!(transaction.is_committed());
    assert_eq!(transaction.value(TxStat::NumReads), 3);
    assert_eq!(transaction.value(TxStat::NumPuts), 3);
    assert_eq!(transaction.value(TxStat::NumSuccessfulPuts), 3);
    assert_eq!(transaction.value(TxStat::NumPrepares), 1);
}

#[test]
fn test_command_from_other_member_is_rejected() {
    let topology = single_member();
    let node = GridNode::new(MemberId::new(2), topology.clone());
    let command = deposits(topology.as_ref(), &[("alice", 1)]);

    let err = node.invoke(&command, Some(MemberId::new(1))).unwrap_err();

    assert!(matches!(err, GridError::NotOwner { member, .. } if member == MemberId::new(2)));
    assert!(err.needs_forwarding());
}
