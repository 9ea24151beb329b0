use std::sync::Arc;

use log::LevelFilter;
use replistore::{
    backend::{
        error::BackendError,
        pluggables::BackendStore,
        serializer::{BinarySerializer, IdentitySerializer, Serializer},
    },
    transaction::{Transaction, TxState},
    types::{
        data_types::{HugeType, Id},
        entry::BackendEntry,
        query::Query,
    },
};

mod common;

use crate::common::{faulty_store::FaultyStore, logging::setup_logger};

fn vertex(id: i64, name: &str) -> BackendEntry {
    BackendEntry::new(HugeType::Vertex, id).column("name", name)
}

fn transaction(store: &Arc<FaultyStore>) -> Transaction<FaultyStore> {
    Transaction::new(Arc::clone(store), Arc::new(IdentitySerializer))
}

fn vertices(store: &FaultyStore) -> Vec<BackendEntry> {
    store
        .inner()
        .query(&Query::new(HugeType::Vertex))
        .unwrap()
        .collect()
}

#[test]
fn adding_the_same_entry_twice_buffers_one_addition() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);

    tx.add_entry(vertex(7, "marko")).unwrap();
    tx.add_entry(vertex(7, "vadas")).unwrap();

    let mutation = tx.pending_mutation();
    assert_eq!(mutation.additions().len(), 1);
    assert!(mutation.deletions().is_empty());

    tx.commit().unwrap();
    let stored = vertices(&store);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].column_value(b"name"), Some(&b"vadas"[..]));
}

#[test]
fn commit_calls_begin_mutate_commit_in_order_and_clears_buffers() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);

    tx.add_entry(vertex(1, "marko")).unwrap();
    tx.add_entry(vertex(2, "josh")).unwrap();
    assert_eq!(tx.state(), TxState::Dirty);

    tx.commit().unwrap();

    assert_eq!(store.calls(), vec!["begin_tx", "mutate", "commit_tx"]);
    assert_eq!(tx.state(), TxState::Idle);
    assert!(!tx.has_updates());
    assert_eq!(vertices(&store).len(), 2);
}

#[test]
fn committing_an_idle_transaction_does_not_touch_the_store() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);

    tx.commit().unwrap();

    assert!(store.calls().is_empty());
}

#[test]
fn failed_commit_retains_buffered_writes_and_does_not_roll_back() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.add_entry(vertex(1, "marko")).unwrap();
    tx.commit().unwrap();

    tx.add_entry(vertex(2, "josh")).unwrap();
    tx.remove_entry(vertex(1, "marko")).unwrap();
    let before = tx.pending_mutation();

    store.fail_on("commit_tx");
    store.clear_calls();
    let err = tx.commit().unwrap_err();

    assert!(matches!(err, BackendError::Engine { .. }));
    assert_eq!(store.calls(), vec!["begin_tx", "mutate", "commit_tx"]);
    assert_eq!(tx.state(), TxState::Dirty);
    assert_eq!(tx.pending_mutation(), before);

    // Retrying the same buffered writes succeeds once the store recovers.
    store.heal("commit_tx");
    tx.commit().unwrap();
    assert_eq!(tx.state(), TxState::Idle);
    let stored = vertices(&store);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id(), &Id::Number(2));
}

#[test]
fn failure_between_mutate_and_commit_exposes_no_partial_mutation() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    for id in 1..=3 {
        tx.add_entry(vertex(id, "v")).unwrap();
    }

    store.fail_on("commit_tx");
    assert!(tx.commit().is_err());
    assert!(vertices(&store).is_empty());

    tx.rollback().unwrap();
    assert!(vertices(&store).is_empty());
    assert_eq!(tx.additions().len(), 3);
}

#[test]
fn commit_or_rollback_reports_commit_failure_even_when_rollback_succeeds() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.add_entry(vertex(1, "marko")).unwrap();

    store.fail_on("commit_tx");
    let err = tx.commit_or_rollback().unwrap_err();

    assert!(matches!(err, BackendError::CommitFailed { .. }));
    assert!(matches!(err.root_cause(), BackendError::Engine { .. }));
    assert_eq!(
        store.calls(),
        vec!["begin_tx", "mutate", "commit_tx", "rollback_tx"]
    );
    assert!(tx.has_updates());
}

#[test]
fn commit_or_rollback_swallows_rollback_failure() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.add_entry(vertex(1, "marko")).unwrap();

    store.fail_on("mutate");
    store.fail_on("rollback_tx");
    let err = tx.commit_or_rollback().unwrap_err();

    assert!(matches!(err, BackendError::CommitFailed { .. }));
    assert_eq!(store.calls(), vec!["begin_tx", "mutate", "rollback_tx"]);
}

#[test]
fn dirty_read_flushes_before_reaching_the_store() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.add_entry(vertex(1, "marko")).unwrap();

    let results: Vec<BackendEntry> = tx.query(Query::new(HugeType::Vertex)).unwrap().collect();

    assert_eq!(
        store.calls(),
        vec!["begin_tx", "mutate", "commit_tx", "query"]
    );
    assert_eq!(results.len(), 1);
    assert_eq!(tx.state(), TxState::Idle);
}

#[test]
fn clean_read_goes_straight_to_the_store() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);

    assert_eq!(tx.query_number(Query::new(HugeType::Vertex)).unwrap(), 0);

    assert_eq!(store.calls(), vec!["query_number"]);
}

#[test]
fn dirty_read_whose_flush_fails_never_reaches_the_store() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.add_entry(vertex(1, "marko")).unwrap();

    store.fail_on("mutate");
    let err = tx.query(Query::new(HugeType::Vertex)).err().unwrap();

    assert!(matches!(err, BackendError::CommitFailed { .. }));
    assert!(!store.calls().contains(&"query"));
    assert!(tx.has_updates());
}

#[test]
fn auto_commit_flushes_after_every_write() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);

    tx.write(|tx| tx.add_entry(vertex(1, "marko"))).unwrap();
    assert_eq!(tx.state(), TxState::Dirty);
    assert!(store.calls().is_empty());

    tx.set_auto_commit(true);
    tx.write(|tx| tx.add_entry(vertex(2, "josh"))).unwrap();
    assert_eq!(tx.state(), TxState::Idle);
    assert_eq!(vertices(&store).len(), 2);
}

#[test]
fn auto_commit_failure_is_reported_as_commit_failure() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.set_auto_commit(true);

    store.fail_on("begin_tx");
    let err = tx.write(|tx| tx.add_entry(vertex(1, "marko"))).unwrap_err();

    assert!(matches!(err, BackendError::CommitFailed { .. }));
    assert!(tx.has_updates());
}

#[test]
fn point_lookups() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.add_entry(vertex(1, "marko")).unwrap();

    let found = tx.get(HugeType::Vertex, 1i64).unwrap();
    assert_eq!(found.column_value(b"name"), Some(&b"marko"[..]));
    assert!(tx.query_one(HugeType::EdgeOut, 1i64).unwrap().is_none());

    let err = tx.get(HugeType::Vertex, 42i64).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn ids_are_rewritten_through_the_serializer() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let serializer = Arc::new(BinarySerializer);
    let mut tx: Transaction<FaultyStore> =
        Transaction::new(Arc::clone(&store), serializer.clone());

    let physical = serializer.encode_id(&Id::Number(7));
    tx.add_entry(BackendEntry::new(HugeType::Vertex, physical.clone()))
        .unwrap();
    tx.commit().unwrap();

    // Logical ids in lookups are encoded before they reach the store.
    assert_eq!(tx.get(HugeType::Vertex, 7i64).unwrap().id(), &physical);

    tx.remove_by_id(HugeType::Vertex, &Id::Number(7)).unwrap();
    assert_eq!(tx.deletions().as_slice()[0].id(), &physical);
    tx.commit().unwrap();
    assert!(tx.query_one(HugeType::Vertex, 7i64).unwrap().is_none());
}

#[test]
fn entries_with_empty_ids_are_rejected() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);

    let err = tx.add_entry(BackendEntry::new(HugeType::Vertex, "")).unwrap_err();
    assert!(matches!(err, BackendError::InvalidEntry(_)));
    assert!(tx.remove_entry(BackendEntry::new(HugeType::Vertex, Vec::<u8>::new())).is_err());
    assert_eq!(tx.state(), TxState::Idle);
}

#[test]
fn clear_updates_discards_retained_writes() {
    setup_logger(LevelFilter::Debug);
    let store = FaultyStore::ready("graph", "g");
    let mut tx = transaction(&store);
    tx.add_entry(vertex(1, "marko")).unwrap();
    store.fail_on("commit_tx");
    assert!(tx.commit().is_err());

    tx.clear_updates();

    assert_eq!(tx.state(), TxState::Idle);
    assert!(tx.pending_mutation().is_empty());
}
