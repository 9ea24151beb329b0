use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

use log::LevelFilter;
use replistore::{
    backend::{
        config::BackendConfig, error::BackendError, memory::MemoryStore, pluggables::BackendStore,
        serializer::IdentitySerializer,
    },
    consensus::{
        configuration::{ConsensusConfiguration, ReadMode},
        registry::GroupRegistry,
        replicated_store::ReplicatedStore,
    },
    transaction::Transaction,
    types::{
        data_types::{GroupId, HugeType, Id},
        entry::BackendEntry,
        query::Query,
        update_sets::BackendMutation,
    },
};

mod common;

use crate::common::{faulty_store::FaultyStore, logging::setup_logger, poll::wait_until};

const CONVERGENCE: Duration = Duration::from_secs(5);

struct Cluster {
    store: Arc<ReplicatedStore>,
    leader: Arc<MemoryStore>,
    followers: Vec<Arc<MemoryStore>>,
    registry: Arc<GroupRegistry>,
}

impl Cluster {
    fn start(followers: usize, config: ConsensusConfiguration) -> Cluster {
        let leader = Arc::new(MemoryStore::new("graph", "g"));
        let followers: Vec<Arc<MemoryStore>> = (0..followers)
            .map(|_| Arc::new(MemoryStore::new("graph", "g")))
            .collect();
        let registry = Arc::new(GroupRegistry::new());
        let store = ReplicatedStore::new(leader.clone(), Arc::clone(&registry), config)
            .with_followers(
                followers
                    .iter()
                    .map(|follower| Arc::clone(follower) as Arc<dyn BackendStore>)
                    .collect(),
            );
        store.open(&BackendConfig::default()).unwrap();
        store.init().unwrap();
        Cluster {
            store: Arc::new(store),
            leader,
            followers,
            registry,
        }
    }

    fn converged(&self) -> bool {
        let node = self.store.node().unwrap();
        (0..node.follower_count())
            .all(|follower| node.follower_applied_index(follower) == Some(node.commit_index()))
    }
}

fn vertex_ids(store: &dyn BackendStore) -> Vec<Id> {
    store
        .query(&Query::new(HugeType::Vertex))
        .unwrap()
        .map(|entry| entry.id().clone())
        .collect()
}

fn insert(id: i64) -> BackendMutation {
    let mut mutation = BackendMutation::new();
    mutation.add(BackendEntry::new(HugeType::Vertex, id));
    mutation
}

#[test]
fn store_is_not_ready_before_open() {
    setup_logger(LevelFilter::Debug);
    let store = ReplicatedStore::new(
        Arc::new(MemoryStore::new("graph", "g")),
        Arc::new(GroupRegistry::new()),
        ConsensusConfiguration::default(),
    );

    assert!(!store.opened());
    assert!(store.node().is_none());
    assert!(store.init().unwrap_err().is_not_ready());
    assert!(store.increase_counter(HugeType::Vertex, 1).unwrap_err().is_not_ready());
    assert!(store.query(&Query::new(HugeType::Vertex)).err().unwrap().is_not_ready());
    assert_eq!(store.group(), &GroupId::new("graph", "g"));
}

#[test]
fn every_write_is_one_committed_log_entry() {
    setup_logger(LevelFilter::Debug);
    let cluster = Cluster::start(2, ConsensusConfiguration::default());
    let node = cluster.store.node().unwrap();
    assert_eq!(node.size(), 3);
    assert_eq!(node.commit_index(), 1);

    let mut tx: Transaction = Transaction::new(cluster.store.clone(), Arc::new(IdentitySerializer));
    tx.add_entry(BackendEntry::new(HugeType::Vertex, 1i64).column("name", "marko"))
        .unwrap();
    tx.add_entry(BackendEntry::new(HugeType::Vertex, 2i64).column("name", "josh"))
        .unwrap();
    tx.commit().unwrap();

    // begin_tx, mutate, commit_tx
    assert_eq!(node.commit_index(), 4);
    assert_eq!(
        vertex_ids(cluster.leader.as_ref()),
        vec![Id::Number(1), Id::Number(2)]
    );
    assert!(wait_until(CONVERGENCE, || cluster.converged()));
    for follower in &cluster.followers {
        assert_eq!(vertex_ids(follower.as_ref()), vec![Id::Number(1), Id::Number(2)]);
    }
}

#[test]
fn apply_failure_reaches_the_caller_as_a_consensus_error() {
    setup_logger(LevelFilter::Debug);
    let local = FaultyStore::ready("graph", "g");
    let store = Arc::new(ReplicatedStore::new(
        local.clone(),
        Arc::new(GroupRegistry::new()),
        ConsensusConfiguration::default(),
    ));
    store.open(&BackendConfig::default()).unwrap();
    let mut tx: Transaction = Transaction::new(store.clone(), Arc::new(IdentitySerializer));
    tx.add_entry(BackendEntry::new(HugeType::Vertex, 1i64)).unwrap();

    local.fail_on("commit_tx");
    let err = tx.commit().unwrap_err();

    assert!(err.is_consensus());
    assert!(matches!(err.root_cause(), BackendError::Engine { .. }));
    assert!(tx.has_updates());
    assert_eq!(
        local.inner().query_number(&Query::new(HugeType::Vertex)).unwrap(),
        0
    );
}

#[test]
fn concurrent_writers_are_applied_in_one_order_on_every_replica() {
    setup_logger(LevelFilter::Info);
    const WRITERS: i64 = 4;
    const TRANSACTIONS: i64 = 10;
    let cluster = Cluster::start(2, ConsensusConfiguration::default());

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = Arc::clone(&cluster.store);
            thread::spawn(move || {
                let mut tx: Transaction = Transaction::new(store.clone(), Arc::new(IdentitySerializer));
                for i in 0..TRANSACTIONS {
                    let id = writer * TRANSACTIONS + i;
                    tx.add_entry(BackendEntry::new(HugeType::Vertex, id)).unwrap();
                    tx.commit().unwrap();
                    store.increase_counter(HugeType::Vertex, 1).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let expected: Vec<Id> = (0..WRITERS * TRANSACTIONS).map(Id::Number).collect();
    assert_eq!(vertex_ids(cluster.store.as_ref()), expected);
    assert_eq!(
        cluster.store.get_counter(HugeType::Vertex).unwrap(),
        WRITERS * TRANSACTIONS
    );

    assert!(wait_until(CONVERGENCE, || cluster.converged()));
    for follower in &cluster.followers {
        assert_eq!(vertex_ids(follower.as_ref()), expected);
        assert_eq!(
            follower.get_counter(HugeType::Vertex).unwrap(),
            WRITERS * TRANSACTIONS
        );
    }
}

#[test]
fn concurrent_counter_increments_are_never_lost() {
    setup_logger(LevelFilter::Info);
    const THREADS: i64 = 8;
    const INCREMENTS: i64 = 25;
    let cluster = Cluster::start(1, ConsensusConfiguration::default());

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&cluster.store);
            thread::spawn(move || {
                for _ in 0..INCREMENTS {
                    store.increase_counter(HugeType::EdgeOut, 1).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(
        cluster.store.get_counter(HugeType::EdgeOut).unwrap(),
        THREADS * INCREMENTS
    );
    assert!(wait_until(CONVERGENCE, || cluster.converged()));
    assert_eq!(
        cluster.followers[0].get_counter(HugeType::EdgeOut).unwrap(),
        THREADS * INCREMENTS
    );
}

#[test]
fn writes_are_rejected_while_not_leader() {
    setup_logger(LevelFilter::Debug);
    let cluster = Cluster::start(2, ConsensusConfiguration::default());
    let node = cluster.store.node().unwrap();

    node.resign();
    assert!(!node.is_leader());
    let err = cluster.store.increase_counter(HugeType::Vertex, 1).unwrap_err();
    assert!(err.is_consensus());
    assert!(err.to_string().contains("not leader"));
    // Local reads are still served.
    assert_eq!(cluster.store.get_counter(HugeType::Vertex).unwrap(), 0);

    node.campaign();
    cluster.store.increase_counter(HugeType::Vertex, 1).unwrap();
    assert_eq!(cluster.store.get_counter(HugeType::Vertex).unwrap(), 1);
    assert_eq!(node.commit_index(), 2);
}

#[test]
fn writes_fail_without_a_majority_and_followers_catch_up() {
    setup_logger(LevelFilter::Debug);
    let config = ConsensusConfiguration::builder()
        .replication_timeout(Duration::from_millis(100))
        .build();
    let cluster = Cluster::start(1, config);
    let node = cluster.store.node().unwrap();
    assert!(wait_until(CONVERGENCE, || cluster.converged()));

    node.set_follower_reachable(0, false);
    let err = cluster.store.increase_counter(HugeType::Vertex, 1).unwrap_err();
    assert!(err.is_consensus());
    assert_eq!(node.commit_index(), 1);
    assert_eq!(cluster.leader.get_counter(HugeType::Vertex).unwrap(), 0);

    node.set_follower_reachable(0, true);
    cluster.store.increase_counter(HugeType::Vertex, 5).unwrap();
    cluster.store.increase_counter(HugeType::Vertex, 2).unwrap();

    assert_eq!(node.commit_index(), 3);
    assert!(wait_until(CONVERGENCE, || cluster.converged()));
    assert_eq!(cluster.followers[0].get_counter(HugeType::Vertex).unwrap(), 7);
}

#[test]
fn a_lone_leader_is_its_own_majority() {
    setup_logger(LevelFilter::Debug);
    let cluster = Cluster::start(0, ConsensusConfiguration::default());

    cluster.store.increase_counter(HugeType::Task, 3).unwrap();

    assert_eq!(cluster.store.node().unwrap().size(), 1);
    assert_eq!(cluster.store.get_counter(HugeType::Task).unwrap(), 3);
}

#[test]
fn linearizable_reads_go_through_the_leader() {
    setup_logger(LevelFilter::Debug);
    let config = ConsensusConfiguration::builder()
        .read_mode(ReadMode::Linearizable)
        .build();
    let cluster = Cluster::start(1, config);
    cluster.store.increase_counter(HugeType::Vertex, 2).unwrap();

    assert_eq!(cluster.store.get_counter(HugeType::Vertex).unwrap(), 2);
    assert!(cluster.store.initialized().unwrap());
    assert_eq!(cluster.store.node().unwrap().read_index().unwrap(), 2);

    cluster.store.node().unwrap().resign();
    assert!(cluster.store.get_counter(HugeType::Vertex).unwrap_err().is_consensus());
}

#[test]
fn event_handlers_observe_commits_and_rejections() {
    setup_logger(LevelFilter::Debug);
    let created = Arc::new(AtomicUsize::new(0));
    let committed = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let config = {
        let created = Arc::clone(&created);
        let committed = Arc::clone(&committed);
        let rejected = Arc::clone(&rejected);
        ConsensusConfiguration::builder()
            .log_events(true)
            .on_create_group(move |_| {
                created.fetch_add(1, Ordering::SeqCst);
            })
            .on_commit_entry(move |event| {
                assert!(event.acks >= 1);
                committed.fetch_add(1, Ordering::SeqCst);
            })
            .on_reject_command(move |_| {
                rejected.fetch_add(1, Ordering::SeqCst);
            })
            .build()
    };
    let cluster = Cluster::start(2, config);

    cluster.store.increase_counter(HugeType::Vertex, 1).unwrap();
    cluster.store.increase_counter(HugeType::Vertex, 1).unwrap();
    let node = cluster.store.node().unwrap();
    node.resign();
    assert!(cluster.store.increase_counter(HugeType::Vertex, 1).is_err());

    assert!(wait_until(CONVERGENCE, || {
        committed.load(Ordering::SeqCst) == 3 && rejected.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn closed_store_refuses_reads_and_writes() {
    setup_logger(LevelFilter::Debug);
    let cluster = Cluster::start(1, ConsensusConfiguration::default());
    cluster.store.close().unwrap();

    assert!(!cluster.store.opened());
    assert!(cluster
        .store
        .query(&Query::new(HugeType::Vertex))
        .err()
        .unwrap()
        .is_not_ready());
    assert!(cluster
        .store
        .increase_counter(HugeType::Vertex, 1)
        .unwrap_err()
        .is_not_ready());

    // Reopening finds the group the first open created.
    cluster.store.open(&BackendConfig::default()).unwrap();
    assert_eq!(cluster.registry.len(), 1);
    assert_eq!(cluster.store.node().unwrap().commit_index(), 1);
}

#[test]
fn counter_overflow_is_reported_and_the_group_keeps_committing() {
    setup_logger(LevelFilter::Debug);
    let cluster = Cluster::start(1, ConsensusConfiguration::default());
    let node = cluster.store.node().unwrap();
    cluster.store.increase_counter(HugeType::Vertex, i64::MAX).unwrap();

    let err = cluster.store.increase_counter(HugeType::Vertex, 1).unwrap_err();

    assert!(err.is_consensus());
    assert!(matches!(err.root_cause(), BackendError::Engine { .. }));
    assert_eq!(node.commit_index(), 3);

    cluster.store.increase_counter(HugeType::EdgeOut, 2).unwrap();
    cluster.store.increase_counter(HugeType::Vertex, -1).unwrap();
    cluster.store.mutate(&insert(7)).unwrap();

    assert_eq!(node.commit_index(), 6);
    assert_eq!(cluster.store.get_counter(HugeType::Vertex).unwrap(), i64::MAX - 1);
    assert_eq!(vertex_ids(cluster.store.as_ref()), vec![Id::Number(7)]);
    assert!(wait_until(CONVERGENCE, || cluster.converged()));
    assert_eq!(
        cluster.followers[0].get_counter(HugeType::Vertex).unwrap(),
        i64::MAX - 1
    );
    assert_eq!(cluster.followers[0].get_counter(HugeType::EdgeOut).unwrap(), 2);
}

#[test]
fn interleaved_transactions_of_two_threads_stay_apart() {
    setup_logger(LevelFilter::Debug);
    let cluster = Cluster::start(1, ConsensusConfiguration::default());
    let store = cluster.store.as_ref();
    let step = Barrier::new(2);

    thread::scope(|scope| {
        scope.spawn(|| {
            store.begin_tx().unwrap();
            step.wait();
            // The other thread begins and stages vertex 1.
            step.wait();
            store.rollback_tx().unwrap();
            step.wait();

            store.begin_tx().unwrap();
            store.mutate(&insert(2)).unwrap();
            step.wait();
            // The other thread commits vertex 3.
            step.wait();
            store.rollback_tx().unwrap();
            step.wait();
        });

        step.wait();
        store.begin_tx().unwrap();
        store.mutate(&insert(1)).unwrap();
        step.wait();
        step.wait();
        store.commit_tx().unwrap();
        assert_eq!(vertex_ids(cluster.leader.as_ref()), vec![Id::Number(1)]);

        step.wait();
        store.begin_tx().unwrap();
        store.mutate(&insert(3)).unwrap();
        store.commit_tx().unwrap();
        assert_eq!(
            vertex_ids(cluster.leader.as_ref()),
            vec![Id::Number(1), Id::Number(3)]
        );
        step.wait();
        step.wait();
    });

    assert_eq!(
        vertex_ids(cluster.leader.as_ref()),
        vec![Id::Number(1), Id::Number(3)]
    );
    assert!(wait_until(CONVERGENCE, || cluster.converged()));
    assert_eq!(
        vertex_ids(cluster.followers[0].as_ref()),
        vec![Id::Number(1), Id::Number(3)]
    );
}

#[test]
fn leader_log_is_compacted_as_entries_commit() {
    setup_logger(LevelFilter::Debug);
    let cluster = Cluster::start(2, ConsensusConfiguration::default());
    let node = cluster.store.node().unwrap();

    for _ in 0..200 {
        cluster.store.increase_counter(HugeType::Vertex, 1).unwrap();
    }

    assert_eq!(node.commit_index(), 201);
    assert_eq!(node.log_len(), 0);
    assert!(wait_until(CONVERGENCE, || cluster.converged()));
    for follower in &cluster.followers {
        assert_eq!(follower.get_counter(HugeType::Vertex).unwrap(), 200);
    }
}

#[test]
fn follower_past_the_log_bound_is_detached() {
    setup_logger(LevelFilter::Debug);
    let config = ConsensusConfiguration::builder()
        .replication_timeout(Duration::from_millis(100))
        .max_log_entries(8)
        .build();
    let cluster = Cluster::start(2, config);
    let node = cluster.store.node().unwrap();
    assert!(wait_until(CONVERGENCE, || cluster.converged()));

    node.set_follower_reachable(1, false);
    for _ in 0..20 {
        cluster.store.increase_counter(HugeType::Vertex, 1).unwrap();
        assert!(node.log_len() <= 8);
    }
    assert_eq!(node.follower_detached(0), Some(false));
    assert_eq!(node.follower_detached(1), Some(true));

    // A detached follower gets nothing more, even once it is reachable again.
    node.set_follower_reachable(1, true);
    cluster.store.increase_counter(HugeType::Vertex, 1).unwrap();

    assert_eq!(node.commit_index(), 22);
    assert!(wait_until(CONVERGENCE, || {
        node.follower_applied_index(0) == Some(22)
    }));
    assert_eq!(cluster.followers[0].get_counter(HugeType::Vertex).unwrap(), 21);
    assert_eq!(node.follower_applied_index(1), Some(1));
    assert_eq!(cluster.followers[1].get_counter(HugeType::Vertex).unwrap(), 0);
}

#[test]
fn failed_open_closes_the_stores_it_opened() {
    setup_logger(LevelFilter::Debug);
    let local = FaultyStore::new("graph", "g");
    let healthy = FaultyStore::new("graph", "g");
    let failing = FaultyStore::new("graph", "g");
    failing.fail_on("open");
    let registry = Arc::new(GroupRegistry::new());
    let store = ReplicatedStore::new(
        local.clone(),
        Arc::clone(&registry),
        ConsensusConfiguration::default(),
    )
    .with_followers(vec![
        healthy.clone() as Arc<dyn BackendStore>,
        failing.clone() as Arc<dyn BackendStore>,
    ]);

    assert!(store.open(&BackendConfig::default()).is_err());

    assert!(!local.opened());
    assert!(!healthy.opened());
    assert!(!store.opened());
    assert!(registry.is_empty());
    assert_eq!(local.calls(), vec!["open", "close"]);

    failing.heal("open");
    store.open(&BackendConfig::default()).unwrap();
    assert!(store.opened());
    assert_eq!(registry.len(), 1);
}
