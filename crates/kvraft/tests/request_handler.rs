//! Request handler and apply loop behaviour under a scripted consensus layer:
//! leadership churn, overwritten indexes, late and duplicate deliveries.

use common::{KvError, PutAppendKind, ServerConfig};
use kvraft::{KvServer, KvStore, Op};
use raft::{ApplyMsg, Consensus, MemPersister, Persister};
use std::sync::Arc;
use std::time::Duration;
use testsupport::prelude::*;
use tokio::time::Instant;

const DEADLINE: Duration = Duration::from_secs(1);
const SLACK: Duration = Duration::from_millis(10);

fn config() -> ServerConfig {
    ServerConfig::builder()
        .peers(vec!["kv-0".into(), "kv-1".into(), "kv-2".into()])
        .me(0)
        .request_timeout(DEADLINE)
        .build()
}

fn spawn_put(
    server: &Arc<KvServer>,
    key: &'static str,
    value: &'static str,
    client_id: u64,
    serial_num: u64,
) -> tokio::task::JoinHandle<Result<(), KvError>> {
    let server = Arc::clone(server);
    tokio::spawn(async move {
        server
            .put_append(key, value, PutAppendKind::Put, client_id, serial_num)
            .await
    })
}

#[tokio::test(start_paused = true)]
async fn follower_rejects_without_consuming_a_slot() {
    init_tracing();
    let node = scripted_node(config());
    node.consensus.set_leader(false);

    let started = Instant::now();
    let result = node
        .server
        .put_append("k", "v", PutAppendKind::Put, 1, 1)
        .await;
    assert_eq!(result, Err(KvError::WrongLeader));
    assert_eq!(node.server.get("k", 1, 2).await, Err(KvError::WrongLeader));
    assert!(node.consensus.started().is_empty());
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn committed_request_answers_ok() {
    let node = scripted_node(config());
    let handle = spawn_put(&node.server, "k", "v", 1, 1);

    node.consensus.wait_started(1).await;
    assert_eq!(node.server.pending_requests(), 1);
    assert_eq!(node.consensus.commit_next(), Some(1));

    assert_eq!(handle.await.unwrap(), Ok(()));
    assert_eq!(node.server.pending_requests(), 0);
    assert_eq!(node.server.last_applied(), 1);
}

#[tokio::test(start_paused = true)]
async fn uncommitted_request_times_out_and_deregisters() {
    let node = scripted_node(config());
    let started = Instant::now();

    let result = node
        .server
        .put_append("k", "v", PutAppendKind::Put, 1, 1)
        .await;

    assert_eq!(result, Err(KvError::Timeout));
    assert!(started.elapsed() >= DEADLINE);
    assert!(started.elapsed() < DEADLINE + SLACK);
    assert_eq!(node.server.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn leadership_lost_after_submission_is_bounded() {
    let node = scripted_node(config());
    let begin = Instant::now();
    let handle = spawn_put(&node.server, "k", "v", 1, 1);

    node.consensus.wait_started(1).await;
    node.consensus.set_leader(false);
    node.consensus.drop_uncommitted();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(KvError::Timeout) | Err(KvError::WrongLeader)));
    assert!(begin.elapsed() < DEADLINE + SLACK);
}

#[tokio::test(start_paused = true)]
async fn overwritten_index_reports_timeout() {
    let node = scripted_node(config());
    let handle = spawn_put(&node.server, "k", "mine", 1, 1);
    node.consensus.wait_started(1).await;

    // A new leader committed a different command at the same index.
    node.consensus.drop_uncommitted();
    node.consensus
        .deliver(ApplyMsg::command(1, 2, Op::put("k", "theirs", 2, 1)));

    assert_eq!(handle.await.unwrap(), Err(KvError::Timeout));

    node.consensus.set_auto_commit(true);
    assert_eq!(node.server.get("k", 1, 2).await, Ok("theirs".to_string()));
}

#[tokio::test(start_paused = true)]
async fn late_commit_after_timeout_still_applies_once() {
    let node = scripted_node(config());

    let result = node
        .server
        .put_append("k", "a", PutAppendKind::Append, 1, 1)
        .await;
    assert_eq!(result, Err(KvError::Timeout));

    // The entry commits after its waiter left; the notification is dropped.
    assert_eq!(node.consensus.commit_next(), Some(1));
    wait_for_applied(&node.server, 1).await;

    // The client retries with the same serial number.
    node.consensus.set_auto_commit(true);
    let retry = node
        .server
        .put_append("k", "a", PutAppendKind::Append, 1, 1)
        .await;
    assert_eq!(retry, Ok(()));
    assert_eq!(node.server.get("k", 1, 2).await, Ok("a".to_string()));
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_still_notifies() {
    let node = scripted_node(config());
    node.consensus.set_auto_commit(true);

    let first = node
        .server
        .put_append("k", "x", PutAppendKind::Append, 7, 1)
        .await;
    let again = node
        .server
        .put_append("k", "x", PutAppendKind::Append, 7, 1)
        .await;

    assert_eq!(first, Ok(()));
    assert_eq!(again, Ok(()));
    assert_eq!(node.consensus.started().len(), 2);
    assert_eq!(node.server.get("k", 7, 2).await, Ok("x".to_string()));
}

#[tokio::test(start_paused = true)]
async fn lower_serial_with_different_payload_is_ignored() {
    let node = scripted_node(config());
    node.consensus.set_auto_commit(true);

    node.server
        .put_append("k", "new", PutAppendKind::Put, 3, 5)
        .await
        .unwrap();
    node.server
        .put_append("k", "old", PutAppendKind::Put, 3, 4)
        .await
        .unwrap();

    assert_eq!(node.server.get("k", 3, 6).await, Ok("new".to_string()));
}

#[tokio::test(start_paused = true)]
async fn barrier_entries_are_skipped() {
    let node = scripted_node(config());
    let handle = spawn_put(&node.server, "k", "v", 1, 1);
    node.consensus.wait_started(1).await;

    node.consensus.deliver(ApplyMsg::blank(1, 1));
    node.consensus
        .deliver(ApplyMsg::command(2, 1, Op::put("other", "v", 9, 1)));
    wait_for_applied(&node.server, 2).await;

    // The barrier neither woke the waiter at index 1 nor touched the store.
    assert_eq!(node.server.pending_requests(), 1);
    assert_eq!(handle.await.unwrap(), Err(KvError::Timeout));
}

#[tokio::test(start_paused = true)]
async fn follower_applies_but_does_not_notify() {
    let node = scripted_node(config());
    let handle = spawn_put(&node.server, "k", "v", 1, 1);
    node.consensus.wait_started(1).await;

    node.consensus.set_leader(false);
    node.consensus.commit_next();
    wait_for_applied(&node.server, 1).await;

    assert_eq!(handle.await.unwrap(), Err(KvError::Timeout));

    node.consensus.set_leader(true);
    node.consensus.set_auto_commit(true);
    assert_eq!(node.server.get("k", 2, 1).await, Ok("v".to_string()));
}

#[tokio::test(start_paused = true)]
async fn snapshot_taken_when_raft_state_reaches_threshold() {
    let persister = MemPersister::new();
    persister.save_raft_state(vec![0; 64]).unwrap();
    let mut config = config();
    config.max_raft_state = Some(64);
    let node = scripted_node_with_persister(config, persister);
    node.consensus.set_auto_commit(true);

    node.server
        .put_append("k", "v", PutAppendKind::Put, 1, 1)
        .await
        .unwrap();
    wait_for_applied(&node.server, 1).await;

    let discarded = node.consensus.discarded();
    assert_eq!(discarded.len(), 1);
    let (index, bytes) = &discarded[0];
    assert_eq!(*index, 1);

    let mut restored = KvStore::new();
    assert_eq!(restored.restore(bytes).unwrap(), 1);
    assert_eq!(restored.get("k"), Some("v"));
    assert_eq!(restored.last_serial(1), Some(1));
}

#[tokio::test(start_paused = true)]
async fn no_snapshot_when_disabled() {
    let persister = MemPersister::new();
    persister.save_raft_state(vec![0; 4096]).unwrap();
    let node = scripted_node_with_persister(config(), persister);
    node.consensus.set_auto_commit(true);

    node.server
        .put_append("k", "v", PutAppendKind::Put, 1, 1)
        .await
        .unwrap();
    assert!(node.consensus.discarded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn out_of_band_snapshots() {
    let node = scripted_node(config());
    node.consensus.set_auto_commit(true);
    node.server
        .put_append("local", "1", PutAppendKind::Put, 1, 1)
        .await
        .unwrap();

    // Undecodable bytes leave the state alone.
    node.consensus.deliver(ApplyMsg::Snapshot {
        index: 5,
        term: 2,
        data: b"garbage".to_vec(),
    });
    let mut remote = KvStore::new();
    remote.apply(&Op::put("remote", "2", 8, 1));
    node.consensus
        .install_snapshot(10, 2, remote.serialize(10).unwrap());
    wait_for_applied(&node.server, 10).await;

    // Older than what is applied: ignored.
    let mut stale = KvStore::new();
    stale.apply(&Op::put("stale", "3", 8, 1));
    node.consensus.deliver(ApplyMsg::Snapshot {
        index: 9,
        term: 2,
        data: stale.serialize(9).unwrap(),
    });

    assert_eq!(node.server.get("remote", 1, 2).await, Ok("2".to_string()));
    assert_eq!(node.server.get("local", 1, 3).await, Err(KvError::NoKey));
    assert_eq!(node.server.get("stale", 1, 4).await, Err(KvError::NoKey));
    assert!(node.server.last_applied() > 10);
}

#[tokio::test(start_paused = true)]
async fn startup_restores_persisted_snapshot() {
    let mut store = KvStore::new();
    store.apply(&Op::put("x", "1", 4, 9));
    let persister = MemPersister::new();
    persister
        .save_state_and_snapshot(Vec::new(), store.serialize(5).unwrap())
        .unwrap();

    let node = scripted_node_with_persister(config(), persister);
    assert_eq!(node.server.last_applied(), 5);
    node.consensus.resume_after(5);

    node.consensus.set_auto_commit(true);
    assert_eq!(node.server.get("x", 1, 1).await, Ok("1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn kill_stops_the_replica() {
    let node = scripted_node(config());
    node.server.kill();

    assert!(node.server.killed());
    assert!(!node.consensus.is_leader());
    assert_eq!(
        node.server.put_append("k", "v", PutAppendKind::Put, 1, 1).await,
        Err(KvError::WrongLeader)
    );
}

#[tokio::test(start_paused = true)]
async fn waiter_covered_by_installed_snapshot_times_out_early() {
    let node = scripted_node(config());
    let begin = Instant::now();
    let handle = spawn_put(&node.server, "k", "mine", 1, 1);
    node.consensus.wait_started(1).await;
    assert_eq!(node.server.pending_requests(), 1);

    let mut remote = KvStore::new();
    remote.apply(&Op::put("k", "theirs", 2, 1));
    node.consensus
        .install_snapshot(5, 2, remote.serialize(5).unwrap());

    assert_eq!(handle.await.unwrap(), Err(KvError::Timeout));
    assert!(begin.elapsed() < DEADLINE);
    assert_eq!(node.server.pending_requests(), 0);

    // The client's retry lands after the snapshot.
    node.consensus.set_auto_commit(true);
    let retry = node
        .server
        .put_append("k", "mine", PutAppendKind::Put, 1, 1)
        .await;
    assert_eq!(retry, Ok(()));
    assert_eq!(node.server.get("k", 1, 2).await, Ok("mine".to_string()));
}

#[tokio::test(start_paused = true)]
async fn index_applied_before_registration_answers_without_waiting() {
    let node = scripted_node(config());

    // Index 1 is committed and applied before the handler submits, so the
    // index it is handed is already behind the apply loop.
    node.consensus
        .deliver(ApplyMsg::command(1, 1, Op::put("k", "other", 2, 1)));
    wait_for_applied(&node.server, 1).await;

    let begin = Instant::now();
    let result = node
        .server
        .put_append("k", "mine", PutAppendKind::Put, 1, 1)
        .await;
    assert_eq!(result, Err(KvError::Timeout));
    assert_eq!(begin.elapsed(), Duration::ZERO);
    assert_eq!(node.server.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn auto_committed_requests_are_answered() {
    let node = scripted_node(config());
    node.consensus.set_auto_commit(true);
    let mut client = TestClient::new(1);

    for i in 0..20 {
        client
            .append(&node.server, "k", &i.to_string())
            .await
            .unwrap();
    }
    let expected: String = (0..20).map(|i| i.to_string()).collect();
    assert_value(&node.server, &mut client, "k", &expected).await;
    assert_eq!(node.server.pending_requests(), 0);
}
