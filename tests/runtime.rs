// End-to-end tests of the group runtime over the in-memory network.
//
// Real timers drive these, so assertions poll with generous deadlines
// instead of assuming any particular election outcome.

use std::collections::HashMap;
use std::time::Duration;

use replikv::error::RaftError;
use replikv::machine::{KvOperation, KvResponse, KvStateMachine};
use replikv::model::{QueryPolicy, Role};
use replikv::node::NodeBuilder;
use replikv::runtime::{InMemoryNetwork, RaftGroup, RaftGroupHandle};
use replikv::store::InMemoryStore;
use replikv::{Endpoint, NodeId, RaftConfig};

const GROUP: &str = "runtime-group";

fn endpoint(id: &str) -> Endpoint {
    Endpoint::new(id, format!("mem://{id}"))
}

fn runtime_config() -> RaftConfig {
    RaftConfig {
        leader_election_timeout_min: Duration::from_millis(150),
        leader_election_timeout_max: Duration::from_millis(300),
        leader_heartbeat_period: Duration::from_millis(50),
        leader_heartbeat_timeout: Duration::from_millis(300),
        report_publish_period: Duration::from_millis(100),
        ..RaftConfig::default()
    }
}

fn spawn_cluster(ids: &[&str]) -> (InMemoryNetwork, HashMap<NodeId, RaftGroupHandle>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let network = InMemoryNetwork::new();
    let members: Vec<Endpoint> = ids.iter().map(|id| endpoint(id)).collect();
    let mut handles = HashMap::new();
    for (index, id) in ids.iter().enumerate() {
        let handle = RaftGroup::spawn(
            NodeBuilder::new(GROUP, endpoint(id))
                .initial_members(members.clone())
                .config(runtime_config())
                .store(InMemoryStore::new())
                .machine(KvStateMachine::new())
                .transport(network.transport(*id))
                .rng_seed(index as u64 + 1),
        )
        .unwrap();
        network.register(id.to_string(), handle.mailbox());
        handles.insert(id.to_string(), handle);
    }
    (network, handles)
}

async fn wait_for_leader(handles: &HashMap<NodeId, RaftGroupHandle>) -> NodeId {
    for _ in 0..100 {
        for (id, handle) in handles {
            if let Ok(report) = handle.report().await {
                if report.role == Role::Leader {
                    return id.clone();
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no leader elected in time");
}

fn decode_value(response: &bytes::Bytes) -> Option<Vec<u8>> {
    match KvResponse::decode(response).unwrap() {
        KvResponse::Value(value) => value,
    }
}

#[tokio::test]
async fn test_single_node_put_and_linearizable_get() {
    let (_network, handles) = spawn_cluster(&["n1"]);
    let leader = wait_for_leader(&handles).await;
    let handle = &handles[&leader];

    let outcome = handle
        .submit(KvOperation::put("k", b"v".to_vec()).encode())
        .await
        .unwrap();
    assert_eq!(outcome.commit_index, 2);

    let read = handle
        .query(KvOperation::get("k").encode(), QueryPolicy::Linearizable)
        .await
        .unwrap();
    assert_eq!(decode_value(&read.response), Some(b"v".to_vec()));
}

#[tokio::test]
async fn test_three_node_replication_and_follower_read() {
    let (_network, handles) = spawn_cluster(&["n1", "n2", "n3"]);
    let leader = wait_for_leader(&handles).await;

    let outcome = handles[&leader]
        .submit(KvOperation::put("city", b"oslo".to_vec()).encode())
        .await
        .unwrap();

    // a follower serves the read once its commit index catches up
    let follower = handles
        .keys()
        .find(|id| **id != leader)
        .unwrap()
        .clone();
    let read = handles[&follower]
        .query(
            KvOperation::get("city").encode(),
            QueryPolicy::EventualConsistency {
                min_commit_index: outcome.commit_index,
            },
        )
        .await
        .unwrap();
    assert_eq!(decode_value(&read.response), Some(b"oslo".to_vec()));
}

#[tokio::test]
async fn test_submit_on_follower_reports_leader() {
    let (_network, handles) = spawn_cluster(&["n1", "n2", "n3"]);
    let leader = wait_for_leader(&handles).await;

    // give followers a heartbeat round to learn the leader
    tokio::time::sleep(Duration::from_millis(200)).await;

    let follower = handles
        .keys()
        .find(|id| **id != leader)
        .unwrap()
        .clone();
    let result = handles[&follower]
        .submit(KvOperation::put("k", b"v".to_vec()).encode())
        .await;
    match result {
        Err(RaftError::NotLeader { leader: hint }) => {
            assert_eq!(hint.map(|l| l.id), Some(leader));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_report_watch_publishes_periodically() {
    let (_network, handles) = spawn_cluster(&["n1"]);
    let leader = wait_for_leader(&handles).await;

    let mut reports = handles[&leader].watch_reports();
    reports.changed().await.unwrap();
    let report = reports.borrow().clone();
    assert_eq!(report.group_id, GROUP);
    assert_eq!(report.endpoint.id, leader);
}

#[tokio::test]
async fn test_shutdown_stops_serving() {
    let (_network, handles) = spawn_cluster(&["n1"]);
    let leader = wait_for_leader(&handles).await;
    let handle = &handles[&leader];

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = handle
        .submit(KvOperation::put("k", b"v".to_vec()).encode())
        .await;
    assert!(matches!(result, Err(RaftError::CannotReplicate(_))));
}
