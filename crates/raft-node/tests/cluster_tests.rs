//! # cluster tests
//!
//! why: verify elections, replication and failure handling with real timers and concurrency
//! relations: runs raft-node Nodes over the in-process LocalNetwork
//! what: leader election, exactly-once apply, NotLeader, QuorumNotReached, failover,
//!       heartbeats past a silent peer, console round trip

use raft_core::{
    AppendRequest, AppendResponse, Command, RaftConfig, RaftError, Role, StateMachine, VoteRequest,
    VoteResponse,
};
use raft_node::console::{self, ConsoleCommand};
use raft_node::{
    LocalNetwork, LocalTransport, MemoryStore, Node, NodeConfig, Transport, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

/// Remembers every call in order
#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl StateMachine for RecordingStore {
    fn set(&self, key: &str, value: &[u8]) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("set {key}={}", String::from_utf8_lossy(value)));
    }

    fn delete(&self, key: &str) {
        self.calls.lock().unwrap().push(format!("delete {key}"));
    }
}

fn fast(seed: u64) -> RaftConfig {
    RaftConfig {
        election_timeout_min: 150,
        election_timeout_max: 300,
        heartbeat_interval: 20,
        rpc_timeout: 50,
        seed: Some(seed),
    }
}

/// In-process cluster with nodes named n1..nN
struct TestCluster {
    network: LocalNetwork,
    nodes: Vec<Node<LocalTransport>>,
    stores: Vec<Arc<RecordingStore>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TestCluster {
    fn spawn(n: usize) -> Self {
        let network = LocalNetwork::new();
        let ids: Vec<String> = (1..=n).map(|i| format!("n{i}")).collect();
        let mut nodes = Vec::new();
        let mut stores = Vec::new();

        for (i, id) in ids.iter().enumerate() {
            let peers = ids.iter().filter(|p| *p != id).cloned().collect();
            let config = NodeConfig::new(id.clone(), peers).with_raft(fast(i as u64 + 1));
            let store = Arc::new(RecordingStore::default());
            let node = Node::new(config, store.clone(), network.transport(id.clone())).unwrap();
            network.register(id.clone(), Arc::new(node.clone()));
            nodes.push(node);
            stores.push(store);
        }

        let tasks = nodes
            .iter()
            .map(|node| {
                let node = node.clone();
                tokio::spawn(async move { node.run().await })
            })
            .collect();

        Self {
            network,
            nodes,
            stores,
            tasks,
        }
    }

    /// Index of the only leader among the nodes not in `excluded`
    async fn wait_for_single_leader(&self, excluded: &[usize]) -> usize {
        timeout(WAIT, async {
            loop {
                let leaders: Vec<usize> = (0..self.nodes.len())
                    .filter(|i| !excluded.contains(i) && self.nodes[*i].is_leader())
                    .collect();
                if let [only] = leaders.as_slice() {
                    return *only;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timeout waiting for leader election")
    }

    async fn wait_until(&self, what: &str, mut check: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !check() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timeout waiting for {what}"));
    }

    async fn shutdown(self) {
        for node in &self.nodes {
            node.shutdown();
        }
        for task in self.tasks {
            timeout(WAIT, task).await.expect("node stops").unwrap();
        }
    }
}

#[tokio::test]
async fn elects_exactly_one_leader() {
    let cluster = TestCluster::spawn(3);

    let leader = cluster.wait_for_single_leader(&[]).await;
    let leader_id = cluster.nodes[leader].id().to_string();
    let term = cluster.nodes[leader].current_term();

    cluster
        .wait_until("followers to learn the leader", || {
            cluster.nodes.iter().all(|n| n.leader().as_deref() == Some(leader_id.as_str()))
        })
        .await;
    for (i, node) in cluster.nodes.iter().enumerate() {
        if i != leader {
            assert_eq!(node.role(), Role::Follower);
            assert_eq!(node.current_term(), term);
        }
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn committed_command_applies_once_on_every_node() {
    let cluster = TestCluster::spawn(3);
    let leader = cluster.wait_for_single_leader(&[]).await;

    cluster.nodes[leader].apply(Command::set("k", "v")).await.unwrap();

    assert_eq!(cluster.stores[leader].calls(), vec!["set k=v"]);
    assert_eq!(cluster.nodes[leader].commit_index(), 0);

    // followers learn the commit index from the following heartbeats
    cluster
        .wait_until("followers to apply", || {
            cluster.stores.iter().all(|s| s.calls().len() == 1)
        })
        .await;
    sleep(Duration::from_millis(100)).await;
    for store in &cluster.stores {
        assert_eq!(store.calls(), vec!["set k=v"]);
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn commands_apply_in_log_order() {
    let cluster = TestCluster::spawn(3);
    let leader = cluster.wait_for_single_leader(&[]).await;
    let node = &cluster.nodes[leader];

    node.apply(Command::set("a", "1")).await.unwrap();
    node.apply(Command::set("b", "2")).await.unwrap();
    node.apply(Command::delete("a")).await.unwrap();

    let expected = vec!["set a=1", "set b=2", "delete a"];
    cluster
        .wait_until("every store to catch up", || {
            cluster.stores.iter().all(|s| s.calls().len() == expected.len())
        })
        .await;
    for store in &cluster.stores {
        assert_eq!(store.calls(), expected);
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn follower_refuses_apply() {
    let cluster = TestCluster::spawn(3);
    let leader = cluster.wait_for_single_leader(&[]).await;
    let follower = (leader + 1) % 3;

    let err = cluster.nodes[follower].apply(Command::set("k", "v")).await.unwrap_err();

    assert!(matches!(err, RaftError::NotLeader { role: Role::Follower, .. }));
    assert_eq!(cluster.nodes[follower].last_index(), -1);
    assert!(cluster.stores.iter().all(|s| s.calls().is_empty()));

    cluster.shutdown().await;
}

#[tokio::test]
async fn partitioned_leader_reports_quorum_not_reached() {
    let cluster = TestCluster::spawn(3);
    let leader = cluster.wait_for_single_leader(&[]).await;
    cluster.network.disconnect(cluster.nodes[leader].id());

    let err = cluster.nodes[leader].apply(Command::set("k", "v")).await.unwrap_err();

    assert_eq!(
        err,
        RaftError::QuorumNotReached {
            index: 0,
            acknowledged: 1,
            required: 2,
        }
    );
    assert!(cluster.stores[leader].calls().is_empty());
    assert_eq!(cluster.nodes[leader].commit_index(), -1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn failover_to_new_leader() {
    let cluster = TestCluster::spawn(3);
    let old = cluster.wait_for_single_leader(&[]).await;
    let old_term = cluster.nodes[old].current_term();
    cluster.nodes[old].apply(Command::set("before", "1")).await.unwrap();

    cluster.network.disconnect(cluster.nodes[old].id());
    let new = cluster.wait_for_single_leader(&[old]).await;
    assert_ne!(new, old);
    assert!(cluster.nodes[new].current_term() > old_term);

    cluster.nodes[new].apply(Command::set("after", "2")).await.unwrap();

    // the old leader rejoins, steps down and catches up
    cluster.network.reconnect(cluster.nodes[old].id());
    cluster
        .wait_until("old leader to step down", || {
            cluster.nodes[old].role() == Role::Follower
                && cluster.nodes[old].current_term() >= cluster.nodes[new].current_term()
        })
        .await;
    cluster
        .wait_until("old leader to apply both writes", || {
            cluster.stores[old].calls().len() == 2
        })
        .await;
    assert_eq!(cluster.stores[old].calls(), vec!["set before=1", "set after=2"]);

    cluster.shutdown().await;
}

/// Local transport where one address accepts calls and never answers
struct SilentPeer {
    inner: LocalTransport,
    silent: String,
    delivered: Arc<AtomicUsize>,
}

impl Transport for SilentPeer {
    async fn request_vote(&self, peer: &str, req: VoteRequest) -> Result<VoteResponse, TransportError> {
        if peer == self.silent {
            return std::future::pending().await;
        }
        self.inner.request_vote(peer, req).await
    }

    async fn append_entries(
        &self,
        peer: &str,
        req: AppendRequest,
    ) -> Result<AppendResponse, TransportError> {
        if peer == self.silent {
            return std::future::pending().await;
        }
        let resp = self.inner.append_entries(peer, req).await?;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(resp)
    }
}

#[tokio::test]
async fn silent_peer_does_not_slow_heartbeats_to_the_others() {
    let network = LocalNetwork::new();
    let delivered = Arc::new(AtomicUsize::new(0));
    let ids = ["n1", "n2", "n3"];
    let mut nodes = Vec::new();

    // n3 is configured everywhere but never answers
    for (i, id) in ids[..2].iter().enumerate() {
        let peers = ids.iter().filter(|p| *p != id).map(|p| p.to_string()).collect();
        let config = NodeConfig::new(*id, peers).with_raft(RaftConfig {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 10,
            rpc_timeout: 130,
            seed: Some(i as u64 + 11),
        });
        let transport = SilentPeer {
            inner: network.transport(*id),
            silent: "n3".into(),
            delivered: delivered.clone(),
        };
        let node = Node::new(config, Arc::new(MemoryStore::new()), transport).unwrap();
        network.register(*id, Arc::new(node.clone()));
        nodes.push(node);
    }
    let tasks: Vec<_> = nodes
        .iter()
        .map(|node| {
            let node = node.clone();
            tokio::spawn(async move { node.run().await })
        })
        .collect();

    let leader = timeout(WAIT, async {
        loop {
            if let Some(i) = nodes.iter().position(|n| n.is_leader()) {
                return i;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timeout waiting for leader election");
    let term = nodes[leader].current_term();

    let before = delivered.load(Ordering::SeqCst);
    sleep(Duration::from_millis(500)).await;
    let sent = delivered.load(Ordering::SeqCst) - before;

    // a 10ms heartbeat gives about fifty; waiting on n3 each round would give four
    assert!(sent >= 20, "only {sent} heartbeats reached the live follower");
    assert!(nodes[leader].is_leader());
    for node in &nodes {
        assert_eq!(node.current_term(), term);
    }

    nodes[leader].apply(Command::set("k", "v")).await.unwrap();
    assert_eq!(nodes[leader].commit_index(), 0);

    for node in &nodes {
        node.shutdown();
    }
    for task in tasks {
        timeout(WAIT, task).await.expect("node stops").unwrap();
    }
}

#[tokio::test]
async fn console_round_trip_on_single_node() {
    let network = LocalNetwork::new();
    let store = Arc::new(MemoryStore::new());
    let config = NodeConfig::new("solo", vec![]).with_raft(fast(7));
    let node = Node::new(config, store.clone(), network.transport("solo")).unwrap();
    network.register("solo", Arc::new(node.clone()));
    let runner = tokio::spawn({
        let node = node.clone();
        async move { node.run().await }
    });

    timeout(WAIT, async {
        while !node.is_leader() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("single node elects itself");

    let set = ConsoleCommand::parse("set greeting hello world").unwrap();
    assert_eq!(console::execute(&node, &store, set).await, "ok");
    let get = ConsoleCommand::parse("get greeting").unwrap();
    assert_eq!(console::execute(&node, &store, get).await, "hello world");
    let dump = console::execute(&node, &store, ConsoleCommand::Dump).await;
    assert!(dump.starts_with("id=solo role=leader"));

    let delete = ConsoleCommand::parse("delete greeting").unwrap();
    assert_eq!(console::execute(&node, &store, delete).await, "ok");
    assert_eq!(
        console::execute(&node, &store, ConsoleCommand::Get { key: "greeting".into() }).await,
        "(nil)"
    );

    node.shutdown();
    timeout(WAIT, runner).await.expect("node stops").unwrap();
}
