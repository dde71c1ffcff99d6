use async_trait::async_trait;
use bytes::Bytes;
use replog::{
    create, ActorClient, InMemoryLog, MemberId, MembershipConfig, Outbound, ProposeError, RaftMessage, ReplicaConfig,
    Role, StatusReport,
};
use slog::Drain;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration, Instant};

/// In-process transport: looks up the destination's actor client and feeds
/// the message straight into its event queue. Members in the blocked set are
/// cut off in both directions, simulating a partition.
#[derive(Clone, Default)]
struct LoopbackRouter {
    inner: Arc<Mutex<RouterInner>>,
}

#[derive(Default)]
struct RouterInner {
    clients: HashMap<MemberId, ActorClient>,
    blocked: HashSet<MemberId>,
}

impl LoopbackRouter {
    fn register(&self, member: MemberId, client: ActorClient) {
        self.inner.lock().unwrap().clients.insert(member, client);
    }

    fn block(&self, member: MemberId) {
        self.inner.lock().unwrap().blocked.insert(member);
    }

    fn unblock(&self, member: &MemberId) {
        self.inner.lock().unwrap().blocked.remove(member);
    }
}

struct MemberOutbound {
    myself: MemberId,
    router: LoopbackRouter,
}

#[async_trait]
impl Outbound for MemberOutbound {
    async fn send(&self, to: MemberId, message: RaftMessage) {
        let client = {
            let inner = self.router.inner.lock().unwrap();
            if inner.blocked.contains(&self.myself) || inner.blocked.contains(&to) {
                return;
            }
            inner.clients.get(&to).cloned()
        };
        if let Some(client) = client {
            client.inbound(message).await;
        }
    }
}

fn member(id: u64) -> MemberId {
    MemberId(format!("member-{}", id))
}

fn test_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

fn start_cluster(num_members: u64) -> (HashMap<MemberId, ActorClient>, LoopbackRouter) {
    let router = LoopbackRouter::default();
    let logger = test_logger();
    let members: Vec<MemberId> = (1..=num_members).map(member).collect();
    let mut clients = HashMap::new();

    for myself in &members {
        let membership = MembershipConfig::new(myself.clone(), members.clone());
        let mut config = ReplicaConfig::new(membership);
        config.election_timeout_min = Duration::from_millis(150);
        config.election_timeout_max = Duration::from_millis(300);
        config.heartbeat_interval = Duration::from_millis(40);

        let outbound = MemberOutbound {
            myself: myself.clone(),
            router: router.clone(),
        };
        let (client, actor) = create(config, InMemoryLog::new(), Arc::new(outbound), logger.clone());
        router.register(myself.clone(), client.clone());
        clients.insert(myself.clone(), client);
        tokio::task::spawn(actor.run_event_loop());
    }

    (clients, router)
}

async fn statuses(clients: &HashMap<MemberId, ActorClient>) -> HashMap<MemberId, StatusReport> {
    let mut result = HashMap::new();
    for (id, client) in clients {
        if let Ok(status) = client.status().await {
            result.insert(id.clone(), status);
        }
    }
    result
}

async fn wait_for_leader(clients: &HashMap<MemberId, ActorClient>, deadline: Duration) -> MemberId {
    let give_up = Instant::now() + deadline;
    loop {
        let reports = statuses(clients).await;
        let leaders: Vec<&MemberId> = reports
            .iter()
            .filter(|(_, s)| s.role == Role::Leader)
            .map(|(id, _)| id)
            .collect();
        if leaders.len() == 1 {
            let leader = leaders[0].clone();
            // Stable once every member agrees who leads.
            if reports.values().all(|s| s.leader.as_ref() == Some(&leader)) {
                return leader;
            }
        }
        assert!(Instant::now() < give_up, "no stable leader within {:?}", deadline);
        sleep(Duration::from_millis(25)).await;
    }
}

async fn wait_for_commit(clients: &HashMap<MemberId, ActorClient>, index: i64, deadline: Duration) {
    let give_up = Instant::now() + deadline;
    loop {
        let reports = statuses(clients).await;
        if reports.len() == clients.len() && reports.values().all(|s| s.commit_index >= index) {
            return;
        }
        assert!(
            Instant::now() < give_up,
            "index {} not committed everywhere within {:?}",
            index,
            deadline
        );
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn elects_a_leader_and_replicates_entries() {
    let (clients, _router) = start_cluster(3);

    let leader = wait_for_leader(&clients, Duration::from_secs(10)).await;
    let leader_client = clients.get(&leader).unwrap();

    let receipt = leader_client.propose(Bytes::from_static(b"hello")).await.unwrap();
    wait_for_commit(&clients, receipt.index, Duration::from_secs(10)).await;

    let receipt = leader_client
        .propose_batch(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")])
        .await
        .unwrap();
    wait_for_commit(&clients, receipt.index, Duration::from_secs(10)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn followers_redirect_proposals_to_the_leader() {
    let (clients, _router) = start_cluster(3);

    let leader = wait_for_leader(&clients, Duration::from_secs(10)).await;
    let follower = clients.iter().find(|(id, _)| **id != leader).map(|(_, c)| c).unwrap();

    match follower.propose(Bytes::from_static(b"nope")).await {
        Err(ProposeError::LeaderRedirect(redirect)) => assert_eq!(leader, redirect),
        other => panic!("expected a leader redirect, got {:?}", other),
    }

    let leader_client = clients.get(&leader).unwrap();
    let receipt = leader_client.propose(Bytes::from_static(b"yep")).await.unwrap();
    wait_for_commit(&clients, receipt.index, Duration::from_secs(10)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn partitioned_member_catches_up_after_healing() {
    let (clients, router) = start_cluster(3);

    let leader = wait_for_leader(&clients, Duration::from_secs(10)).await;
    let straggler = clients.keys().find(|id| **id != leader).unwrap().clone();
    router.block(straggler.clone());

    let leader_client = clients.get(&leader).unwrap();
    let mut last_index = 0;
    for payload in [&b"one"[..], b"two", b"three"] {
        let receipt = leader_client.propose(Bytes::copy_from_slice(payload)).await.unwrap();
        last_index = receipt.index;
    }

    // The remaining majority still commits.
    let majority: HashMap<MemberId, ActorClient> = clients
        .iter()
        .filter(|(id, _)| **id != straggler)
        .map(|(id, c)| (id.clone(), c.clone()))
        .collect();
    wait_for_commit(&majority, last_index, Duration::from_secs(10)).await;

    // After healing, log shipping repairs the straggler.
    router.unblock(&straggler);
    wait_for_commit(&clients, last_index, Duration::from_secs(10)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deposed_leader_with_uncommitted_suffix_converges_after_healing() {
    let (clients, router) = start_cluster(3);

    let old_leader = wait_for_leader(&clients, Duration::from_secs(10)).await;
    let old_leader_client = clients.get(&old_leader).unwrap();
    let receipt = old_leader_client.propose(Bytes::from_static(b"committed")).await.unwrap();
    wait_for_commit(&clients, receipt.index, Duration::from_secs(10)).await;

    // Cut the leader off, then hand it one more entry. It still holds its
    // lease, so the entry lands in its log but can never reach a quorum.
    router.block(old_leader.clone());
    let orphan = old_leader_client.propose(Bytes::from_static(b"orphan")).await.unwrap();
    assert_eq!(3, orphan.index);

    // The majority moves on and commits past the orphan's index, leaving the
    // old leader with a suffix that diverges by term, not by length.
    let majority: HashMap<MemberId, ActorClient> = clients
        .iter()
        .filter(|(id, _)| **id != old_leader)
        .map(|(id, c)| (id.clone(), c.clone()))
        .collect();
    let new_leader = wait_for_leader(&majority, Duration::from_secs(10)).await;
    let receipt = majority
        .get(&new_leader)
        .unwrap()
        .propose(Bytes::from_static(b"after"))
        .await
        .unwrap();
    wait_for_commit(&majority, receipt.index, Duration::from_secs(10)).await;

    // After healing, repair must probe backward past the divergent entry,
    // truncate it, and replace it with the majority's history.
    router.unblock(&old_leader);
    let final_leader = wait_for_leader(&clients, Duration::from_secs(20)).await;
    let receipt = clients
        .get(&final_leader)
        .unwrap()
        .propose(Bytes::from_static(b"final"))
        .await
        .unwrap();
    wait_for_commit(&clients, receipt.index, Duration::from_secs(20)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn leader_without_quorum_steps_down() {
    let (clients, router) = start_cluster(3);

    let leader = wait_for_leader(&clients, Duration::from_secs(10)).await;
    router.block(leader.clone());

    let give_up = Instant::now() + Duration::from_secs(10);
    loop {
        let status = clients.get(&leader).unwrap().status().await.unwrap();
        if status.role != Role::Leader {
            break;
        }
        assert!(Instant::now() < give_up, "isolated leader never stepped down");
        sleep(Duration::from_millis(25)).await;
    }

    // The healthy majority elects a replacement.
    let majority: HashMap<MemberId, ActorClient> = clients
        .iter()
        .filter(|(id, _)| **id != leader)
        .map(|(id, c)| (id.clone(), c.clone()))
        .collect();
    let new_leader = wait_for_leader(&majority, Duration::from_secs(10)).await;
    assert_ne!(leader, new_leader);
}
