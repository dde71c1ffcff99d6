use crate::commitlog::{LogIndex, Term, NONE};
use crate::consensus::{FollowerStates, MemberId, Outcome};
use std::collections::HashSet;

/// Static cluster membership and local behavior flags for one replica.
#[derive(Clone, Debug)]
pub struct MembershipConfig {
    pub myself: MemberId,
    /// Members whose votes count toward election quorum.
    pub voting_members: HashSet<MemberId>,
    /// Members that receive replicated entries and count toward commit
    /// quorum (a superset of or equal to the voting members in practice).
    pub replication_members: HashSet<MemberId>,
    /// Enables the non-binding pre-vote canvassing phase.
    pub supports_pre_voting: bool,
    /// A member that never takes leadership (e.g. a read-only replica). It
    /// still initiates and grants pre-votes, and grants real votes.
    pub refuses_to_be_leader: bool,
}

impl MembershipConfig {
    pub fn new(myself: MemberId, members: impl IntoIterator<Item = MemberId>) -> Self {
        let members: HashSet<MemberId> = members.into_iter().collect();
        MembershipConfig {
            myself,
            voting_members: members.clone(),
            replication_members: members,
            supports_pre_voting: false,
            refuses_to_be_leader: false,
        }
    }
}

/// The aggregate mutable state of one cluster member. Owned by exactly one
/// dispatch loop and mutated only by applying successive [Outcome]s, one per
/// handled message.
#[derive(Clone, Debug)]
pub struct ReplicaState {
    pub myself: MemberId,
    pub term: Term,
    pub voted_for: Option<MemberId>,
    pub leader: Option<MemberId>,
    pub commit_index: LogIndex,
    pub voting_members: HashSet<MemberId>,
    pub replication_members: HashSet<MemberId>,
    pub votes_for_me: HashSet<MemberId>,
    pub pre_votes_for_me: HashSet<MemberId>,
    pub pre_election: bool,
    pub supports_pre_voting: bool,
    pub refuses_to_be_leader: bool,
    /// Only meaningful while this replica is leader.
    pub follower_states: FollowerStates,
    /// Members heard from since the last election tick; the leader's lease.
    pub heartbeat_responses: HashSet<MemberId>,
}

impl ReplicaState {
    pub fn new(config: MembershipConfig) -> Self {
        ReplicaState {
            myself: config.myself,
            term: 0,
            voted_for: None,
            leader: None,
            commit_index: NONE,
            voting_members: config.voting_members,
            replication_members: config.replication_members,
            votes_for_me: HashSet::new(),
            pre_votes_for_me: HashSet::new(),
            pre_election: false,
            supports_pre_voting: config.supports_pre_voting,
            refuses_to_be_leader: config.refuses_to_be_leader,
            follower_states: FollowerStates::empty(),
            heartbeat_responses: HashSet::new(),
        }
    }

    /// The single mutation point: fold one outcome into the state. Log
    /// commands, ship commands, and outgoing messages are consumed by the
    /// dispatcher, not here.
    pub fn update(&mut self, outcome: &Outcome) {
        debug_assert!(outcome.term >= self.term, "Term is monotonic");
        self.term = outcome.term;
        self.voted_for = outcome.voted_for.clone();
        self.leader = outcome.leader.clone();
        self.commit_index = outcome.commit_index;
        self.votes_for_me = outcome.votes_for_me.clone();
        self.pre_votes_for_me = outcome.pre_votes_for_me.clone();
        self.pre_election = outcome.pre_election;
        self.follower_states = outcome.follower_states.clone();
        self.heartbeat_responses = outcome.heartbeat_responses.clone();
    }

    pub fn other_voting_members(&self) -> impl Iterator<Item = &MemberId> {
        let myself = &self.myself;
        self.voting_members.iter().filter(move |m| *m != myself)
    }

    pub fn other_replication_members(&self) -> impl Iterator<Item = &MemberId> {
        let myself = &self.myself;
        self.replication_members.iter().filter(move |m| *m != myself)
    }

    pub fn is_voting_member(&self) -> bool {
        self.voting_members.contains(&self.myself)
    }
}
