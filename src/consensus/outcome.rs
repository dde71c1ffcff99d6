use crate::commitlog::{LogEntry, LogIndex, Term};
use crate::consensus::roles::Role;
use crate::consensus::{Directed, FollowerStates, MemberId, RaftMessage, ReplicaState};
use std::collections::HashSet;

/// A command against the local log, applied by the dispatcher in emission
/// order (truncation always precedes the append it makes room for).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogCommand {
    Append { index: LogIndex, entry: LogEntry },
    BatchAppend { base_index: LogIndex, entries: Vec<LogEntry> },
    Truncate { from_index: LogIndex },
    Prune { safe_index: LogIndex },
}

/// An instruction to the replication pipeline. Only a leader emits these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShipCommand {
    /// The follower matches up to `match_index`; ship the missing suffix.
    Match { match_index: LogIndex, member: MemberId },
    /// The follower rejected our previous request; probe backward from its
    /// reported append index.
    Mismatch {
        last_remote_append_index: LogIndex,
        member: MemberId,
    },
    /// Freshly appended entries to fan out to all followers.
    NewEntries {
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
    },
}

/// Everything that should happen as the result of handling one message:
/// the next role, the state deltas, and the side-effect commands. Immutable
/// and side-effect free until the dispatcher applies it.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub voted_for: Option<MemberId>,
    pub commit_index: LogIndex,
    pub votes_for_me: HashSet<MemberId>,
    pub pre_votes_for_me: HashSet<MemberId>,
    pub pre_election: bool,
    pub follower_states: FollowerStates,
    pub heartbeat_responses: HashSet<MemberId>,
    pub renew_election_timeout: bool,
    pub log_commands: Vec<LogCommand>,
    pub ship_commands: Vec<ShipCommand>,
    pub outgoing_messages: Vec<Directed>,
}

/// Accumulates an [Outcome] during one handler invocation. Starts as a
/// carbon copy of the current state, so an untouched builder freezes into a
/// no-op outcome.
pub struct OutcomeBuilder {
    outcome: Outcome,
}

impl OutcomeBuilder {
    pub fn from_state(role: Role, state: &ReplicaState) -> Self {
        OutcomeBuilder {
            outcome: Outcome {
                role,
                term: state.term,
                leader: state.leader.clone(),
                voted_for: state.voted_for.clone(),
                commit_index: state.commit_index,
                votes_for_me: state.votes_for_me.clone(),
                pre_votes_for_me: state.pre_votes_for_me.clone(),
                pre_election: state.pre_election,
                follower_states: state.follower_states.clone(),
                heartbeat_responses: state.heartbeat_responses.clone(),
                renew_election_timeout: false,
                log_commands: Vec::new(),
                ship_commands: Vec::new(),
                outgoing_messages: Vec::new(),
            },
        }
    }

    pub fn build(self) -> Outcome {
        self.outcome
    }

    pub fn term(&self) -> Term {
        self.outcome.term
    }

    pub fn voted_for(&self) -> Option<&MemberId> {
        self.outcome.voted_for.as_ref()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.outcome.commit_index
    }

    pub fn follower_states(&self) -> &FollowerStates {
        &self.outcome.follower_states
    }

    pub fn follower_states_mut(&mut self) -> &mut FollowerStates {
        &mut self.outcome.follower_states
    }

    /// Adopt a higher term. The vote record and accumulated votes belong to
    /// the old term and are discarded. No-op unless `new_term` is greater.
    pub fn advance_term(&mut self, new_term: Term) {
        if new_term > self.outcome.term {
            self.outcome.term = new_term;
            self.outcome.voted_for = None;
            self.outcome.votes_for_me.clear();
        }
    }

    pub fn set_role(&mut self, role: Role) {
        self.outcome.role = role;
    }

    /// Abandon any leadership or campaign bookkeeping and return to follower.
    pub fn step_down_to_follower(&mut self) {
        self.outcome.role = Role::Follower;
        self.outcome.leader = None;
        self.outcome.votes_for_me.clear();
        self.outcome.follower_states = FollowerStates::empty();
        self.outcome.heartbeat_responses.clear();
    }

    pub fn set_leader(&mut self, leader: Option<MemberId>) {
        self.outcome.leader = leader;
    }

    pub fn set_voted_for(&mut self, voted_for: Option<MemberId>) {
        self.outcome.voted_for = voted_for;
    }

    pub fn set_commit_index(&mut self, commit_index: LogIndex) {
        debug_assert!(commit_index >= self.outcome.commit_index, "Commit index never retreats");
        self.outcome.commit_index = commit_index;
    }

    pub fn add_vote_for_me(&mut self, from: MemberId) -> usize {
        self.outcome.votes_for_me.insert(from);
        self.outcome.votes_for_me.len()
    }

    pub fn add_pre_vote_for_me(&mut self, from: MemberId) -> usize {
        self.outcome.pre_votes_for_me.insert(from);
        self.outcome.pre_votes_for_me.len()
    }

    /// Enter or leave the pre-election phase. Accumulated pre-votes belong
    /// to a single canvassing round and are discarded either way.
    pub fn set_pre_election(&mut self, pre_election: bool) {
        self.outcome.pre_election = pre_election;
        self.outcome.pre_votes_for_me.clear();
    }

    pub fn set_follower_states(&mut self, follower_states: FollowerStates) {
        self.outcome.follower_states = follower_states;
    }

    pub fn add_heartbeat_response(&mut self, from: MemberId) {
        self.outcome.heartbeat_responses.insert(from);
    }

    pub fn reset_heartbeat_responses(&mut self, myself: MemberId) {
        self.outcome.heartbeat_responses.clear();
        self.outcome.heartbeat_responses.insert(myself);
    }

    pub fn renew_election_timeout(&mut self) {
        self.outcome.renew_election_timeout = true;
    }

    pub fn add_log_command(&mut self, command: LogCommand) {
        self.outcome.log_commands.push(command);
    }

    pub fn add_ship_command(&mut self, command: ShipCommand) {
        self.outcome.ship_commands.push(command);
    }

    pub fn add_outgoing_message(&mut self, to: MemberId, message: RaftMessage) {
        self.outcome.outgoing_messages.push(Directed::new(to, message));
    }
}
