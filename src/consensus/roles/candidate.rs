use crate::commitlog::{LogEntry, ReadableLog};
use crate::consensus::roles::{appending, follower, is_quorum, voting, ConsensusError, Role};
use crate::consensus::{
    FollowerStates, Heartbeat, LogCommand, Outcome, OutcomeBuilder, RaftMessage, ReplicaState, ShipCommand,
    VoteResponse,
};
use std::io;

pub(super) fn handle<L: ReadableLog>(
    message: RaftMessage,
    state: &ReplicaState,
    log: &L,
    logger: &slog::Logger,
) -> Result<Outcome, ConsensusError> {
    let mut outcome = OutcomeBuilder::from_state(Role::Candidate, state);

    match message {
        RaftMessage::AppendEntriesRequest(request) => {
            // A successful append implies a legitimate leader; the shared
            // algorithm converts us to its follower.
            appending::handle_append_entries_request(state, log, request, &mut outcome, logger)?;
        }
        RaftMessage::Heartbeat(heartbeat) => {
            follower::heart_beat(state, log, heartbeat, &mut outcome)?;
        }
        RaftMessage::VoteRequest(request) => {
            voting::handle_vote_request(state, log, request, &mut outcome, logger)?;
        }
        RaftMessage::VoteResponse(response) => {
            handle_vote_response(state, log, response, &mut outcome, logger)?;
        }
        RaftMessage::PreVoteRequest(request) => {
            if state.supports_pre_voting {
                voting::handle_pre_vote_request(state, log, request, &mut outcome)?;
            }
        }
        RaftMessage::ElectionTimeout => {
            // The campaign failed to conclude. With pre-voting enabled we
            // fall back to canvassing rather than burning another term.
            if state.supports_pre_voting {
                outcome.step_down_to_follower();
                voting::start_pre_election(state, log, &mut outcome, logger)?;
            } else {
                voting::start_real_election(state, log, &mut outcome, logger)?;
            }
        }
        RaftMessage::PruneRequest(request) => {
            appending::handle_prune_request(request, &mut outcome);
        }
        RaftMessage::AppendEntriesResponse(_)
        | RaftMessage::PreVoteResponse(_)
        | RaftMessage::HeartbeatResponse(_)
        | RaftMessage::NewEntryRequest(_)
        | RaftMessage::NewEntryBatchRequest(_)
        | RaftMessage::LogCompactionInfo(_)
        | RaftMessage::HeartbeatTimeout => {}
    }

    Ok(outcome.build())
}

fn handle_vote_response<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    response: VoteResponse,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<()> {
    if response.term > outcome.term() {
        outcome.advance_term(response.term);
        outcome.step_down_to_follower();
        return Ok(());
    }
    if response.term < outcome.term() || !response.vote_granted {
        return Ok(());
    }

    let votes = outcome.add_vote_for_me(response.from);
    if !is_quorum(state.voting_members.len(), votes) {
        return Ok(());
    }

    slog::info!(logger, "Election won, becoming leader for term {}", outcome.term());
    become_leader(state, log, outcome)
}

/// Take office: install leader bookkeeping, append the barrier entry that
/// makes prior-term entries committable, and announce with heartbeats.
fn become_leader<L: ReadableLog>(state: &ReplicaState, log: &L, outcome: &mut OutcomeBuilder) -> io::Result<()> {
    outcome.set_role(Role::Leader);
    outcome.set_leader(Some(state.myself.clone()));
    outcome.set_follower_states(FollowerStates::init(state.other_replication_members()));
    outcome.reset_heartbeat_responses(state.myself.clone());
    outcome.renew_election_timeout();

    let prev_log_index = log.append_index();
    let barrier = LogEntry::barrier(outcome.term());
    outcome.add_log_command(LogCommand::Append {
        index: prev_log_index + 1,
        entry: barrier.clone(),
    });
    outcome.add_ship_command(ShipCommand::NewEntries {
        prev_log_index,
        prev_log_term: log.read_entry_term(prev_log_index)?,
        entries: vec![barrier],
    });

    let commit_index = outcome.commit_index();
    let commit_index_term = log.read_entry_term(commit_index)?;
    for member in state.other_replication_members() {
        let heartbeat = Heartbeat {
            from: state.myself.clone(),
            leader_term: outcome.term(),
            commit_index,
            commit_index_term,
        };
        outcome.add_outgoing_message(member.clone(), RaftMessage::Heartbeat(heartbeat));
    }
    Ok(())
}
