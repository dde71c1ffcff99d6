use crate::commitlog::ReadableLog;
use crate::consensus::roles::{appending, is_quorum, voting, ConsensusError, Role};
use crate::consensus::{
    Heartbeat, HeartbeatResponse, Outcome, OutcomeBuilder, PreVoteResponse, RaftMessage, ReplicaState,
};
use std::io;

pub(super) fn handle<L: ReadableLog>(
    message: RaftMessage,
    state: &ReplicaState,
    log: &L,
    logger: &slog::Logger,
) -> Result<Outcome, ConsensusError> {
    let mut outcome = OutcomeBuilder::from_state(Role::Follower, state);

    match message {
        RaftMessage::AppendEntriesRequest(request) => {
            appending::handle_append_entries_request(state, log, request, &mut outcome, logger)?;
        }
        RaftMessage::Heartbeat(heartbeat) => {
            heart_beat(state, log, heartbeat, &mut outcome)?;
        }
        RaftMessage::VoteRequest(request) => {
            voting::handle_vote_request(state, log, request, &mut outcome, logger)?;
        }
        RaftMessage::PreVoteRequest(request) => {
            if state.supports_pre_voting {
                voting::handle_pre_vote_request(state, log, request, &mut outcome)?;
            }
        }
        RaftMessage::PreVoteResponse(response) => {
            if state.supports_pre_voting && state.pre_election {
                handle_pre_vote_response(state, log, response, &mut outcome, logger)?;
            }
        }
        RaftMessage::VoteResponse(response) => {
            // Not campaigning, so the grant is meaningless. A higher term is
            // still adopted.
            outcome.advance_term(response.term);
        }
        RaftMessage::AppendEntriesResponse(response) => {
            outcome.advance_term(response.term);
        }
        RaftMessage::ElectionTimeout => {
            election_timeout(state, log, &mut outcome, logger)?;
        }
        RaftMessage::PruneRequest(request) => {
            appending::handle_prune_request(request, &mut outcome);
        }
        RaftMessage::NewEntryRequest(_)
        | RaftMessage::NewEntryBatchRequest(_)
        | RaftMessage::LogCompactionInfo(_)
        | RaftMessage::HeartbeatResponse(_)
        | RaftMessage::HeartbeatTimeout => {}
    }

    Ok(outcome.build())
}

/// Leader liveness signal, shared with the candidate role. Converts the
/// receiver into a follower of the sender and advances the commit index when
/// the leader's committed entry is provably present locally.
pub(super) fn heart_beat<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    heartbeat: Heartbeat,
    outcome: &mut OutcomeBuilder,
) -> io::Result<()> {
    if heartbeat.leader_term < outcome.term() {
        return Ok(());
    }

    outcome.advance_term(heartbeat.leader_term);
    outcome.set_role(Role::Follower);
    outcome.set_leader(Some(heartbeat.from.clone()));
    outcome.set_pre_election(false);
    outcome.renew_election_timeout();

    if heartbeat.commit_index > outcome.commit_index()
        && log.read_entry_term(heartbeat.commit_index)? == heartbeat.commit_index_term
    {
        outcome.set_commit_index(heartbeat.commit_index);
    }

    let response = HeartbeatResponse {
        from: state.myself.clone(),
    };
    outcome.add_outgoing_message(heartbeat.from, RaftMessage::HeartbeatResponse(response));
    Ok(())
}

fn handle_pre_vote_response<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    response: PreVoteResponse,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<()> {
    if response.term > outcome.term() {
        outcome.advance_term(response.term);
        outcome.set_pre_election(false);
        return Ok(());
    }
    if response.term < outcome.term() || !response.vote_granted {
        return Ok(());
    }

    let pre_votes = outcome.add_pre_vote_for_me(response.from);
    if !is_quorum(state.voting_members.len(), pre_votes) {
        return Ok(());
    }

    slog::info!(logger, "Pre-vote quorum reached at term {}", outcome.term());
    outcome.set_pre_election(false);
    outcome.renew_election_timeout();
    if !state.refuses_to_be_leader && voting::start_real_election(state, log, outcome, logger)? {
        outcome.set_role(Role::Candidate);
    }
    Ok(())
}

fn election_timeout<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<()> {
    if state.supports_pre_voting {
        voting::start_pre_election(state, log, outcome, logger)?;
    } else if !state.refuses_to_be_leader && voting::start_real_election(state, log, outcome, logger)? {
        outcome.set_role(Role::Candidate);
    }
    Ok(())
}
