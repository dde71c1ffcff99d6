use crate::commitlog::{LogIndex, ReadableLog, Term};
use crate::consensus::{
    OutcomeBuilder, PreVoteRequest, PreVoteResponse, RaftMessage, ReplicaState, VoteRequest, VoteResponse,
};
use std::io;

/// A quorum is a strict majority of the voting members.
pub fn is_quorum(num_voting_members: usize, num_votes: usize) -> bool {
    num_votes >= num_voting_members / 2 + 1
}

/// The canonical Raft up-to-date rule plus the one-vote-per-term rule. Both
/// real votes and pre-votes grant under this predicate; only real votes also
/// respect a vote already committed to another candidate.
#[allow(clippy::too_many_arguments)]
fn should_vote_for(
    context_term: Term,
    request_term: Term,
    context_last_log_term: Term,
    request_last_log_term: Term,
    context_last_log_index: LogIndex,
    request_last_log_index: LogIndex,
    committed_to_another_candidate: bool,
) -> bool {
    if request_term < context_term {
        return false;
    }

    // > If the logs have last entries with different terms, then the log
    // > with the later term is more up-to-date. If the logs end with the
    // > same term, then whichever log is longer is more up-to-date. (§5.4.1)
    let request_log_ends_at_higher_term = request_last_log_term > context_last_log_term;
    let logs_end_at_same_term = request_last_log_term == context_last_log_term;
    let request_log_at_least_as_long = request_last_log_index >= context_last_log_index;
    let requester_log_up_to_date =
        request_log_ends_at_higher_term || (logs_end_at_same_term && request_log_at_least_as_long);

    let voted_for_other_in_same_term = request_term == context_term && committed_to_another_candidate;

    requester_log_up_to_date && !voted_for_other_in_same_term
}

/// Handle a binding vote request, from any role. A request bearing a greater
/// term forces a step-down first (universal term rule); a request from a term
/// not greater than ours is denied without changing state.
pub(super) fn handle_vote_request<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    request: VoteRequest,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<()> {
    if request.term > state.term {
        outcome.advance_term(request.term);
        outcome.step_down_to_follower();
    }

    let committed_to_another = match outcome.voted_for() {
        Some(voted_for) => *voted_for != request.candidate,
        None => false,
    };
    let last_log_index = log.append_index();
    let last_log_term = log.read_entry_term(last_log_index)?;

    let vote_granted = should_vote_for(
        outcome.term(),
        request.term,
        last_log_term,
        request.last_log_term,
        last_log_index,
        request.last_log_index,
        committed_to_another,
    );

    if vote_granted {
        slog::info!(logger, "Voting for {:?} in term {}", request.candidate, outcome.term());
        outcome.set_voted_for(Some(request.candidate.clone()));
        outcome.renew_election_timeout();
    } else {
        slog::info!(
            logger,
            "Denying vote to {:?} (request term {}, our term {})",
            request.candidate,
            request.term,
            outcome.term()
        );
    }

    let response = VoteResponse {
        from: state.myself.clone(),
        term: outcome.term(),
        vote_granted,
    };
    outcome.add_outgoing_message(request.from, RaftMessage::VoteResponse(response));
    Ok(())
}

/// Handle a non-binding pre-vote request. Grants under the same eligibility
/// predicate as a real vote but never records a vote; a higher request term
/// still advances ours.
pub(super) fn handle_pre_vote_request<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    request: PreVoteRequest,
    outcome: &mut OutcomeBuilder,
) -> io::Result<()> {
    if request.term > state.term {
        outcome.advance_term(request.term);
        outcome.step_down_to_follower();
    }

    let last_log_index = log.append_index();
    let last_log_term = log.read_entry_term(last_log_index)?;

    let vote_granted = should_vote_for(
        outcome.term(),
        request.term,
        last_log_term,
        request.last_log_term,
        last_log_index,
        request.last_log_index,
        false,
    );

    let response = PreVoteResponse {
        from: state.myself.clone(),
        term: outcome.term(),
        vote_granted,
    };
    outcome.add_outgoing_message(request.from, RaftMessage::PreVoteResponse(response));
    Ok(())
}

/// Enter a binding election: increment the term, vote for self, broadcast
/// vote requests. Returns false if we are not an eligible voter.
pub(super) fn start_real_election<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<bool> {
    if !state.is_voting_member() {
        return Ok(false);
    }

    let new_term = outcome.term() + 1;
    outcome.advance_term(new_term);
    outcome.set_pre_election(false);
    outcome.set_voted_for(Some(state.myself.clone()));
    outcome.add_vote_for_me(state.myself.clone());
    outcome.renew_election_timeout();

    let last_log_index = log.append_index();
    let last_log_term = log.read_entry_term(last_log_index)?;
    for member in state.other_voting_members() {
        let request = VoteRequest {
            from: state.myself.clone(),
            term: new_term,
            candidate: state.myself.clone(),
            last_log_index,
            last_log_term,
        };
        outcome.add_outgoing_message(member.clone(), RaftMessage::VoteRequest(request));
    }

    slog::info!(logger, "Starting election for term {}", new_term);
    Ok(true)
}

/// Start canvassing pre-votes at the *current* term. Non-binding: no term
/// increment, no vote record. Returns false if we are not an eligible voter.
pub(super) fn start_pre_election<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<bool> {
    if !state.is_voting_member() {
        return Ok(false);
    }

    outcome.set_pre_election(true);
    outcome.add_pre_vote_for_me(state.myself.clone());
    outcome.renew_election_timeout();

    let last_log_index = log.append_index();
    let last_log_term = log.read_entry_term(last_log_index)?;
    for member in state.other_voting_members() {
        let request = PreVoteRequest {
            from: state.myself.clone(),
            term: outcome.term(),
            candidate: state.myself.clone(),
            last_log_index,
            last_log_term,
        };
        outcome.add_outgoing_message(member.clone(), RaftMessage::PreVoteRequest(request));
    }

    slog::info!(logger, "Canvassing pre-votes at term {}", outcome.term());
    Ok(true)
}
