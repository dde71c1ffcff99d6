use crate::commitlog::{ReadableLog, NONE};
use crate::consensus::roles::Role;
use crate::consensus::{
    AppendEntriesRequest, AppendEntriesResponse, LogCompactionInfo, LogCommand, OutcomeBuilder, PruneRequest,
    RaftMessage, ReplicaState,
};
use std::cmp;
use std::io;

/// The AppendEntries receiver algorithm, shared by every role. A request at
/// or above our term converts us to a follower of its sender before the log
/// work begins.
pub(super) fn handle_append_entries_request<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    request: AppendEntriesRequest,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<()> {
    if request.leader_term < outcome.term() {
        let response = AppendEntriesResponse {
            from: state.myself.clone(),
            term: outcome.term(),
            success: false,
            match_index: NONE,
            append_index: log.append_index(),
        };
        outcome.add_outgoing_message(request.from, RaftMessage::AppendEntriesResponse(response));
        return Ok(());
    }

    outcome.advance_term(request.leader_term);
    outcome.set_role(Role::Follower);
    outcome.set_leader(Some(request.from.clone()));
    outcome.set_pre_election(false);
    outcome.renew_election_timeout();

    // The context entry has been compacted away locally, so the consistency
    // check cannot run. Tell the leader where our log begins instead.
    if request.prev_log_index < log.prev_index() {
        let info = LogCompactionInfo {
            from: state.myself.clone(),
            term: outcome.term(),
            prev_index: log.prev_index(),
        };
        outcome.add_outgoing_message(request.from, RaftMessage::LogCompactionInfo(info));
        return Ok(());
    }

    let local_prev_term = log.read_entry_term(request.prev_log_index)?;
    if request.prev_log_index > log.append_index() || local_prev_term != request.prev_log_term {
        slog::info!(
            logger,
            "Rejecting append at prev index {} (prev term {}, local term {})",
            request.prev_log_index,
            request.prev_log_term,
            local_prev_term
        );
        let response = AppendEntriesResponse {
            from: state.myself.clone(),
            term: outcome.term(),
            success: false,
            match_index: NONE,
            append_index: log.append_index(),
        };
        outcome.add_outgoing_message(request.from, RaftMessage::AppendEntriesResponse(response));
        return Ok(());
    }

    // Scan for the first entry we do not already hold. A term conflict on the
    // way marks the start of a divergent suffix, which must be truncated
    // before the leader's entries go in.
    let base_index = request.prev_log_index + 1;
    let mut append_from = None;
    let mut truncated = false;
    for (offset, entry) in request.entries.iter().enumerate() {
        let index = base_index + offset as i64;
        let local_term = log.read_entry_term(index)?;
        if local_term == NONE {
            append_from = Some(offset);
            break;
        }
        if local_term != entry.term {
            if index <= outcome.commit_index() {
                panic!(
                    "Fatal: truncation at index {} would remove committed entries (commit index {})",
                    index,
                    outcome.commit_index()
                );
            }
            outcome.add_log_command(LogCommand::Truncate { from_index: index });
            truncated = true;
            append_from = Some(offset);
            break;
        }
    }

    let match_index = request.prev_log_index + request.entries.len() as i64;
    if let Some(offset) = append_from {
        let index = base_index + offset as i64;
        let mut entries = request.entries;
        let mut entries = entries.split_off(offset);
        if entries.len() == 1 {
            let entry = entries.remove(0);
            outcome.add_log_command(LogCommand::Append { index, entry });
        } else {
            outcome.add_log_command(LogCommand::BatchAppend { base_index: index, entries });
        }
    }

    // Everything past a truncation point is replaced by the request, so the
    // resulting append index is exactly the match index.
    let append_index_after = if truncated {
        match_index
    } else {
        cmp::max(log.append_index(), match_index)
    };

    if request.leader_commit > outcome.commit_index() {
        outcome.set_commit_index(cmp::min(request.leader_commit, match_index));
    }

    let response = AppendEntriesResponse {
        from: state.myself.clone(),
        term: outcome.term(),
        success: true,
        match_index,
        append_index: append_index_after,
    };
    outcome.add_outgoing_message(request.from, RaftMessage::AppendEntriesResponse(response));
    Ok(())
}

/// Prune requests are accepted in every role; the safe index was validated
/// by whoever decided to compact.
pub(super) fn handle_prune_request(request: PruneRequest, outcome: &mut OutcomeBuilder) {
    outcome.add_log_command(LogCommand::Prune {
        safe_index: request.safe_index,
    });
}
