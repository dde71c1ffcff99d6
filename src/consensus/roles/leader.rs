use crate::commitlog::{EntryPayload, LogEntry, LogIndex, ReadableLog, NONE};
use crate::consensus::roles::{appending, follower, voting, ConsensusError, Role};
use crate::consensus::{
    AppendEntriesResponse, Heartbeat, LogCommand, LogCompactionInfo, Outcome, OutcomeBuilder, RaftMessage,
    ReplicaState, ShipCommand,
};
use std::cmp;
use std::io;

pub(super) fn handle<L: ReadableLog>(
    message: RaftMessage,
    state: &ReplicaState,
    log: &L,
    logger: &slog::Logger,
) -> Result<Outcome, ConsensusError> {
    let mut outcome = OutcomeBuilder::from_state(Role::Leader, state);

    match message {
        RaftMessage::AppendEntriesResponse(response) => {
            handle_append_entries_response(state, log, response, &mut outcome, logger)?;
        }
        RaftMessage::AppendEntriesRequest(request) => {
            if request.leader_term == outcome.term() {
                panic!(
                    "Fatal: two leaders in term {} ({:?} and {:?})",
                    outcome.term(),
                    state.myself,
                    request.from
                );
            }
            appending::handle_append_entries_request(state, log, request, &mut outcome, logger)?;
        }
        RaftMessage::Heartbeat(heartbeat) => {
            // A rival leader's heartbeat at our term or above means we lost
            // the office; an equal term here is a fresher election we missed.
            if heartbeat.leader_term >= outcome.term() {
                slog::info!(logger, "Stepping down for leader {:?}", heartbeat.from);
            }
            follower::heart_beat(state, log, heartbeat, &mut outcome)?;
        }
        RaftMessage::HeartbeatResponse(response) => {
            outcome.add_heartbeat_response(response.from);
        }
        RaftMessage::HeartbeatTimeout => {
            broadcast_heartbeat(state, log, &mut outcome)?;
        }
        RaftMessage::ElectionTimeout => {
            election_timeout(state, &mut outcome, logger);
        }
        RaftMessage::VoteRequest(request) => {
            voting::handle_vote_request(state, log, request, &mut outcome, logger)?;
        }
        RaftMessage::VoteResponse(response) => {
            if response.term > outcome.term() {
                outcome.advance_term(response.term);
                outcome.step_down_to_follower();
            }
        }
        RaftMessage::PreVoteRequest(request) => {
            if state.supports_pre_voting {
                voting::handle_pre_vote_request(state, log, request, &mut outcome)?;
            }
        }
        RaftMessage::NewEntryRequest(request) => {
            append_new_entries(state, log, vec![EntryPayload::Data(request.content)], &mut outcome)?;
        }
        RaftMessage::NewEntryBatchRequest(batch) => {
            let payloads = batch.contents.into_iter().map(EntryPayload::Data).collect();
            append_new_entries(state, log, payloads, &mut outcome)?;
        }
        RaftMessage::LogCompactionInfo(info) => {
            handle_log_compaction_info(info, &mut outcome);
        }
        RaftMessage::PruneRequest(request) => {
            appending::handle_prune_request(request, &mut outcome);
        }
        RaftMessage::PreVoteResponse(_) => {}
    }

    Ok(outcome.build())
}

fn handle_append_entries_response<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    response: AppendEntriesResponse,
    outcome: &mut OutcomeBuilder,
    logger: &slog::Logger,
) -> io::Result<()> {
    if response.term < outcome.term() {
        return Ok(());
    }
    if response.term > outcome.term() {
        outcome.advance_term(response.term);
        outcome.step_down_to_follower();
        return Ok(());
    }

    if !response.success {
        if response.append_index > NONE && response.append_index >= log.prev_index() {
            let probe_index = cmp::min(response.append_index, log.append_index());
            outcome.add_ship_command(ShipCommand::Mismatch {
                last_remote_append_index: probe_index,
                member: response.from,
            });
        } else {
            // The follower's whole log predates our compacted boundary; it
            // needs a snapshot, not log shipping.
            slog::info!(logger, "Follower {:?} is behind our compacted log", response.from);
            let info = LogCompactionInfo {
                from: state.myself.clone(),
                term: outcome.term(),
                prev_index: log.prev_index(),
            };
            outcome.add_outgoing_message(response.from, RaftMessage::LogCompactionInfo(info));
        }
        return Ok(());
    }

    // Out-of-order responses arrive; only ones that advance the known match
    // carry information.
    if !outcome
        .follower_states_mut()
        .advance_match_index(&response.from, response.match_index)
    {
        return Ok(());
    }

    if response.match_index < log.append_index() {
        outcome.add_ship_command(ShipCommand::Match {
            match_index: response.match_index,
            member: response.from,
        });
    }

    try_advance_commit(state, log, log.append_index(), outcome)
}

/// Commit the highest index a quorum of voting members holds, provided the
/// entry there belongs to our term. Entries from earlier terms only commit
/// transitively through one of ours (§5.4.2).
fn try_advance_commit<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    self_append_index: LogIndex,
    outcome: &mut OutcomeBuilder,
) -> io::Result<()> {
    let quorum = state.voting_members.len() / 2 + 1;
    let mut matches: Vec<LogIndex> = state
        .voting_members
        .iter()
        .map(|member| {
            if *member == state.myself {
                self_append_index
            } else {
                outcome.follower_states().match_index(member)
            }
        })
        .collect();
    matches.sort_unstable_by(|a, b| b.cmp(a));
    let quorum_index = matches[quorum - 1];

    if quorum_index <= outcome.commit_index() {
        return Ok(());
    }
    // Indexes past the stored log can only be appends emitted in this very
    // handler, which are all at our term.
    let term_at_quorum = if quorum_index > log.append_index() {
        outcome.term()
    } else {
        log.read_entry_term(quorum_index)?
    };
    if term_at_quorum == outcome.term() {
        outcome.set_commit_index(quorum_index);
    }
    Ok(())
}

fn append_new_entries<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    payloads: Vec<EntryPayload>,
    outcome: &mut OutcomeBuilder,
) -> io::Result<()> {
    let prev_log_index = log.append_index();
    let prev_log_term = log.read_entry_term(prev_log_index)?;
    let mut entries: Vec<LogEntry> = payloads
        .into_iter()
        .map(|payload| LogEntry::new(outcome.term(), payload))
        .collect();
    let appended = entries.len() as i64;

    if entries.len() == 1 {
        outcome.add_log_command(LogCommand::Append {
            index: prev_log_index + 1,
            entry: entries[0].clone(),
        });
    } else {
        outcome.add_log_command(LogCommand::BatchAppend {
            base_index: prev_log_index + 1,
            entries: entries.clone(),
        });
    }
    outcome.add_ship_command(ShipCommand::NewEntries {
        prev_log_index,
        prev_log_term,
        entries: std::mem::take(&mut entries),
    });

    try_advance_commit(state, log, prev_log_index + appended, outcome)
}

/// A follower reported its compacted boundary: anything at or below it is
/// present there by construction, so the match index ratchets to the
/// boundary and shipping resumes from it.
fn handle_log_compaction_info(info: LogCompactionInfo, outcome: &mut OutcomeBuilder) {
    if info.term != outcome.term() {
        return;
    }
    if outcome
        .follower_states_mut()
        .advance_match_index(&info.from, info.prev_index)
    {
        outcome.add_ship_command(ShipCommand::Match {
            match_index: info.prev_index,
            member: info.from,
        });
    }
}

fn broadcast_heartbeat<L: ReadableLog>(
    state: &ReplicaState,
    log: &L,
    outcome: &mut OutcomeBuilder,
) -> io::Result<()> {
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

/// The leadership lease check. Without heartbeat responses from a quorum
/// within one election timeout, this leader may be partitioned away and must
/// stop serving reads and accepting entries.
fn election_timeout(state: &ReplicaState, outcome: &mut OutcomeBuilder, logger: &slog::Logger) {
    let responding_voters = state
        .heartbeat_responses
        .iter()
        .filter(|member| state.voting_members.contains(member))
        .count();
    if voting::is_quorum(state.voting_members.len(), responding_voters) {
        outcome.reset_heartbeat_responses(state.myself.clone());
        outcome.renew_election_timeout();
    } else {
        slog::info!(logger, "Lease expired without quorum, stepping down from term {}", outcome.term());
        outcome.step_down_to_follower();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::{InMemoryLog, Log};
    use crate::consensus::state::test_support::replica_state;
    use crate::consensus::{FollowerStates, MemberId, NewEntryBatchRequest, NewEntryRequest, PruneRequest};
    use bytes::Bytes;

    fn member(id: u64) -> MemberId {
        MemberId(format!("member-{}", id))
    }

    fn leader_state(term: i64) -> ReplicaState {
        let mut state = replica_state(member(1))
            .voting_members(vec![member(1), member(2), member(3)])
            .leader(member(1))
            .follower_states(FollowerStates::init([member(2), member(3)].iter()))
            .heartbeat_responses(vec![member(1)])
            .build();
        state.term = term;
        state
    }

    fn data_entry(term: i64, content: &str) -> LogEntry {
        LogEntry::new(term, EntryPayload::Data(Bytes::copy_from_slice(content.as_bytes())))
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn success_response(from: MemberId, term: i64, match_index: i64, append_index: i64) -> RaftMessage {
        RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            from,
            term,
            success: true,
            match_index,
            append_index,
        })
    }

    fn failure_response(from: MemberId, term: i64, append_index: i64) -> RaftMessage {
        RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            from,
            term,
            success: false,
            match_index: NONE,
            append_index,
        })
    }

    fn log_with_entries(entries: Vec<LogEntry>) -> InMemoryLog {
        let mut log = InMemoryLog::new();
        for entry in entries {
            log.append(entry).unwrap();
        }
        log
    }

    #[test]
    fn success_response_behind_append_index_ships_missing_suffix() {
        let state = leader_state(2);
        let log = log_with_entries(vec![data_entry(2, "a"), data_entry(2, "b")]);

        let outcome = handle(success_response(member(2), 2, 1, 1), &state, &log, &logger()).unwrap();

        assert_eq!(
            vec![ShipCommand::Match {
                match_index: 1,
                member: member(2)
            }],
            outcome.ship_commands
        );
        assert_eq!(1, outcome.follower_states.match_index(&member(2)));
    }

    #[test]
    fn stale_success_response_is_ignored() {
        let mut state = leader_state(2);
        state.follower_states.advance_match_index(&member(2), 2);
        let log = log_with_entries(vec![data_entry(2, "a"), data_entry(2, "b"), data_entry(2, "c")]);

        let outcome = handle(success_response(member(2), 2, 1, 1), &state, &log, &logger()).unwrap();

        assert!(outcome.ship_commands.is_empty());
        assert_eq!(2, outcome.follower_states.match_index(&member(2)));
    }

    #[test]
    fn response_from_old_term_is_ignored() {
        let state = leader_state(5);
        let log = InMemoryLog::new();

        let outcome = handle(success_response(member(2), 4, 1, 1), &state, &log, &logger()).unwrap();

        assert!(outcome.ship_commands.is_empty());
        assert_eq!(Role::Leader, outcome.role);
    }

    #[test]
    fn higher_term_response_steps_down() {
        let state = leader_state(2);
        let log = InMemoryLog::new();

        let outcome = handle(failure_response(member(2), 5, 0), &state, &log, &logger()).unwrap();

        assert_eq!(Role::Follower, outcome.role);
        assert_eq!(5, outcome.term);
        assert_eq!(None, outcome.leader);
    }

    #[test]
    fn failure_response_ships_mismatch_probe() {
        let state = leader_state(2);
        let log = log_with_entries(vec![data_entry(2, "a"), data_entry(2, "b")]);

        let outcome = handle(failure_response(member(2), 2, 5), &state, &log, &logger()).unwrap();

        // Probe cannot start past our own log.
        assert_eq!(
            vec![ShipCommand::Mismatch {
                last_remote_append_index: 2,
                member: member(2)
            }],
            outcome.ship_commands
        );
    }

    #[test]
    fn failure_from_follower_behind_compacted_log_sends_compaction_info() {
        let state = leader_state(2);
        let mut log = InMemoryLog::new();
        log.skip(10, 2).unwrap();

        let outcome = handle(failure_response(member(2), 2, 4), &state, &log, &logger()).unwrap();

        assert!(outcome.ship_commands.is_empty());
        let info = outcome
            .outgoing_messages
            .iter()
            .find_map(|d| match &d.message {
                RaftMessage::LogCompactionInfo(info) => Some((d.to.clone(), info.clone())),
                _ => None,
            })
            .expect("no LogCompactionInfo emitted");
        assert_eq!(member(2), info.0);
        assert_eq!(10, info.1.prev_index);
    }

    #[test]
    fn quorum_match_advances_commit_index() {
        let state = leader_state(2);
        let log = log_with_entries(vec![data_entry(2, "a"), data_entry(2, "b")]);

        let outcome = handle(success_response(member(2), 2, 2, 2), &state, &log, &logger()).unwrap();

        assert_eq!(2, outcome.commit_index);
        // Fully caught up: nothing left to ship to this follower.
        assert!(outcome.ship_commands.is_empty());
        assert_eq!(2, outcome.follower_states.match_index(&member(2)));
    }

    #[test]
    fn commit_requires_entry_from_current_term() {
        // All stored entries are from term 1; a term-2 leader must not commit
        // them until one of its own entries reaches a quorum.
        let state = leader_state(2);
        let log = log_with_entries(vec![data_entry(1, "a"), data_entry(1, "b")]);

        let outcome = handle(success_response(member(2), 2, 2, 2), &state, &log, &logger()).unwrap();

        assert_eq!(NONE, outcome.commit_index);
    }

    #[test]
    fn minority_match_does_not_commit() {
        let mut state = replica_state(member(1))
            .voting_members(vec![member(1), member(2), member(3), member(4), member(5)])
            .leader(member(1))
            .follower_states(FollowerStates::init([member(2), member(3), member(4), member(5)].iter()))
            .build();
        state.term = 2;
        let log = log_with_entries(vec![data_entry(2, "a")]);

        let outcome = handle(success_response(member(2), 2, 1, 1), &state, &log, &logger()).unwrap();

        // Self plus one follower is 2 of 5.
        assert_eq!(NONE, outcome.commit_index);
    }

    #[test]
    fn new_entry_is_appended_and_shipped() {
        let state = leader_state(2);
        let log = log_with_entries(vec![data_entry(1, "a")]);

        let request = NewEntryRequest {
            from: member(1),
            content: Bytes::from_static(b"payload"),
        };
        let outcome = handle(RaftMessage::NewEntryRequest(request), &state, &log, &logger()).unwrap();

        let expected = LogEntry::new(2, EntryPayload::Data(Bytes::from_static(b"payload")));
        assert_eq!(
            vec![LogCommand::Append {
                index: 2,
                entry: expected.clone()
            }],
            outcome.log_commands
        );
        assert_eq!(
            vec![ShipCommand::NewEntries {
                prev_log_index: 1,
                prev_log_term: 1,
                entries: vec![expected]
            }],
            outcome.ship_commands
        );
    }

    #[test]
    fn entry_batch_is_appended_and_shipped_as_one_unit() {
        let state = leader_state(2);
        let log = InMemoryLog::new();

        let batch = NewEntryBatchRequest {
            contents: vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")],
        };
        let outcome = handle(RaftMessage::NewEntryBatchRequest(batch), &state, &log, &logger()).unwrap();

        let expected = vec![
            LogEntry::new(2, EntryPayload::Data(Bytes::from_static(b"a"))),
            LogEntry::new(2, EntryPayload::Data(Bytes::from_static(b"b"))),
        ];
        assert_eq!(
            vec![LogCommand::BatchAppend {
                base_index: 1,
                entries: expected.clone()
            }],
            outcome.log_commands
        );
        assert_eq!(
            vec![ShipCommand::NewEntries {
                prev_log_index: 0,
                prev_log_term: 0,
                entries: expected
            }],
            outcome.ship_commands
        );
    }

    #[test]
    fn single_member_cluster_commits_immediately() {
        let mut state = replica_state(member(1))
            .voting_members(vec![member(1)])
            .leader(member(1))
            .build();
        state.term = 1;
        let log = InMemoryLog::new();

        let request = NewEntryRequest {
            from: member(1),
            content: Bytes::from_static(b"solo"),
        };
        let outcome = handle(RaftMessage::NewEntryRequest(request), &state, &log, &logger()).unwrap();

        assert_eq!(1, outcome.commit_index);
    }

    #[test]
    fn heartbeat_timeout_broadcasts_to_all_replication_members() {
        let mut state = leader_state(2);
        state.replication_members.insert(member(4));
        state.commit_index = 1;
        let log = log_with_entries(vec![data_entry(2, "a")]);

        let outcome = handle(RaftMessage::HeartbeatTimeout, &state, &log, &logger()).unwrap();

        let heartbeats: Vec<_> = outcome
            .outgoing_messages
            .iter()
            .filter_map(|d| match &d.message {
                RaftMessage::Heartbeat(hb) => Some((d.to.clone(), hb.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(3, heartbeats.len());
        for (_, hb) in &heartbeats {
            assert_eq!(2, hb.leader_term);
            assert_eq!(1, hb.commit_index);
            assert_eq!(2, hb.commit_index_term);
        }
    }

    #[test]
    fn lease_renews_with_quorum_of_heartbeat_responses() {
        let mut state = leader_state(2);
        state.heartbeat_responses.insert(member(2));
        let log = InMemoryLog::new();

        let outcome = handle(RaftMessage::ElectionTimeout, &state, &log, &logger()).unwrap();

        assert_eq!(Role::Leader, outcome.role);
        assert!(outcome.renew_election_timeout);
        // Counting restarts from just ourselves.
        assert_eq!(1, outcome.heartbeat_responses.len());
        assert!(outcome.heartbeat_responses.contains(&member(1)));
    }

    #[test]
    fn lease_expiry_without_quorum_steps_down() {
        let state = leader_state(2);
        let log = InMemoryLog::new();

        let outcome = handle(RaftMessage::ElectionTimeout, &state, &log, &logger()).unwrap();

        assert_eq!(Role::Follower, outcome.role);
        assert_eq!(None, outcome.leader);
        assert_eq!(2, outcome.term);
    }

    #[test]
    fn rival_heartbeat_at_equal_term_steps_down() {
        let state = leader_state(2);
        let log = InMemoryLog::new();

        let heartbeat = Heartbeat {
            from: member(2),
            leader_term: 2,
            commit_index: NONE,
            commit_index_term: NONE,
        };
        let outcome = handle(RaftMessage::Heartbeat(heartbeat), &state, &log, &logger()).unwrap();

        assert_eq!(Role::Follower, outcome.role);
        assert_eq!(Some(member(2)), outcome.leader);
    }

    #[test]
    #[should_panic(expected = "two leaders")]
    fn append_request_at_equal_term_panics() {
        let state = leader_state(2);
        let log = InMemoryLog::new();

        let request = crate::consensus::AppendEntriesRequest {
            from: member(2),
            leader_term: 2,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![data_entry(2, "x")],
            leader_commit: NONE,
        };
        let _ = handle(RaftMessage::AppendEntriesRequest(request), &state, &log, &logger());
    }

    #[test]
    fn compaction_info_ratchets_match_index() {
        let state = leader_state(2);
        let log = InMemoryLog::new();

        let info = LogCompactionInfo {
            from: member(2),
            term: 2,
            prev_index: 7,
        };
        let outcome = handle(RaftMessage::LogCompactionInfo(info), &state, &log, &logger()).unwrap();

        assert_eq!(7, outcome.follower_states.match_index(&member(2)));
        assert_eq!(
            vec![ShipCommand::Match {
                match_index: 7,
                member: member(2)
            }],
            outcome.ship_commands
        );
    }

    #[test]
    fn prune_request_emits_prune_command() {
        let state = leader_state(2);
        let log = InMemoryLog::new();

        let outcome = handle(
            RaftMessage::PruneRequest(PruneRequest { safe_index: 3 }),
            &state,
            &log,
            &logger(),
        )
        .unwrap();

        assert_eq!(vec![LogCommand::Prune { safe_index: 3 }], outcome.log_commands);
    }
}
