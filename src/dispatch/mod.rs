mod outbound;
mod timers;

pub use outbound::NullOutbound;
pub use outbound::Outbound;

#[cfg(test)]
pub(crate) use outbound::test_support::RecordingOutbound;

use crate::commitlog::{Log, LogIndex, Term};
use crate::consensus::{
    self, AppendEntriesRequest, ConsensusError, Directed, LogCommand, MemberId, MembershipConfig,
    NewEntryBatchRequest, NewEntryRequest, Outcome, RaftMessage, ReplicaState, Role, ShipCommand,
};
use bytes::Bytes;
use std::cmp;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

/// Membership plus the tuning knobs for one replica.
pub struct ReplicaConfig {
    pub membership: MembershipConfig,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub event_queue_size: usize,
    /// Upper bound on entries per shipped AppendEntries request.
    pub ship_batch_limit: usize,
}

impl ReplicaConfig {
    pub fn new(membership: MembershipConfig) -> Self {
        ReplicaConfig {
            membership,
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            event_queue_size: 64,
            ship_batch_limit: 64,
        }
    }
}

/// Receipt for an accepted proposal. The entry is appended and being
/// replicated; it is not yet committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposeReceipt {
    pub term: Term,
    pub index: LogIndex,
}

#[derive(Debug, thiserror::Error)]
pub enum ProposeError {
    #[error("not leader, try {0:?}")]
    LeaderRedirect(MemberId),

    // Likely an election in progress; retry with backoff.
    #[error("no known leader")]
    NoLeader,

    #[error("failed to persist log")]
    LocalIoError(#[source] std::io::Error),

    #[error("replica actor has exited")]
    ActorExited,
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("replica actor has exited")]
    ActorExited,
}

/// Point-in-time view of a replica, for operators and tests.
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: LogIndex,
    pub append_index: LogIndex,
}

#[derive(Debug)]
pub(crate) enum Event {
    Inbound(RaftMessage),
    Propose(Bytes, Callback<ProposeReceipt, ProposeError>),
    ProposeBatch(Vec<Bytes>, Callback<ProposeReceipt, ProposeError>),
    Status(Callback<StatusReport, StatusError>),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Debug>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Debug> Callback<O, E> {
    fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

/// Spawns the timer tasks and returns the client/actor pair. Must run inside
/// a tokio runtime. The caller drives the actor with
/// [ReplicaActor::run_event_loop].
pub fn create<L: Log, O: Outbound>(
    config: ReplicaConfig,
    log: L,
    outbound: Arc<O>,
    logger: slog::Logger,
) -> (ActorClient, ReplicaActor<L, O>) {
    let (tx, rx) = mpsc::channel(config.event_queue_size);
    let logger = logger.new(slog::o!("member" => config.membership.myself.to_string()));
    let election_timer = timers::ElectionTimerHandle::spawn_timer_task(
        config.election_timeout_min,
        config.election_timeout_max,
        tx.downgrade(),
    );

    let client = ActorClient { sender: tx.clone() };
    let actor = ReplicaActor {
        receiver: rx,
        event_queue: tx,
        state: ReplicaState::new(config.membership.clone()),
        role: Role::Follower,
        log,
        outbound,
        election_timer,
        heartbeat_timer: None,
        mismatch_probes: HashMap::new(),
        heartbeat_interval: config.heartbeat_interval,
        ship_batch_limit: config.ship_batch_limit as i64,
        logger,
    };

    (client, actor)
}

/// Handle for submitting messages and proposals to a replica's event loop.
#[derive(Clone)]
pub struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    /// Deliver a protocol message from another member. Dropped silently if
    /// the actor has exited; peers will retry.
    pub async fn inbound(&self, message: RaftMessage) {
        let _ = self.sender.send(Event::Inbound(message)).await;
    }

    /// Submit one entry for replication. Succeeds only at the leader.
    pub async fn propose(&self, data: Bytes) -> Result<ProposeReceipt, ProposeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::Propose(data, Callback(tx)))
            .await
            .map_err(|_| ProposeError::ActorExited)?;
        rx.await.map_err(|_| ProposeError::ActorExited)?
    }

    /// Submit several entries as one log batch. The receipt covers the last
    /// entry of the batch.
    pub async fn propose_batch(&self, data: Vec<Bytes>) -> Result<ProposeReceipt, ProposeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::ProposeBatch(data, Callback(tx)))
            .await
            .map_err(|_| ProposeError::ActorExited)?;
        rx.await.map_err(|_| ProposeError::ActorExited)?
    }

    pub async fn status(&self) -> Result<StatusReport, StatusError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::Status(Callback(tx)))
            .await
            .map_err(|_| StatusError::ActorExited)?;
        rx.await.map_err(|_| StatusError::ActorExited)?
    }
}

/// Owns a replica's state, log, and timers, and applies outcomes from the
/// pure handlers one event at a time.
pub struct ReplicaActor<L: Log, O: Outbound> {
    receiver: mpsc::Receiver<Event>,
    event_queue: mpsc::Sender<Event>,
    state: ReplicaState,
    role: Role,
    log: L,
    outbound: Arc<O>,
    election_timer: timers::ElectionTimerHandle,
    heartbeat_timer: Option<timers::HeartbeatTimerHandle>,
    /// Per-follower index of the last repair probe sent. Walked backward on
    /// consecutive mismatches; cleared on a successful response.
    mismatch_probes: HashMap<MemberId, LogIndex>,
    heartbeat_interval: Duration,
    ship_batch_limit: i64,
    logger: slog::Logger,
}

impl<L: Log, O: Outbound> ReplicaActor<L, O> {
    pub async fn run_event_loop(mut self) {
        slog::info!(self.logger, "Replica event loop running");
        while let Some(event) = self.receiver.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        slog::info!(self.logger, "Replica event loop exited");
    }

    // Must stay non-async: each event is handled to completion before the
    // next is seen, which is what makes outcome application safe.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Inbound(message) => match self.process(message) {
                Ok(()) => true,
                Err(error) => self.storage_failure(error),
            },
            Event::Propose(data, callback) => {
                if let Err(error) = self.check_leadership() {
                    callback.send(Err(error));
                    return true;
                }
                let message = RaftMessage::NewEntryRequest(NewEntryRequest {
                    from: self.state.myself.clone(),
                    content: data,
                });
                self.propose_internal(message, callback)
            }
            Event::ProposeBatch(contents, callback) => {
                if let Err(error) = self.check_leadership() {
                    callback.send(Err(error));
                    return true;
                }
                let message = RaftMessage::NewEntryBatchRequest(NewEntryBatchRequest { contents });
                self.propose_internal(message, callback)
            }
            Event::Status(callback) => {
                callback.send(Ok(StatusReport {
                    role: self.role,
                    term: self.state.term,
                    leader: self.state.leader.clone(),
                    commit_index: self.state.commit_index,
                    append_index: self.log.append_index(),
                }));
                true
            }
        }
    }

    fn check_leadership(&self) -> Result<(), ProposeError> {
        if self.role == Role::Leader {
            return Ok(());
        }
        match &self.state.leader {
            Some(leader) => Err(ProposeError::LeaderRedirect(leader.clone())),
            None => Err(ProposeError::NoLeader),
        }
    }

    fn propose_internal(&mut self, message: RaftMessage, callback: Callback<ProposeReceipt, ProposeError>) -> bool {
        match self.process(message) {
            Ok(()) => {
                callback.send(Ok(ProposeReceipt {
                    term: self.state.term,
                    index: self.log.append_index(),
                }));
                true
            }
            Err(error) => {
                let ConsensusError::Storage(io_error) = error;
                callback.send(Err(ProposeError::LocalIoError(io_error)));
                false
            }
        }
    }

    fn process(&mut self, message: RaftMessage) -> Result<(), ConsensusError> {
        let outcome = consensus::handle(self.role, message, &self.state, &self.log, &self.logger)?;
        self.apply(outcome)?;
        Ok(())
    }

    /// Apply one outcome: log commands first, then the state fold, then the
    /// side effects. Ship commands read the log, so they must come after the
    /// commands that appended what they ship.
    fn apply(&mut self, mut outcome: Outcome) -> Result<(), ConsensusError> {
        for command in std::mem::take(&mut outcome.log_commands) {
            self.apply_log_command(command)?;
        }

        let previous_role = self.role;
        self.role = outcome.role;
        self.state.update(&outcome);
        if previous_role != self.role {
            slog::info!(
                self.logger,
                "Role transition {:?} -> {:?} at term {}",
                previous_role,
                self.role,
                self.state.term
            );
        }

        if outcome.renew_election_timeout {
            self.election_timer.reset();
        }
        match (previous_role, self.role) {
            (Role::Leader, Role::Leader) => {}
            (_, Role::Leader) => {
                self.heartbeat_timer = Some(timers::HeartbeatTimerHandle::spawn_timer_task(
                    self.heartbeat_interval,
                    self.event_queue.downgrade(),
                ));
                self.mismatch_probes.clear();
            }
            (Role::Leader, _) => {
                self.heartbeat_timer = None;
                self.mismatch_probes.clear();
            }
            _ => {}
        }

        for directed in std::mem::take(&mut outcome.outgoing_messages) {
            self.send(directed);
        }
        for ship in std::mem::take(&mut outcome.ship_commands) {
            for directed in self.build_shipment(ship)? {
                self.send(directed);
            }
        }
        Ok(())
    }

    fn apply_log_command(&mut self, command: LogCommand) -> Result<(), ConsensusError> {
        match command {
            LogCommand::Append { index, entry } => {
                let appended_at = self.log.append(entry)?;
                debug_assert_eq!(index, appended_at);
            }
            LogCommand::BatchAppend { base_index, entries } => {
                for (offset, entry) in entries.into_iter().enumerate() {
                    let appended_at = self.log.append(entry)?;
                    debug_assert_eq!(base_index + offset as i64, appended_at);
                }
            }
            LogCommand::Truncate { from_index } => {
                slog::info!(self.logger, "Truncating log from index {}", from_index);
                self.log.truncate(from_index)?;
            }
            LogCommand::Prune { safe_index } => {
                slog::info!(self.logger, "Pruning log up to index {}", safe_index);
                self.log.prune(safe_index)?;
            }
        }
        Ok(())
    }

    /// Turn a ship command into concrete AppendEntries requests against the
    /// current log contents.
    fn build_shipment(&mut self, ship: ShipCommand) -> Result<Vec<Directed>, ConsensusError> {
        let shipments = match ship {
            ShipCommand::Match { match_index, member } => {
                self.mismatch_probes.remove(&member);
                vec![Directed::new(member, self.append_request_from(match_index)?)]
            }
            ShipCommand::Mismatch {
                last_remote_append_index,
                member,
            } => {
                // Empty probe: establishes where the logs agree without
                // sending entries the follower may discard. A repeated
                // mismatch means the follower diverges at or below the last
                // probed index, so each one steps the probe back by one,
                // down to the compacted boundary at worst.
                let probe_index = match self.mismatch_probes.get(&member).copied() {
                    Some(last_probe) => cmp::max(
                        cmp::min(last_probe - 1, last_remote_append_index),
                        self.log.prev_index(),
                    ),
                    None => cmp::min(last_remote_append_index, self.log.append_index()),
                };
                self.mismatch_probes.insert(member.clone(), probe_index);
                let request = AppendEntriesRequest {
                    from: self.state.myself.clone(),
                    leader_term: self.state.term,
                    prev_log_index: probe_index,
                    prev_log_term: self.log.read_entry_term(probe_index)?,
                    entries: Vec::new(),
                    leader_commit: self.state.commit_index,
                };
                vec![Directed::new(member, RaftMessage::AppendEntriesRequest(request))]
            }
            ShipCommand::NewEntries {
                prev_log_index,
                prev_log_term,
                entries,
            } => {
                let request = AppendEntriesRequest {
                    from: self.state.myself.clone(),
                    leader_term: self.state.term,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.state.commit_index,
                };
                self.state
                    .other_replication_members()
                    .map(|member| {
                        Directed::new(member.clone(), RaftMessage::AppendEntriesRequest(request.clone()))
                    })
                    .collect()
            }
        };
        Ok(shipments)
    }

    fn append_request_from(&self, match_index: LogIndex) -> Result<RaftMessage, ConsensusError> {
        let from_index = match_index + 1;
        let to_index = cmp::min(self.log.append_index(), match_index + self.ship_batch_limit);
        let entries = if from_index <= to_index {
            self.log.read_entries(from_index..=to_index)?
        } else {
            Vec::new()
        };
        Ok(RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
            from: self.state.myself.clone(),
            leader_term: self.state.term,
            prev_log_index: match_index,
            prev_log_term: self.log.read_entry_term(match_index)?,
            entries,
            leader_commit: self.state.commit_index,
        }))
    }

    fn send(&self, directed: Directed) {
        let outbound = Arc::clone(&self.outbound);
        tokio::task::spawn(async move {
            outbound.send(directed.to, directed.message).await;
        });
    }

    fn storage_failure(&self, error: ConsensusError) -> bool {
        slog::crit!(self.logger, "Stopping replica on storage failure: {}", error);
        false
    }
}
