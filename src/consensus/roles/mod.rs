mod appending;
mod candidate;
mod follower;
mod leader;
mod voting;

pub use voting::is_quorum;

use crate::commitlog::ReadableLog;
use crate::consensus::{Outcome, RaftMessage, ReplicaState};
use std::io;

/// The three protocol roles. Transitions are entirely outcome-driven: a
/// handler computes the next role, the dispatcher never chooses one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// A failure from the log collaborator. Fatal for this replica's
    /// participation until storage is restored; the message must not be
    /// silently dropped.
    #[error("log storage failure: {0}")]
    Storage(#[from] io::Error),
}

/// Dispatch one message to the handler for the replica's current role.
///
/// Handlers are pure: they never mutate `state` or the log, never block, and
/// describe all side effects in the returned [Outcome]. Unhandled
/// (role, message) combinations yield a no-op outcome.
pub fn handle<L: ReadableLog>(
    role: Role,
    message: RaftMessage,
    state: &ReplicaState,
    log: &L,
    logger: &slog::Logger,
) -> Result<Outcome, ConsensusError> {
    match role {
        Role::Follower => follower::handle(message, state, log, logger),
        Role::Candidate => candidate::handle(message, state, log, logger),
        Role::Leader => leader::handle(message, state, log, logger),
    }
}
