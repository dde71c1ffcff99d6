mod follower_progress;
mod message;
mod outcome;
mod roles;
mod state;

pub use follower_progress::FollowerStates;
pub use message::AppendEntriesRequest;
pub use message::AppendEntriesResponse;
pub use message::Directed;
pub use message::Heartbeat;
pub use message::HeartbeatResponse;
pub use message::LogCompactionInfo;
pub use message::NewEntryBatchRequest;
pub use message::NewEntryRequest;
pub use message::PreVoteRequest;
pub use message::PreVoteResponse;
pub use message::PruneRequest;
pub use message::RaftMessage;
pub use message::VoteRequest;
pub use message::VoteResponse;
pub use outcome::LogCommand;
pub use outcome::Outcome;
pub use outcome::OutcomeBuilder;
pub use outcome::ShipCommand;
pub use roles::handle;
pub use roles::ConsensusError;
pub use roles::Role;
pub use state::MembershipConfig;
pub use state::ReplicaState;

use std::fmt;

/// Opaque identifier of a cluster member.
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct MemberId(pub String);

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        MemberId(id.to_string())
    }
}
