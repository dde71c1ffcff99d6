use crate::commitlog::{LogEntry, LogIndex, Term};
use crate::consensus::MemberId;
use bytes::Bytes;

/// The closed set of protocol messages exchanged between replicas and with
/// the local client-facing layer. Timer ticks arrive through the same set so
/// a replica handles exactly one message at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RaftMessage {
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    PreVoteRequest(PreVoteRequest),
    PreVoteResponse(PreVoteResponse),
    Heartbeat(Heartbeat),
    HeartbeatResponse(HeartbeatResponse),
    NewEntryRequest(NewEntryRequest),
    NewEntryBatchRequest(NewEntryBatchRequest),
    PruneRequest(PruneRequest),
    LogCompactionInfo(LogCompactionInfo),
    ElectionTimeout,
    HeartbeatTimeout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendEntriesResponse {
    pub from: MemberId,
    pub term: Term,
    pub success: bool,
    /// Highest index known to match the leader's log, or [crate::commitlog::NONE]
    /// on failure.
    pub match_index: LogIndex,
    /// The responder's current append index, for backtracking on mismatch.
    pub append_index: LogIndex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteRequest {
    pub from: MemberId,
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteResponse {
    pub from: MemberId,
    pub term: Term,
    pub vote_granted: bool,
}

/// Non-binding canvassing request. Carries the candidate's *current* term;
/// the term is only incremented once a real election starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreVoteRequest {
    pub from: MemberId,
    pub term: Term,
    pub candidate: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreVoteResponse {
    pub from: MemberId,
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub from: MemberId,
    pub leader_term: Term,
    pub commit_index: LogIndex,
    pub commit_index_term: Term,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub from: MemberId,
}

/// Client-submitted payload. Only meaningful at a leader; the dispatch layer
/// redirects clients of non-leaders before this ever reaches a handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEntryRequest {
    pub from: MemberId,
    pub content: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewEntryBatchRequest {
    pub contents: Vec<Bytes>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PruneRequest {
    pub safe_index: LogIndex,
}

/// Notification that the sender's log starts at a compacted boundary
/// (`prev_index`), so log-based shipping/repair below it is impossible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogCompactionInfo {
    pub from: MemberId,
    pub term: Term,
    pub prev_index: LogIndex,
}

/// An outgoing message paired with its recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directed {
    pub to: MemberId,
    pub message: RaftMessage,
}

impl Directed {
    pub fn new(to: MemberId, message: RaftMessage) -> Self {
        Directed { to, message }
    }
}
