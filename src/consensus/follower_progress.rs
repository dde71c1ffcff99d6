use crate::commitlog::{LogIndex, NONE};
use crate::consensus::MemberId;
use std::collections::HashMap;

/// A leader's view of how far one follower's log matches its own, as last
/// observed from AppendEntries responses. Starts unknown and only ever
/// ratchets forward within a leader term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FollowerProgress {
    match_index: LogIndex,
}

impl FollowerProgress {
    pub fn new() -> Self {
        FollowerProgress { match_index: NONE }
    }
}

impl Default for FollowerProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-follower replication progress. Only meaningful while this replica is
/// leader; rebuilt from scratch on every election win.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FollowerStates {
    states: HashMap<MemberId, FollowerProgress>,
}

impl FollowerStates {
    pub fn empty() -> Self {
        FollowerStates {
            states: HashMap::new(),
        }
    }

    /// Fresh tracking for a new leader term: every follower starts unknown.
    pub fn init<'a>(followers: impl Iterator<Item = &'a MemberId>) -> Self {
        FollowerStates {
            states: followers.map(|id| (id.clone(), FollowerProgress::new())).collect(),
        }
    }

    pub fn match_index(&self, member: &MemberId) -> LogIndex {
        self.states.get(member).map(|p| p.match_index).unwrap_or(NONE)
    }

    /// Record a successful response. Returns false (and leaves the entry
    /// untouched) when `match_index` does not advance the known value, so
    /// stale out-of-order responses are ignored.
    pub fn advance_match_index(&mut self, member: &MemberId, match_index: LogIndex) -> bool {
        let progress = self.states.entry(member.clone()).or_default();
        if match_index <= progress.match_index {
            return false;
        }
        progress.match_index = match_index;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64) -> MemberId {
        MemberId(format!("member-{}", id))
    }

    #[test]
    fn match_index_starts_unknown() {
        let states = FollowerStates::init([member(1), member(2)].iter());
        assert_eq!(NONE, states.match_index(&member(1)));
        assert_eq!(NONE, states.match_index(&member(2)));
    }

    #[test]
    fn match_index_only_ratchets_forward() {
        let mut states = FollowerStates::init([member(1)].iter());

        assert!(states.advance_match_index(&member(1), 50));
        assert_eq!(50, states.match_index(&member(1)));

        // Stale out-of-order response.
        assert!(!states.advance_match_index(&member(1), 30));
        assert_eq!(50, states.match_index(&member(1)));

        assert!(states.advance_match_index(&member(1), 100));
        assert_eq!(100, states.match_index(&member(1)));
    }
}
