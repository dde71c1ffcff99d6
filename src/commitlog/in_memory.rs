use crate::commitlog::{Log, LogEntry, LogIndex, ReadableLog, Term, NONE};
use std::io;
use std::ops::RangeInclusive;

/// In-memory log storage. Used for tests and for bootstrapping a replica
/// before durable storage is wired in; the consensus core only ever sees the
/// [Log]/[ReadableLog] traits.
pub struct InMemoryLog {
    // Entry at vec position `i` lives at log index `prev_index + 1 + i`.
    entries: Vec<LogEntry>,
    prev_index: LogIndex,
    prev_term: Term,
}

impl InMemoryLog {
    pub fn new() -> Self {
        InMemoryLog {
            entries: Vec::new(),
            prev_index: 0,
            prev_term: 0,
        }
    }

    fn vec_pos(&self, index: LogIndex) -> Option<usize> {
        if index <= self.prev_index || index > self.append_index() {
            None
        } else {
            Some((index - self.prev_index - 1) as usize)
        }
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadableLog for InMemoryLog {
    fn append_index(&self) -> LogIndex {
        self.prev_index + self.entries.len() as LogIndex
    }

    fn prev_index(&self) -> LogIndex {
        self.prev_index
    }

    fn prev_term(&self) -> Term {
        self.prev_term
    }

    fn read_entry_term(&self, index: LogIndex) -> io::Result<Term> {
        if index == self.prev_index {
            return Ok(self.prev_term);
        }
        match self.vec_pos(index) {
            Some(pos) => Ok(self.entries[pos].term),
            None => Ok(NONE),
        }
    }

    fn read_entries(&self, range: RangeInclusive<LogIndex>) -> io::Result<Vec<LogEntry>> {
        let from = (*range.start()).max(self.prev_index + 1);
        let to = (*range.end()).min(self.append_index());
        if from > to {
            return Ok(Vec::new());
        }

        let from_pos = (from - self.prev_index - 1) as usize;
        let to_pos = (to - self.prev_index) as usize;
        Ok(self.entries[from_pos..to_pos].to_vec())
    }
}

impl Log for InMemoryLog {
    fn append(&mut self, entry: LogEntry) -> io::Result<LogIndex> {
        self.entries.push(entry);
        Ok(self.append_index())
    }

    fn truncate(&mut self, from_index: LogIndex) -> io::Result<()> {
        assert!(
            from_index > self.prev_index,
            "Truncating into the compacted prefix (from={}, prev={})",
            from_index,
            self.prev_index
        );
        let keep = (from_index - self.prev_index - 1) as usize;
        self.entries.truncate(keep);
        Ok(())
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> io::Result<()> {
        if index > self.append_index() {
            self.entries.clear();
            self.prev_index = index;
            self.prev_term = term;
        }
        Ok(())
    }

    fn prune(&mut self, safe_index: LogIndex) -> io::Result<()> {
        if safe_index <= self.prev_index {
            return Ok(());
        }
        let boundary = safe_index.min(self.append_index());
        let new_prev_term = self.read_entry_term(boundary)?;
        self.entries.drain(..(boundary - self.prev_index) as usize);
        self.prev_index = boundary;
        self.prev_term = new_prev_term;
        Ok(())
    }
}
