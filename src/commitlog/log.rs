use bytes::Bytes;
use std::fmt;
use std::io;
use std::ops::RangeInclusive;

/// Term is a logical election epoch. At most one leader exists per term.
pub type Term = i64;

/// LogIndex is the position of an entry in the replicated log.
///
/// The log indexes entries starting from 1. A fresh, never-compacted log has
/// `prev_index() == 0` and `append_index() == 0`, with index 0 acting as a
/// virtual origin entry of term 0.
pub type LogIndex = i64;

/// Sentinel for "no index"/"no term", e.g. an unknown match index or an empty
/// commit index.
pub const NONE: i64 = -1;

/// A single entry in the replicated log. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub term: Term,
    pub payload: EntryPayload,
}

impl LogEntry {
    pub fn new(term: Term, payload: EntryPayload) -> Self {
        LogEntry { term, payload }
    }

    /// The no-op entry a fresh leader appends in its own term, making
    /// prior-term entries safely committable.
    pub fn barrier(term: Term) -> Self {
        LogEntry {
            term,
            payload: EntryPayload::Barrier,
        }
    }
}

/// Opaque entry content: an application command or an internal marker.
#[derive(Clone, PartialEq, Eq)]
pub enum EntryPayload {
    Data(Bytes),
    Barrier,
}

impl fmt::Debug for EntryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPayload::Data(data) => write!(f, "Data({}B)", data.len()),
            EntryPayload::Barrier => write!(f, "Barrier"),
        }
    }
}

/// Read-only view of the log, which is all the consensus core is allowed to
/// touch directly. Mutation happens only through applied log commands.
pub trait ReadableLog {
    /// Index of the last entry in the log (the origin index if empty).
    fn append_index(&self) -> LogIndex;

    /// Boundary at or below which history has been compacted away. Entries
    /// below this index are not readable; only the boundary term is retained.
    fn prev_index(&self) -> LogIndex;

    /// Term of the entry at `prev_index()`.
    fn prev_term(&self) -> Term;

    /// Term of the entry at `index`, or [NONE] if the index is above the
    /// append index or below the compacted boundary. The boundary itself
    /// reports `prev_term()`.
    fn read_entry_term(&self, index: LogIndex) -> io::Result<Term>;

    /// Read a contiguous range of entries. Indexes at/below the compacted
    /// boundary or above the append index are absent from the result.
    fn read_entries(&self, range: RangeInclusive<LogIndex>) -> io::Result<Vec<LogEntry>>;
}

/// Single-writer append/truncate log storage. The dispatcher applies log
/// commands from outcomes through this interface, in emission order.
pub trait Log: ReadableLog {
    /// Append one entry at `append_index() + 1`, returning the index used.
    fn append(&mut self, entry: LogEntry) -> io::Result<LogIndex>;

    /// Remove the suffix starting at `from_index` (inclusive).
    fn truncate(&mut self, from_index: LogIndex) -> io::Result<()>;

    /// Establish a new compacted boundary without content, as when
    /// bootstrapping from elsewhere: everything at or below `index` is
    /// considered present-but-compacted, with boundary term `term`.
    fn skip(&mut self, index: LogIndex, term: Term) -> io::Result<()>;

    /// Discard storage for the compacted prefix up to `safe_index`
    /// (inclusive). Callers guarantee `safe_index` is at or below the commit
    /// index; this never touches committable suffix entries.
    fn prune(&mut self, safe_index: LogIndex) -> io::Result<()>;
}
