mod in_memory;
mod log;

pub use in_memory::InMemoryLog;
pub use log::EntryPayload;
pub use log::Log;
pub use log::LogEntry;
pub use log::LogIndex;
pub use log::ReadableLog;
pub use log::Term;
pub use log::NONE;
