mod commitlog;
mod consensus;
mod dispatch;

pub use commitlog::EntryPayload;
pub use commitlog::InMemoryLog;
pub use commitlog::Log;
pub use commitlog::LogEntry;
pub use commitlog::LogIndex;
pub use commitlog::ReadableLog;
pub use commitlog::Term;
pub use commitlog::NONE;

pub use consensus::Directed;
pub use consensus::MemberId;
pub use consensus::MembershipConfig;
pub use consensus::RaftMessage;
pub use consensus::Role;

pub use dispatch::create;
pub use dispatch::ActorClient;
pub use dispatch::NullOutbound;
pub use dispatch::Outbound;
pub use dispatch::ProposeError;
pub use dispatch::ProposeReceipt;
pub use dispatch::ReplicaActor;
pub use dispatch::ReplicaConfig;
pub use dispatch::StatusError;
pub use dispatch::StatusReport;
