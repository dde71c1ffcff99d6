use crate::consensus::{MemberId, RaftMessage};
use async_trait::async_trait;

/// Transport seam for messages to other cluster members. Delivery is best
/// effort; the protocol tolerates loss and reordering.
#[async_trait]
pub trait Outbound: Send + Sync + 'static {
    async fn send(&self, to: MemberId, message: RaftMessage);
}

/// Discards every message. Useful for single-member clusters and tests that
/// only exercise the local half of the protocol.
pub struct NullOutbound;

#[async_trait]
impl Outbound for NullOutbound {
    async fn send(&self, _to: MemberId, _message: RaftMessage) {}
}
