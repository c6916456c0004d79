//! Partition handoff — spec §4.3's "handoff" behaviour, strengthened
//! per the decision recorded in `SPEC_FULL.md`'s Open Questions: a
//! two-phase propose/ack/remove split rather than the fire-and-forget
//! transfer the distilled spec left ambiguous, closing the dual-failure
//! gap (sender crashes after sending, before the receiver acks) that a
//! single-message handoff cannot recover from.

use silo_core::prelude::SiloAddress;

use crate::partition::GrainInfoEntry;
use silo_core::prelude::GrainId;

/// A proposed batch of entries moving from `from` to `to`. The sender
/// keeps its own copy until [`HandoffAck`] is observed, so a crash
/// mid-transfer leaves the entries live on the original owner rather
/// than dropped.
#[derive(Clone, Debug)]
pub struct HandoffProposal {
    pub from: SiloAddress,
    pub to: SiloAddress,
    pub entries: Vec<(GrainId, GrainInfoEntry)>,
}

/// Sent by the receiver once the proposed entries are durably merged
/// into its own partition. Only after observing this does the sender
/// remove its copy.
#[derive(Clone, Copy, Debug)]
pub struct HandoffAck {
    pub accepted_count: usize,
}

/// Extension point a transport crate implements to carry handoff
/// messages between silos. Kept separate from [`crate::transport::DirectoryTransport`]
/// since handoff is a control-plane concern with its own message shape.
#[async_trait::async_trait]
pub trait HandoffChannel: Send + Sync {
    async fn propose(&self, to: SiloAddress, proposal: HandoffProposal) -> Result<HandoffAck, HandoffError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    #[error("handoff peer unreachable")]
    PeerUnreachable,
    #[error("handoff peer rejected the proposal")]
    Rejected,
}
