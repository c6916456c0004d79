//! Remote-hop extension point — spec §4.3 routing algorithm, step 3.
//!
//! `silo-directory` never depends on `silo-dispatcher` or
//! `silo-gateway` directly (that would be circular: both of those
//! crates depend on directory lookups). Instead a forwarded request is
//! expressed as a trait object the runtime-wiring crate supplies,
//! mirroring the teacher's `spark-transport-tcp` sitting behind
//! `spark-core`'s channel trait rather than being named by it.

use silo_core::prelude::{ActivationId, Etag, GrainId, SiloAddress};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    #[error("remote silo unreachable")]
    Unreachable,
    #[error("forwarded lookup exceeded the hop limit")]
    HopLimitExceeded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLookupResult {
    pub activations: Vec<(SiloAddress, ActivationId)>,
    pub etag: Etag,
}

/// Forwards a directory lookup or registration to the silo that
/// actually owns `grain`'s partition. `hop_count` is the count already
/// accumulated by prior hops; implementations must refuse to forward
/// past `silo_core::protocol::HOP_LIMIT` themselves as a defense in
/// depth, but `LocalGrainDirectory` is the primary enforcement point.
#[async_trait::async_trait]
pub trait DirectoryTransport: Send + Sync {
    async fn forward_lookup(
        &self,
        owner: SiloAddress,
        grain: &GrainId,
        hop_count: u8,
    ) -> Result<RemoteLookupResult, ForwardError>;
}
