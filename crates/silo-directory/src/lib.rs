//! Consistent-hash partitioned grain directory — spec §3/§4.2/§4.3.
//!
//! Three layers compose here: [`partition`] is the authoritative
//! per-silo slice of the registry, [`cache`] is a non-authoritative
//! read-through cache for grains this silo does not own, and
//! [`local_directory`] is the routing algorithm that decides, per
//! lookup, whether to serve locally, serve from cache, or forward.
//! [`handoff`] and [`transport`] are the two extension points a
//! concrete deployment wires up: handoff moves partition entries when
//! the ring changes, transport carries a forwarded request to its true
//! owner.

pub mod cache;
pub mod handoff;
pub mod local_directory;
pub mod partition;
pub mod transport;

pub mod prelude {
    pub use crate::cache::{CachedRoute, DirectoryCache};
    pub use crate::handoff::{HandoffAck, HandoffChannel, HandoffError, HandoffProposal};
    pub use crate::local_directory::{rejection_for, LocalGrainDirectory, ResolvedRoute};
    pub use crate::partition::{ActivationSlot, GrainDirectoryPartition, GrainInfoEntry, SingleActivationOutcome};
    pub use crate::transport::{DirectoryTransport, ForwardError, RemoteLookupResult};
}
