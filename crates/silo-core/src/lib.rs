//! Shared kernel of the silo virtual-actor runtime.
//!
//! This crate carries the parts of the system every other crate in the
//! workspace needs to agree on: identities ([`ids`]), the wire message
//! envelope ([`protocol`]), the cluster membership data model
//! ([`membership`]), the error taxonomy ([`error`]), per-call context
//! ([`contract`]), the grain capability surface ([`grain`]), the
//! runtime contract traits ([`runtime`]), the metrics-sink trait
//! ([`observability`]), and semantic configuration ([`config`]).
//!
//! It holds contracts, not behaviour: concrete implementations of the
//! directory, catalog, scheduler, dispatcher, and gateway live in their
//! own crates and depend on this one, mirroring the teacher's split of
//! `spark-core` contracts from its satellite implementation crates.

pub mod config;
pub mod contract;
pub mod error;
pub mod grain;
pub mod ids;
pub mod membership;
pub mod observability;
pub mod protocol;
pub mod retry;
pub mod runtime;

pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::contract::{CallContext, Cancellation, Deadline, ShutdownMode};
    pub use crate::error::{ErrorCategory, RejectionKind, Result, SiloError};
    pub use crate::grain::{ActivationContext, Grain, GrainFactory, GrainKind};
    pub use crate::ids::{
        ActivationAddress, ActivationId, ActivationIdMinter, CorrelationId, Etag, GrainId, SiloAddress,
        SiloGeneration,
    };
    pub use crate::membership::{
        ClusterMembershipSnapshot, DirectoryMembershipSnapshot, MembershipDelta, SiloStatus,
    };
    pub use crate::observability::{Attribute, NoopObservability, ObservabilityFacade, TracingObservability};
    pub use crate::protocol::{
        Direction, HopCount, InterfaceId, Message, MethodId, RejectionInfo, RetryCount, HOP_LIMIT,
    };
    pub use crate::retry::RetryPolicy;
    pub use crate::runtime::{AsyncRuntime, BoxFuture, JoinHandle, MonotonicTimePoint, TaskExecutor, TaskPriority, TimeDriver};
}
