//! The grain capability surface — spec §9 redesign note: "model grains
//! as values implementing a set of capabilities `{OnActivate,
//! OnDeactivate, InvokeMethod}`", replacing the source's pervasive
//! inheritance of a `Grain` base class. Grounded in `spark-core`'s
//! `service::Service` object-safe dispatch trait
//! (`spark-core/src/service/mod.rs`), adapted from byte-oriented RPC
//! dispatch to grain method invocation.

use async_trait::async_trait;
use bytes::Bytes;

use crate::contract::CallContext;
use crate::error::Result;
use crate::protocol::MethodId;

/// Differentiates how the catalog treats an activation without requiring
/// callers to downcast — spec §9: "a tagged variant differentiates
/// system grains, stateless workers, and stateful grains".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrainKind {
    /// Directory, membership, and other runtime-internal targets.
    /// Exempt from the activation collector (spec §4.4: "an activation
    /// not in any bucket is exempt (e.g. grain services)").
    System,
    /// No persistent state; any activation may serve any call.
    Stateless,
    /// Ordinary single-activation stateful grain.
    Stateful,
}

/// Per-activation context handed to lifecycle hooks: identity plus
/// whatever the hosting catalog wants to expose (clock, observability).
pub struct ActivationContext<'a> {
    pub grain_id: &'a crate::ids::GrainId,
    pub activation_id: crate::ids::ActivationId,
}

/// The capability set every grain implementation provides. Held behind
/// an opaque handle (arena + index) by the catalog, never as a raw
/// pointer, so that activation replacement is atomic (spec §9).
#[async_trait]
pub trait Grain: Send + Sync {
    fn kind(&self) -> GrainKind {
        GrainKind::Stateful
    }

    /// Whether this grain's activation permits interleaving of multiple
    /// suspended turns (still never in parallel) — spec §4.6, §6
    /// `reentrancy` config option.
    fn reentrant(&self) -> bool {
        false
    }

    async fn on_activate(&mut self, ctx: &ActivationContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn on_deactivate(&mut self, ctx: &ActivationContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Invoke one method by its stable `(interface_id, method_id)`
    /// dispatch key (spec §9 "reflection-based RPC dispatch ... replaced
    /// by ... hand-written interface dispatch tables"). The
    /// serialization collaborator that produced and will consume `args`
    /// is out of scope for this core; the body travels as opaque bytes.
    async fn invoke(&mut self, method: MethodId, args: Bytes, ctx: &CallContext) -> Result<Bytes>;
}

/// Constructs a fresh grain instance for a given identity. One factory
/// per grain type, registered with the catalog.
pub trait GrainFactory: Send + Sync {
    fn create(&self, grain_id: &crate::ids::GrainId) -> Box<dyn Grain>;

    fn kind(&self) -> GrainKind {
        GrainKind::Stateful
    }
}
