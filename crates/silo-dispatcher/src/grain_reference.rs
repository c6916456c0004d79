//! Grain reference — spec §2's "strongly-typed, location-transparent
//! handles"; grounded in the teacher's `service::Client` typed-proxy
//! pattern (`spark-core/src/router/mod.rs`) adapted to grain method
//! calls instead of byte-oriented RPC.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use silo_core::prelude::{Deadline, GrainId, InterfaceId, MethodId, Result};

use crate::dispatcher::MessageCenter;

/// A caller-held handle to a grain identity. Resolving it to a live
/// activation, creating one if needed, and routing the call across the
/// cluster are all the dispatcher's job — this type only remembers
/// *which* grain and *which* interface.
#[derive(Clone)]
pub struct GrainReference {
    dispatcher: Arc<MessageCenter>,
    grain_id: GrainId,
    interface_id: InterfaceId,
    default_timeout: Duration,
}

impl GrainReference {
    pub fn new(dispatcher: Arc<MessageCenter>, grain_id: GrainId, interface_id: InterfaceId, default_timeout: Duration) -> Self {
        Self {
            dispatcher,
            grain_id,
            interface_id,
            default_timeout,
        }
    }

    pub fn grain_id(&self) -> &GrainId {
        &self.grain_id
    }

    /// Invoke `method` with the reference's default timeout.
    pub async fn call(&self, method: MethodId, args: Bytes) -> Result<Bytes> {
        self.call_with_deadline(method, args, Deadline::after(self.default_timeout)).await
    }

    pub async fn call_with_deadline(&self, method: MethodId, args: Bytes, deadline: Deadline) -> Result<Bytes> {
        self.dispatcher
            .call(self.grain_id.clone(), self.interface_id, method, args, deadline)
            .await
    }
}
