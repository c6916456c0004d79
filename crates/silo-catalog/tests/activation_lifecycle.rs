//! End-to-end single-silo activation lifecycle — spec §8 scenario 1
//! ("first-call activation"), simplified to one silo since the full
//! three-silo scenario needs a live transport, which belongs to
//! `silo-dispatcher`/`silo-gateway` integration, not this crate.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use silo_catalog::prelude::Catalog;
use silo_core::prelude::{
    ActivationContext, CallContext, ClusterMembershipSnapshot, CorrelationId, Grain, GrainFactory, GrainId, GrainKind,
    MethodId, NoopObservability, Result, RuntimeConfig, SiloAddress, SiloStatus,
};
use silo_directory::prelude::LocalGrainDirectory;
use silo_membership::MembershipService;
use silo_runtime_tokio::TokioRuntime;

struct EchoGrain {
    activations: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait]
impl Grain for EchoGrain {
    fn kind(&self) -> GrainKind {
        GrainKind::Stateful
    }

    async fn on_activate(&mut self, _ctx: &ActivationContext<'_>) -> Result<()> {
        self.activations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn invoke(&mut self, _method: MethodId, args: Bytes, _ctx: &CallContext) -> Result<Bytes> {
        Ok(args)
    }
}

struct EchoFactory {
    activations: Arc<std::sync::atomic::AtomicUsize>,
}

impl GrainFactory for EchoFactory {
    fn create(&self, _grain_id: &GrainId) -> Box<dyn Grain> {
        Box::new(EchoGrain {
            activations: self.activations.clone(),
        })
    }
}

fn silo(port: u16) -> SiloAddress {
    let ep: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    SiloAddress::new(ep, 1)
}

struct UnreachableTransport;

#[async_trait]
impl silo_directory::prelude::DirectoryTransport for UnreachableTransport {
    async fn forward_lookup(
        &self,
        _owner: SiloAddress,
        _grain: &GrainId,
        _hop_count: u8,
    ) -> std::result::Result<silo_directory::prelude::RemoteLookupResult, silo_directory::prelude::ForwardError> {
        Err(silo_directory::prelude::ForwardError::Unreachable)
    }
}

struct UnreachableHandoff;

#[async_trait]
impl silo_directory::prelude::HandoffChannel for UnreachableHandoff {
    async fn propose(
        &self,
        _to: SiloAddress,
        _proposal: silo_directory::prelude::HandoffProposal,
    ) -> std::result::Result<silo_directory::prelude::HandoffAck, silo_directory::prelude::HandoffError> {
        Err(silo_directory::prelude::HandoffError::PeerUnreachable)
    }
}

#[tokio::test]
async fn first_call_activates_then_second_call_reuses_the_activation() {
    let local = silo(1);
    let membership = Arc::new(MembershipService::with_static_source());
    let mut members = BTreeMap::new();
    members.insert(local, SiloStatus::Active);
    membership.apply_snapshot(ClusterMembershipSnapshot::new(1, members)).unwrap();

    let directory = Arc::new(LocalGrainDirectory::new(
        local,
        16,
        membership,
        Arc::new(UnreachableTransport),
        6,
        Arc::new(UnreachableHandoff),
        RuntimeConfig::default().retry,
    ));
    let collector = Arc::new(silo_catalog::prelude::ActivationCollector::new(60_000));
    let runtime = Arc::new(TokioRuntime::new());
    let config = RuntimeConfig::default();
    let catalog = Catalog::new(
        local,
        directory,
        collector,
        runtime.clone(),
        runtime.clone(),
        Arc::new(NoopObservability),
        config,
    );

    let activation_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    catalog.register_factory(
        "Thermostat",
        Arc::new(EchoFactory {
            activations: activation_count.clone(),
        }),
    );

    let grain = GrainId::new("Thermostat", "roomA");
    let first = catalog.get_or_create_activation(&grain).await.unwrap();
    assert_eq!(first.silo, local);

    let ctx = CallContext::builder(CorrelationId(1)).build();
    let reply = catalog
        .invoke_activation(&grain, MethodId(0), Bytes::from_static(b"ping"), ctx)
        .await
        .unwrap();
    assert_eq!(reply, Bytes::from_static(b"ping"));

    // Second call reuses the same activation; on_activate ran exactly once.
    let second = catalog.get_or_create_activation(&grain).await.unwrap();
    assert_eq!(second.activation, first.activation);
    assert_eq!(activation_count.load(std::sync::atomic::Ordering::SeqCst), 1);

    catalog.deactivate(&grain).await.unwrap();
    let recreated = catalog.get_or_create_activation(&grain).await.unwrap();
    assert_ne!(recreated.activation, first.activation);
    assert_eq!(activation_count.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn dead_silo_status_change_cancels_outbound_calls_waiting_on_it() {
    let local = silo(1);
    let remote = silo(2);
    let membership = Arc::new(MembershipService::with_static_source());
    let mut members = BTreeMap::new();
    members.insert(local, SiloStatus::Active);
    membership.apply_snapshot(ClusterMembershipSnapshot::new(1, members)).unwrap();

    let directory = Arc::new(LocalGrainDirectory::new(
        local,
        16,
        membership,
        Arc::new(UnreachableTransport),
        6,
        Arc::new(UnreachableHandoff),
        RuntimeConfig::default().retry,
    ));
    let collector = Arc::new(silo_catalog::prelude::ActivationCollector::new(60_000));
    let runtime = Arc::new(TokioRuntime::new());
    let catalog = Catalog::new(
        local,
        directory,
        collector,
        runtime.clone(),
        runtime.clone(),
        Arc::new(NoopObservability),
        RuntimeConfig::default(),
    );

    let tracked = catalog.track_outbound_call(CorrelationId(1), remote);
    let untracked_other_silo = catalog.track_outbound_call(CorrelationId(2), local);

    catalog.on_silo_status_change(remote, SiloStatus::Dead);

    tracked.await.expect("cancellation signal delivered for the dead silo's outbound call");
    // A call tracked against a different, still-live silo is untouched.
    assert!(untracked_other_silo.try_recv().is_err());
}
