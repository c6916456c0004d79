//! Gateway — spec §4.8: accepts client connections, routes incoming
//! client traffic into the cluster, and maintains the reply-route
//! cache that lets one client's call reach another client's connected
//! gateway.
//!
//! Grounded in `spark-transport-tcp/src/channel.rs`'s per-connection
//! actor pattern for the connection index, generalized here to the
//! gateway's two-index (`client_id`, `connection`) bookkeeping spec
//! §4.8 calls for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use silo_core::prelude::{Message, RuntimeConfig, SiloAddress};
use silo_dispatcher::prelude::MessageCenter;
use tracing::{debug, info, warn};

use crate::client_state::{ClientId, ClientState, ConnectionId};

struct ReplyRoute {
    gateway: SiloAddress,
    expires_at_ms: u64,
}

/// The client-facing front door of a silo. One gateway instance is
/// owned per silo that accepts external connections (spec §4.8's
/// "system targets").
pub struct Gateway {
    local_silo: SiloAddress,
    dispatcher: Arc<MessageCenter>,
    by_client: DashMap<ClientId, Arc<ClientState>>,
    by_connection: DashMap<ConnectionId, ClientId>,
    reply_routes: DashMap<ClientId, ReplyRoute>,
    client_drop_timeout_ms: u64,
    reply_route_ttl_ms: u64,
    clock_ms: AtomicU64,
}

impl Gateway {
    pub fn new(local_silo: SiloAddress, dispatcher: Arc<MessageCenter>, config: &RuntimeConfig) -> Self {
        Self {
            local_silo,
            dispatcher,
            by_client: DashMap::new(),
            by_connection: DashMap::new(),
            reply_routes: DashMap::new(),
            client_drop_timeout_ms: config.client_drop_timeout_ms,
            reply_route_ttl_ms: config.response_timeout_ms * 5,
            clock_ms: AtomicU64::new(0),
        }
    }

    /// Test/embedding hook: advances the gateway's notion of "now"
    /// without depending on a concrete clock implementation.
    pub fn advance_clock(&self, delta_ms: u64) -> u64 {
        self.clock_ms.fetch_add(delta_ms, Ordering::Relaxed) + delta_ms
    }

    fn now_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::Relaxed)
    }

    pub fn on_connect(&self, client_id: ClientId, connection: ConnectionId) {
        match self.by_client.get(&client_id) {
            Some(existing) => existing.attach(connection),
            None => {
                self.by_client.insert(client_id, Arc::new(ClientState::new(client_id, connection)));
            }
        }
        self.by_connection.insert(connection, client_id);
        self.reply_routes.insert(
            client_id,
            ReplyRoute {
                gateway: self.local_silo,
                expires_at_ms: u64::MAX,
            },
        );
        info!(client = client_id.0, "client connected");
    }

    /// Does not remove the client state immediately; it is retained
    /// for `client_drop_timeout` so a reconnect can resume (spec §4.8).
    pub fn on_disconnect(&self, connection: ConnectionId) {
        let Some((_, client_id)) = self.by_connection.remove(&connection) else {
            return;
        };
        if let Some(state) = self.by_client.get(&client_id) {
            state.disconnect(self.now_ms());
            debug!(client = client_id.0, "client disconnected, retaining state");
        }
    }

    /// Spec §4.8 routing rules for a message arriving from a client.
    pub async fn route_from_client(&self, client_id: ClientId, mut message: Message) -> Option<Message> {
        if message.target_grain.type_name.as_ref() == SYSTEM_TARGET_TYPE {
            return self.deliver_to_system_target(message).await;
        }

        message.sender_silo = self.local_silo;
        let _ = client_id;
        let response = self
            .dispatcher
            .call(
                message.target_grain.clone(),
                message.interface_id,
                message.method_id,
                message.body.clone(),
                silo_core::prelude::Deadline::after(Duration::from_millis(self.reply_route_ttl_ms)),
            )
            .await;

        match response {
            Ok(body) => Some(message.into_response(body)),
            Err(err) => Some(message.into_rejection(silo_directory::prelude::rejection_for(&err), err.to_string())),
        }
    }

    async fn deliver_to_system_target(&self, message: Message) -> Option<Message> {
        if message.target_silo == Some(self.local_silo) || message.target_silo.is_none() {
            debug!("delivering system-target message locally");
            return Some(message.into_response(message.body.clone()));
        }
        warn!(target = ?message.target_silo, "system target not local to this gateway; dropping");
        None
    }

    /// Spec §4.8: "replies destined for another client ... look up the
    /// `(target_client_id → gateway_silo)` reply-route cache; if
    /// unknown, drop."
    pub fn forward_reply_to_client(&self, target_client: ClientId, message: Message) -> bool {
        let Some(route) = self.reply_routes.get(&target_client) else {
            warn!(client = target_client.0, "reply-route unknown, dropping reply");
            return false;
        };
        if route.gateway != self.local_silo {
            debug!(client = target_client.0, gateway = %route.gateway, "reply routes to a remote gateway (delivery left to transport)");
        }
        if let Some(state) = self.by_client.get(&target_client) {
            state.enqueue_pending(message);
            true
        } else {
            false
        }
    }

    /// Periodic cleanup agent: advances stale disconnects to full drops
    /// and expires stale reply-route entries (spec §4.8).
    pub fn run_cleanup_once(&self) -> CleanupReport {
        let now = self.now_ms();
        let mut dropped_clients = 0usize;
        let mut expired_routes = 0usize;

        let mut to_drop = Vec::new();
        for entry in self.by_client.iter() {
            if let Some(since) = entry.value().disconnected_since() {
                if now.saturating_sub(since) >= self.client_drop_timeout_ms {
                    to_drop.push(*entry.key());
                }
            }
        }
        for client_id in to_drop {
            self.by_client.remove(&client_id);
            self.reply_routes.remove(&client_id);
            dropped_clients += 1;
            info!(client = client_id.0, "client dropped after retention timeout");
        }

        let mut to_expire = Vec::new();
        for entry in self.reply_routes.iter() {
            if entry.value().expires_at_ms <= now {
                to_expire.push(*entry.key());
            }
        }
        for client_id in to_expire {
            self.reply_routes.remove(&client_id);
            expired_routes += 1;
        }

        CleanupReport {
            dropped_clients,
            expired_routes,
        }
    }

    pub fn connected_client_count(&self) -> usize {
        self.by_client.iter().filter(|e| e.value().is_connected()).count()
    }
}

const SYSTEM_TARGET_TYPE: &str = "$system";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub dropped_clients: usize,
    pub expired_routes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_catalog::prelude::{ActivationCollector, Catalog};
    use silo_core::prelude::{ClusterMembershipSnapshot, NoopObservability};
    use silo_directory::prelude::LocalGrainDirectory;
    use silo_membership::MembershipService;
    use silo_runtime_tokio::TokioRuntime;

    fn addr(port: u16) -> SiloAddress {
        let ep: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        SiloAddress::new(ep, 1)
    }

    struct UnreachableTransport;

    #[async_trait::async_trait]
    impl silo_directory::prelude::DirectoryTransport for UnreachableTransport {
        async fn forward_lookup(
            &self,
            _owner: SiloAddress,
            _grain: &silo_core::prelude::GrainId,
            _hop_count: u8,
        ) -> Result<silo_directory::prelude::RemoteLookupResult, silo_directory::prelude::ForwardError> {
            Err(silo_directory::prelude::ForwardError::Unreachable)
        }
    }

    struct UnreachableHandoff;

    #[async_trait::async_trait]
    impl silo_directory::prelude::HandoffChannel for UnreachableHandoff {
        async fn propose(
            &self,
            _to: SiloAddress,
            _proposal: silo_directory::prelude::HandoffProposal,
        ) -> Result<silo_directory::prelude::HandoffAck, silo_directory::prelude::HandoffError> {
            Err(silo_directory::prelude::HandoffError::PeerUnreachable)
        }
    }

    struct DroppingTransport;

    #[async_trait::async_trait]
    impl silo_dispatcher::transport::SiloTransport for DroppingTransport {
        async fn send_request(
            &self,
            _to: SiloAddress,
            _message: Message,
        ) -> Result<Message, silo_dispatcher::transport::TransportError> {
            Err(silo_dispatcher::transport::TransportError::Unreachable)
        }

        async fn send_one_way(
            &self,
            _to: SiloAddress,
            _message: Message,
        ) -> Result<(), silo_dispatcher::transport::TransportError> {
            Ok(())
        }
    }

    fn test_gateway(local: SiloAddress, config: &RuntimeConfig) -> Gateway {
        let membership = Arc::new(MembershipService::with_static_source());
        let mut members = std::collections::BTreeMap::new();
        members.insert(local, silo_core::prelude::SiloStatus::Active);
        membership.apply_snapshot(ClusterMembershipSnapshot::new(1, members)).unwrap();
        let directory = Arc::new(LocalGrainDirectory::new(
            local,
            16,
            membership,
            Arc::new(UnreachableTransport),
            6,
            Arc::new(UnreachableHandoff),
            silo_core::prelude::RetryPolicy::default(),
        ));
        let collector = Arc::new(ActivationCollector::new(60_000));
        let runtime = Arc::new(TokioRuntime::new());
        let catalog = Arc::new(Catalog::new(
            local,
            directory.clone(),
            collector,
            runtime.clone(),
            runtime,
            Arc::new(NoopObservability),
            config.clone(),
        ));
        let dispatcher = Arc::new(MessageCenter::new(local, directory, catalog, Arc::new(DroppingTransport), config));
        Gateway::new(local, dispatcher, config)
    }

    #[tokio::test]
    async fn disconnected_client_is_dropped_only_after_its_retention_timeout() {
        let local = addr(1);
        let mut config = RuntimeConfig::default();
        config.client_drop_timeout_ms = 1_000;
        let gateway = test_gateway(local, &config);

        gateway.on_connect(ClientId(1), ConnectionId(1));
        assert_eq!(gateway.connected_client_count(), 1);
        gateway.on_disconnect(ConnectionId(1));
        assert_eq!(gateway.connected_client_count(), 0);

        gateway.advance_clock(999);
        let report = gateway.run_cleanup_once();
        assert_eq!(report.dropped_clients, 0);

        gateway.advance_clock(2);
        let report = gateway.run_cleanup_once();
        assert_eq!(report.dropped_clients, 1);
    }

    #[tokio::test]
    async fn reconnect_before_retention_timeout_keeps_the_client() {
        let local = addr(1);
        let gateway = test_gateway(local, &RuntimeConfig::default());
        gateway.on_connect(ClientId(1), ConnectionId(1));
        gateway.on_disconnect(ConnectionId(1));
        gateway.on_connect(ClientId(1), ConnectionId(2));
        assert_eq!(gateway.connected_client_count(), 1);
        let report = gateway.run_cleanup_once();
        assert_eq!(report.dropped_clients, 0);
    }

    #[tokio::test]
    async fn reply_to_unknown_client_is_dropped() {
        let local = addr(1);
        let gateway = test_gateway(local, &RuntimeConfig::default());
        let msg = Message::request(
            local,
            silo_core::prelude::GrainId::new("T", "a"),
            silo_core::prelude::InterfaceId(0),
            silo_core::prelude::MethodId(0),
            silo_core::prelude::CorrelationId(1),
            bytes::Bytes::new(),
        );
        assert!(!gateway.forward_reply_to_client(ClientId(42), msg));
    }

    #[tokio::test]
    async fn reply_to_connected_client_is_enqueued() {
        let local = addr(1);
        let gateway = test_gateway(local, &RuntimeConfig::default());
        gateway.on_connect(ClientId(1), ConnectionId(1));
        let msg = Message::request(
            local,
            silo_core::prelude::GrainId::new("T", "a"),
            silo_core::prelude::InterfaceId(0),
            silo_core::prelude::MethodId(0),
            silo_core::prelude::CorrelationId(1),
            bytes::Bytes::new(),
        );
        assert!(gateway.forward_reply_to_client(ClientId(1), msg));
    }
}
