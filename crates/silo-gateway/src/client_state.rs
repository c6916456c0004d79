//! Client connection state — spec §4.8.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use silo_core::prelude::Message;

/// A stable client grain-id the gateway uses as the external handle for
/// one connected client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Per-client bookkeeping: the live connection (if any), messages
/// waiting to be flushed to it, and when it last dropped.
pub struct ClientState {
    pub client_id: ClientId,
    connection: parking_lot::Mutex<Option<ConnectionId>>,
    pending_to_send: parking_lot::Mutex<VecDeque<Message>>,
    last_disconnect_ms: AtomicU64,
}

impl ClientState {
    pub fn new(client_id: ClientId, connection: ConnectionId) -> Self {
        Self {
            client_id,
            connection: parking_lot::Mutex::new(Some(connection)),
            pending_to_send: parking_lot::Mutex::new(VecDeque::new()),
            last_disconnect_ms: AtomicU64::new(0),
        }
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        *self.connection.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub fn attach(&self, connection: ConnectionId) {
        *self.connection.lock() = Some(connection);
        self.last_disconnect_ms.store(0, Ordering::Relaxed);
    }

    pub fn disconnect(&self, now_ms: u64) {
        *self.connection.lock() = None;
        self.last_disconnect_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn disconnected_since(&self) -> Option<u64> {
        if self.is_connected() {
            return None;
        }
        Some(self.last_disconnect_ms.load(Ordering::Relaxed))
    }

    pub fn enqueue_pending(&self, message: Message) {
        self.pending_to_send.lock().push_back(message);
    }

    pub fn drain_pending(&self) -> Vec<Message> {
        self.pending_to_send.lock().drain(..).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_to_send.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_after_disconnect_clears_the_disconnect_timestamp() {
        let state = ClientState::new(ClientId(1), ConnectionId(1));
        state.disconnect(100);
        assert_eq!(state.disconnected_since(), Some(100));
        state.attach(ConnectionId(2));
        assert!(state.is_connected());
        assert_eq!(state.disconnected_since(), None);
    }

    #[test]
    fn pending_queue_drains_in_fifo_order() {
        let state = ClientState::new(ClientId(1), ConnectionId(1));
        state.enqueue_pending(Message::request(
            silo_addr(1),
            silo_core::prelude::GrainId::new("T", "a"),
            silo_core::prelude::InterfaceId(0),
            silo_core::prelude::MethodId(0),
            silo_core::prelude::CorrelationId(1),
            bytes::Bytes::from_static(b"one"),
        ));
        state.enqueue_pending(Message::request(
            silo_addr(1),
            silo_core::prelude::GrainId::new("T", "a"),
            silo_core::prelude::InterfaceId(0),
            silo_core::prelude::MethodId(0),
            silo_core::prelude::CorrelationId(2),
            bytes::Bytes::from_static(b"two"),
        ));
        assert_eq!(state.pending_len(), 2);
        let drained = state.drain_pending();
        assert_eq!(drained[0].body, bytes::Bytes::from_static(b"one"));
        assert_eq!(drained[1].body, bytes::Bytes::from_static(b"two"));
        assert_eq!(state.pending_len(), 0);
    }

    fn silo_addr(port: u16) -> silo_core::prelude::SiloAddress {
        let ep: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        silo_core::prelude::SiloAddress::new(ep, 1)
    }
}
