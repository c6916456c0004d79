//! Silo-to-silo transport extension point — spec §4.7.
//!
//! Mirrors `silo_directory::transport::DirectoryTransport`: the
//! dispatcher decides *what* to send and *when* to retry, a concrete
//! `silo-runtime-tokio`-wired transport decides *how* a [`Message`]
//! actually crosses the wire, grounded in the teacher's
//! `spark-transport-tcp` channel abstraction sitting behind
//! `spark-core`'s routing layer.

use silo_core::prelude::{Message, SiloAddress};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("destination silo unreachable")]
    Unreachable,
    #[error("the response channel was dropped before a reply arrived")]
    ResponseDropped,
}

#[async_trait::async_trait]
pub trait SiloTransport: Send + Sync {
    /// Send a request and await its response or rejection.
    async fn send_request(&self, to: SiloAddress, message: Message) -> Result<Message, TransportError>;

    /// Send a one-way message; no response is expected, so this
    /// resolves once the message is handed off (not once it's
    /// processed).
    async fn send_one_way(&self, to: SiloAddress, message: Message) -> Result<(), TransportError>;
}
