//! Client-facing gateway — spec §4.8.

pub mod client_state;
pub mod gateway;

pub mod prelude {
    pub use crate::client_state::{ClientId, ClientState, ConnectionId};
    pub use crate::gateway::{CleanupReport, Gateway};
}
