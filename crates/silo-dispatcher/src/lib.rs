//! Message Center / Dispatcher and grain references — spec §4.7.

pub mod dispatcher;
pub mod grain_reference;
pub mod transport;

pub mod prelude {
    pub use crate::dispatcher::MessageCenter;
    pub use crate::grain_reference::GrainReference;
    pub use crate::transport::{SiloTransport, TransportError};
}
