//! Transport module - byte-oriented connections to the device.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::MockTransport;
pub use serial::{SerialTransport, available_port_names};
pub use traits::{Transport, TransportError};
