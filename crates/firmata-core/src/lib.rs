//! firmata-core: host-side Firmata protocol client.
//!
//! Talks the Firmata wire protocol over a byte-oriented serial transport to
//! a microcontroller: pin I/O, analog/digital telemetry, I2C, and board
//! introspection.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: wire constants, 7-bit codec, typed messages, and the
//!   stream parser that demultiplexes interleaved telemetry and replies
//! - **Transport**: byte-stream abstraction (serialport, mock)
//! - **Dispatcher**: fan-out to listeners plus the reply-wait primitive
//! - **Commands**: typed operations encoded to exact wire bytes
//! - **Session**: receive thread + synchronous request/reply surface
//! - **Finder**: port and baud-rate auto-discovery
//!
//! # Example
//!
//! ```no_run
//! use firmata_core::{FirmataSession, PinMode, SerialTransport, SessionConfig};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(SerialTransport::new("/dev/ttyACM0", 57_600));
//! let session = FirmataSession::open(transport, SessionConfig::with_timeout_ms(2_000))
//!     .expect("session");
//!
//! let firmware = session.query_firmware().expect("firmware");
//! println!("connected to {firmware}");
//!
//! session.set_pin_mode(13, PinMode::DigitalOutput).expect("pin mode");
//! session.digital_write(13, true).expect("write");
//! ```

pub mod commands;
pub mod dispatcher;
pub mod events;
pub mod finder;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use commands::CommandError;
pub use dispatcher::{Dispatcher, WaitError};
pub use events::{MessageObserver, NullObserver, Subscription, TracingObserver};
pub use finder::{FinderConfig, PRIMARY_BAUD_RATES, SECONDARY_BAUD_RATES, SessionFinder};
pub use protocol::{
    AnalogMapping, AnalogState, BoardCapability, DigitalPortState, Firmware, Framer, I2cReply,
    Message, PinCapability, PinMode, PinState, ProtocolVersion, SysExMessage,
};
pub use session::{FirmataSession, SessionConfig, SessionError};
pub use transport::{
    MockTransport, SerialTransport, Transport, TransportError, available_port_names,
};
