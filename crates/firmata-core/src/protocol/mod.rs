//! Protocol module - Firmata wire-format definitions.

pub mod codec;
pub mod constants;
pub mod message;
pub mod parser;

pub use codec::CodecError;
pub use message::{
    AnalogMapping, AnalogState, BoardCapability, DigitalPortState, Firmware, I2cReply, Message,
    PinCapability, PinMode, PinState, ProtocolVersion, ReceivedMessage, SysExMessage,
};
pub use parser::Framer;
