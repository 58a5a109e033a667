//! Typed messages decoded from the device stream.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Behavior assigned to a device pin.
///
/// The wire values are defined by the device firmware; bytes outside the
/// published set decode to [`PinMode::Unknown`] so capability and pin-state
/// replies from newer firmware still parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PinMode {
    DigitalInput,
    DigitalOutput,
    AnalogInput,
    PwmOutput,
    ServoControl,
    Shift,
    I2c,
    OneWire,
    StepperControl,
    Encoder,
    Serial,
    InputPullup,
    Unknown(u8),
}

impl PinMode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => PinMode::DigitalInput,
            0x01 => PinMode::DigitalOutput,
            0x02 => PinMode::AnalogInput,
            0x03 => PinMode::PwmOutput,
            0x04 => PinMode::ServoControl,
            0x05 => PinMode::Shift,
            0x06 => PinMode::I2c,
            0x07 => PinMode::OneWire,
            0x08 => PinMode::StepperControl,
            0x09 => PinMode::Encoder,
            0x0A => PinMode::Serial,
            0x0B => PinMode::InputPullup,
            other => PinMode::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PinMode::DigitalInput => 0x00,
            PinMode::DigitalOutput => 0x01,
            PinMode::AnalogInput => 0x02,
            PinMode::PwmOutput => 0x03,
            PinMode::ServoControl => 0x04,
            PinMode::Shift => 0x05,
            PinMode::I2c => 0x06,
            PinMode::OneWire => 0x07,
            PinMode::StepperControl => 0x08,
            PinMode::Encoder => 0x09,
            PinMode::Serial => 0x0A,
            PinMode::InputPullup => 0x0B,
            PinMode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::DigitalInput => write!(f, "digital-input"),
            PinMode::DigitalOutput => write!(f, "digital-output"),
            PinMode::AnalogInput => write!(f, "analog-input"),
            PinMode::PwmOutput => write!(f, "pwm"),
            PinMode::ServoControl => write!(f, "servo"),
            PinMode::Shift => write!(f, "shift"),
            PinMode::I2c => write!(f, "i2c"),
            PinMode::OneWire => write!(f, "onewire"),
            PinMode::StepperControl => write!(f, "stepper"),
            PinMode::Encoder => write!(f, "encoder"),
            PinMode::Serial => write!(f, "serial"),
            PinMode::InputPullup => write!(f, "input-pullup"),
            PinMode::Unknown(byte) => write!(f, "unknown(0x{byte:02X})"),
        }
    }
}

/// Wire-protocol revision reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Firmware name and version reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    pub major: u8,
    pub minor: u8,
    pub name: String,
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.name, self.major, self.minor)
    }
}

/// A sampled analog input level (14-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogState {
    pub channel: u8,
    pub level: u16,
}

/// The state of eight adjacent digital pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitalPortState {
    pub port: u8,
    pub pins: u8,
}

impl DigitalPortState {
    /// Whether pin `index` (0-7) within this port is high.
    pub fn pin(&self, index: u8) -> bool {
        index < 8 && (self.pins >> index) & 1 == 1
    }
}

/// A single pin's mode and current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinState {
    pub pin: u8,
    pub mode: PinMode,
    pub value: u64,
}

/// Modes a pin supports, with the reported resolution (in bits) per mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinCapability {
    pub pin: u8,
    pub modes: BTreeMap<PinMode, u8>,
}

impl PinCapability {
    pub fn supports(&self, mode: PinMode) -> bool {
        self.modes.contains_key(&mode)
    }

    pub fn resolution(&self, mode: PinMode) -> Option<u8> {
        self.modes.get(&mode).copied()
    }
}

/// Capabilities of every pin; the pin index is implied by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardCapability {
    pub pins: Vec<PinCapability>,
}

/// Pin-to-analog-channel assignments; pins without a channel are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalogMapping {
    pub channels: Vec<(u8, u8)>,
}

impl AnalogMapping {
    /// The analog channel assigned to `pin`, if any.
    pub fn channel_for(&self, pin: u8) -> Option<u8> {
        self.channels
            .iter()
            .find(|(p, _)| *p == pin)
            .map(|(_, c)| *c)
    }
}

/// Data returned from an I2C read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cReply {
    pub address: u16,
    pub register: u16,
    pub data: Vec<u8>,
}

/// A system-exclusive message the decoder does not interpret: either a
/// user-defined sub-command (0x01-0x0F) or one this library has no decoder
/// for. The payload is the raw bytes between the sub-command and END_SYSEX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysExMessage {
    pub command: u8,
    pub payload: Vec<u8>,
}

/// Every message kind the stream parser can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Analog(AnalogState),
    DigitalPort(DigitalPortState),
    ProtocolVersion(ProtocolVersion),
    Firmware(Firmware),
    Capability(BoardCapability),
    AnalogMapping(AnalogMapping),
    PinState(PinState),
    I2cReply(I2cReply),
    StringData(String),
    SysEx(SysExMessage),
}

impl Message {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Analog(_) => "analog",
            Message::DigitalPort(_) => "digital-port",
            Message::ProtocolVersion(_) => "protocol-version",
            Message::Firmware(_) => "firmware",
            Message::Capability(_) => "capability",
            Message::AnalogMapping(_) => "analog-mapping",
            Message::PinState(_) => "pin-state",
            Message::I2cReply(_) => "i2c-reply",
            Message::StringData(_) => "string-data",
            Message::SysEx(_) => "sysex",
        }
    }
}

/// A decoded message stamped with its arrival time.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: Message,
    pub received_at: Instant,
}

impl ReceivedMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            received_at: Instant::now(),
        }
    }
}
