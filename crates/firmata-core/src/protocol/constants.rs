//! Firmata wire-protocol constants.
//!
//! Command byte values follow the published Firmata protocol revision 2.x.

// ============================================================================
// Channel Messages (top nibble carries the command, low nibble a pin/port)
// ============================================================================

/// Analog value for a channel (or PWM feedback). Low nibble = channel.
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Upper bound of the analog message range.
pub const ANALOG_MESSAGE_END: u8 = 0xEF;

/// Digital state of an 8-pin port. Low nibble = port.
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Upper bound of the digital message range.
pub const DIGITAL_MESSAGE_END: u8 = 0x9F;

/// Enable/disable analog reporting for a channel. Low nibble = channel.
pub const REPORT_ANALOG: u8 = 0xC0;
/// Enable/disable digital reporting for a port. Low nibble = port.
pub const REPORT_DIGITAL: u8 = 0xD0;

// ============================================================================
// Control Messages
// ============================================================================

/// Set a pin to input/output/PWM/servo/etc.
pub const SET_PIN_MODE: u8 = 0xF4;
/// Set the value of an individual digital pin.
pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;
/// Protocol version report (also sent unsolicited by the device on reset).
pub const PROTOCOL_VERSION: u8 = 0xF9;
/// Reset the device to its power-up state.
pub const SYSTEM_RESET: u8 = 0xFF;

/// Start of a system-exclusive envelope.
pub const START_SYSEX: u8 = 0xF0;
/// End of a system-exclusive envelope.
pub const END_SYSEX: u8 = 0xF7;

// ============================================================================
// SysEx Sub-Commands (first data byte after START_SYSEX)
// ============================================================================

/// Analog write to any pin, value in 7-bit groups.
pub const EXTENDED_ANALOG: u8 = 0x6F;
/// Ask for the analog channel assigned to each pin.
pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
/// Reply carrying the analog mapping.
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
/// Ask for supported modes and resolutions of all pins.
pub const CAPABILITY_QUERY: u8 = 0x6B;
/// Reply carrying per-pin capabilities.
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
/// Ask for a single pin's current mode and value.
pub const PIN_STATE_QUERY: u8 = 0x6D;
/// Reply carrying a pin's mode and value.
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
/// Configure a servo's pulse range.
pub const SERVO_CONFIG: u8 = 0x70;
/// Text message, 14 bits per code unit.
pub const STRING_DATA: u8 = 0x71;
/// I2C read/write request.
pub const I2C_REQUEST: u8 = 0x76;
/// Reply to an I2C read.
pub const I2C_REPLY: u8 = 0x77;
/// I2C configuration (read interval, power pins).
pub const I2C_CONFIG: u8 = 0x78;
/// Report firmware name and version.
pub const REPORT_FIRMWARE: u8 = 0x79;
/// Set the device's main-loop sampling interval.
pub const SAMPLING_INTERVAL: u8 = 0x7A;

/// Lowest user-defined sub-command; payloads pass through undecoded.
pub const USER_COMMAND_START: u8 = 0x01;
/// Highest user-defined sub-command.
pub const USER_COMMAND_END: u8 = 0x0F;

// ============================================================================
// I2C Request Mode Bits (byte 2 of an I2C_REQUEST)
// ============================================================================

/// Read once.
pub const I2C_READ_ONCE: u8 = 0x08;
/// Read continuously until stopped.
pub const I2C_READ_CONTINUOUS: u8 = 0x10;
/// Stop reading (read-mode bits both set).
pub const I2C_STOP_READING: u8 = 0x18;
/// 10-bit addressing mode.
pub const I2C_10BIT_ADDRESS: u8 = 0x20;

// ============================================================================
// Limits
// ============================================================================

/// Highest addressable pin.
pub const MAX_PIN: u8 = 127;
/// Highest digital port (8 pins per port).
pub const MAX_PORT: u8 = 15;
/// Highest analog channel.
pub const MAX_CHANNEL: u8 = 15;
/// Largest value carried in two 7-bit groups.
pub const MAX_14BIT: u16 = 0x3FFF;
/// Highest 10-bit I2C address.
pub const MAX_I2C_ADDRESS: u16 = 0x3FF;
/// Capability-record and analog-mapping terminator, also "no channel".
pub const NO_CHANNEL: u8 = 0x7F;

/// Scratch-buffer bound for SysEx accumulation; frames beyond this are
/// discarded and the parser resynchronizes.
pub const MAX_FRAME_SIZE: usize = 2048;

// ============================================================================
// Baud Rates
// ============================================================================

/// Every baud rate the transport layer accepts.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    2_400, 4_800, 9_600, 14_400, 19_200, 28_800, 31_250, 38_400, 57_600, 115_200,
];

/// Default baud for a generic serial transport.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;
/// Default baud for Firmata discovery (StandardFirmata ships at 57600).
pub const DISCOVERY_BAUD_RATE: u32 = 57_600;
