//! Command encoding - typed operations to wire bytes.
//!
//! Every builder validates its arguments before producing bytes, so an
//! out-of-range value fails with nothing written to the transport. All
//! bytes between START_SYSEX and END_SYSEX stay below 0x80.

use thiserror::Error;

use crate::protocol::constants::*;
use crate::protocol::message::PinMode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{argument} out of range: {value} (max {max})")]
    ArgumentRange {
        argument: &'static str,
        value: u32,
        max: u32,
    },

    #[error("servo pulse range inverted: min {min} > max {max}")]
    PulseRangeInverted { min: u16, max: u16 },
}

fn check(argument: &'static str, value: u32, max: u32) -> Result<(), CommandError> {
    if value > max {
        return Err(CommandError::ArgumentRange {
            argument,
            value,
            max,
        });
    }
    Ok(())
}

fn check_pin(pin: u8) -> Result<(), CommandError> {
    check("pin", u32::from(pin), u32::from(MAX_PIN))
}

/// Reset the device to its power-up state.
pub fn system_reset() -> Vec<u8> {
    vec![SYSTEM_RESET]
}

/// Drive a single digital pin high or low.
pub fn digital_write(pin: u8, high: bool) -> Result<Vec<u8>, CommandError> {
    check_pin(pin)?;
    Ok(vec![SET_DIGITAL_PIN_VALUE, pin, u8::from(high)])
}

/// Write an analog level (PWM duty, servo angle, ...) to a pin.
///
/// Pins below 16 with values below 0x4000 fit the two-byte analog channel
/// message; anything else goes out as an extended-analog SysEx whose value
/// is little-endian 7-bit groups, minimum three, until exhausted.
pub fn analog_write(pin: u8, value: u32) -> Result<Vec<u8>, CommandError> {
    check_pin(pin)?;
    if pin < 16 && value <= u32::from(MAX_14BIT) {
        return Ok(vec![
            ANALOG_MESSAGE | pin,
            (value & 0x7F) as u8,
            ((value >> 7) & 0x7F) as u8,
        ]);
    }

    let mut bytes = vec![START_SYSEX, EXTENDED_ANALOG, pin];
    let mut rest = value;
    let mut groups = 0;
    while rest > 0 || groups < 3 {
        bytes.push((rest & 0x7F) as u8);
        rest >>= 7;
        groups += 1;
    }
    bytes.push(END_SYSEX);
    Ok(bytes)
}

/// Enable or disable analog reporting for a channel.
pub fn report_analog(channel: u8, enabled: bool) -> Result<Vec<u8>, CommandError> {
    check("channel", u32::from(channel), u32::from(MAX_CHANNEL))?;
    Ok(vec![REPORT_ANALOG | channel, u8::from(enabled)])
}

/// Enable or disable digital reporting for a port.
pub fn report_digital(port: u8, enabled: bool) -> Result<Vec<u8>, CommandError> {
    check("port", u32::from(port), u32::from(MAX_PORT))?;
    Ok(vec![REPORT_DIGITAL | port, u8::from(enabled)])
}

/// Set all eight pins of a digital port from a bitmap.
pub fn digital_port_write(port: u8, pins: u8) -> Result<Vec<u8>, CommandError> {
    check("port", u32::from(port), u32::from(MAX_PORT))?;
    Ok(vec![
        DIGITAL_MESSAGE | port,
        pins & 0x7F,
        (pins >> 7) & 0x03,
    ])
}

/// Assign a mode to a pin.
pub fn set_pin_mode(pin: u8, mode: PinMode) -> Result<Vec<u8>, CommandError> {
    check_pin(pin)?;
    Ok(vec![SET_PIN_MODE, pin, mode.to_byte()])
}

/// Set the device's sampling interval in milliseconds.
pub fn sampling_interval(interval_ms: u16) -> Result<Vec<u8>, CommandError> {
    check("interval", u32::from(interval_ms), u32::from(MAX_14BIT))?;
    Ok(vec![
        START_SYSEX,
        SAMPLING_INTERVAL,
        (interval_ms & 0x7F) as u8,
        ((interval_ms >> 7) & 0x7F) as u8,
        END_SYSEX,
    ])
}

/// Ask for the wire-protocol version.
pub fn request_protocol_version() -> Vec<u8> {
    vec![PROTOCOL_VERSION]
}

/// Ask for the firmware name and version.
pub fn request_firmware() -> Vec<u8> {
    vec![START_SYSEX, REPORT_FIRMWARE, END_SYSEX]
}

/// Ask for the capabilities of every pin.
pub fn request_capability() -> Vec<u8> {
    vec![START_SYSEX, CAPABILITY_QUERY, END_SYSEX]
}

/// Ask for the pin-to-analog-channel mapping.
pub fn request_analog_mapping() -> Vec<u8> {
    vec![START_SYSEX, ANALOG_MAPPING_QUERY, END_SYSEX]
}

/// Ask for one pin's current mode and value.
pub fn request_pin_state(pin: u8) -> Result<Vec<u8>, CommandError> {
    check_pin(pin)?;
    Ok(vec![START_SYSEX, PIN_STATE_QUERY, pin, END_SYSEX])
}

/// Configure a servo's pulse range in microseconds.
pub fn servo_config(pin: u8, min_pulse: u16, max_pulse: u16) -> Result<Vec<u8>, CommandError> {
    check_pin(pin)?;
    check("min_pulse", u32::from(min_pulse), u32::from(MAX_14BIT))?;
    check("max_pulse", u32::from(max_pulse), u32::from(MAX_14BIT))?;
    if min_pulse > max_pulse {
        return Err(CommandError::PulseRangeInverted {
            min: min_pulse,
            max: max_pulse,
        });
    }
    Ok(vec![
        START_SYSEX,
        SERVO_CONFIG,
        pin,
        (min_pulse & 0x7F) as u8,
        ((min_pulse >> 7) & 0x7F) as u8,
        (max_pulse & 0x7F) as u8,
        ((max_pulse >> 7) & 0x7F) as u8,
        END_SYSEX,
    ])
}

/// Send text to the device, each code unit packed into 14 bits.
///
/// Code points above 0x3FFF do not fit two 7-bit groups and are rejected.
pub fn string_write(text: &str) -> Result<Vec<u8>, CommandError> {
    let mut bytes = vec![START_SYSEX, STRING_DATA];
    for ch in text.chars() {
        let unit = ch as u32;
        check("code point", unit, u32::from(MAX_14BIT))?;
        bytes.push((unit & 0x7F) as u8);
        bytes.push(((unit >> 7) & 0x7F) as u8);
    }
    bytes.push(END_SYSEX);
    Ok(bytes)
}

/// Set the delay between I2C reads in microseconds.
pub fn i2c_config(interval_us: u16) -> Result<Vec<u8>, CommandError> {
    check("interval", u32::from(interval_us), u32::from(MAX_14BIT))?;
    Ok(vec![
        START_SYSEX,
        I2C_CONFIG,
        (interval_us & 0x7F) as u8,
        ((interval_us >> 7) & 0x7F) as u8,
        END_SYSEX,
    ])
}

/// Address bits that don't fit the low 7, plus the 10-bit flag when needed.
fn i2c_mode_byte(address: u16) -> u8 {
    let mut mode = ((address >> 7) & 0x07) as u8;
    if address > 0x7F {
        mode |= I2C_10BIT_ADDRESS;
    }
    mode
}

/// Write bytes to an I2C peripheral.
pub fn i2c_write(address: u16, data: &[u8]) -> Result<Vec<u8>, CommandError> {
    check("address", u32::from(address), u32::from(MAX_I2C_ADDRESS))?;
    let mut bytes = vec![
        START_SYSEX,
        I2C_REQUEST,
        (address & 0x7F) as u8,
        i2c_mode_byte(address),
    ];
    for &b in data {
        bytes.push(b & 0x7F);
        bytes.push((b >> 7) & 0x7F);
    }
    bytes.push(END_SYSEX);
    Ok(bytes)
}

/// Read `count` bytes from an I2C peripheral, optionally from `register`.
/// Continuous reads repeat at the configured interval until stopped.
pub fn i2c_read(
    address: u16,
    register: Option<u16>,
    count: u16,
    continuous: bool,
) -> Result<Vec<u8>, CommandError> {
    check("address", u32::from(address), u32::from(MAX_I2C_ADDRESS))?;
    check("count", u32::from(count), u32::from(MAX_14BIT))?;
    if let Some(register) = register {
        check("register", u32::from(register), u32::from(MAX_14BIT))?;
    }

    let read_mode = if continuous {
        I2C_READ_CONTINUOUS
    } else {
        I2C_READ_ONCE
    };
    let mut bytes = vec![
        START_SYSEX,
        I2C_REQUEST,
        (address & 0x7F) as u8,
        i2c_mode_byte(address) | read_mode,
    ];
    if let Some(register) = register {
        bytes.push((register & 0x7F) as u8);
        bytes.push(((register >> 7) & 0x7F) as u8);
    }
    bytes.push((count & 0x7F) as u8);
    bytes.push(((count >> 7) & 0x7F) as u8);
    bytes.push(END_SYSEX);
    Ok(bytes)
}

/// Stop every continuous I2C read.
///
/// Firmata specifies a per-query stop, but the reference firmware never
/// implemented it; only the stop-all form is emitted here.
pub fn i2c_stop_reading() -> Vec<u8> {
    vec![START_SYSEX, I2C_REQUEST, 0x00, I2C_STOP_READING, END_SYSEX]
}

/// Wrap an arbitrary payload in a SysEx envelope.
///
/// The command and every payload byte must stay below 0x80.
pub fn send_sysex(command: u8, payload: &[u8]) -> Result<Vec<u8>, CommandError> {
    check("command", u32::from(command), 0x7F)?;
    for &b in payload {
        check("payload byte", u32::from(b), 0x7F)?;
    }
    let mut bytes = Vec::with_capacity(payload.len() + 3);
    bytes.push(START_SYSEX);
    bytes.push(command);
    bytes.extend_from_slice(payload);
    bytes.push(END_SYSEX);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every byte between F0 and F7 must stay below 0x80.
    fn assert_sysex_body_clean(bytes: &[u8]) {
        assert_eq!(bytes.first(), Some(&START_SYSEX));
        assert_eq!(bytes.last(), Some(&END_SYSEX));
        for &b in &bytes[1..bytes.len() - 1] {
            assert!(b < 0x80, "byte 0x{b:02X} inside SysEx body");
        }
    }

    #[test]
    fn reset_is_single_byte() {
        assert_eq!(system_reset(), vec![0xFF]);
    }

    #[test]
    fn digital_write_wire_form() {
        assert_eq!(digital_write(13, true).unwrap(), vec![0xF5, 13, 1]);
        assert_eq!(digital_write(13, false).unwrap(), vec![0xF5, 13, 0]);
        assert!(digital_write(128, true).is_err());
    }

    #[test]
    fn analog_write_small_uses_channel_message() {
        assert_eq!(analog_write(3, 170).unwrap(), vec![0xE3, 0x2A, 0x01]);
        assert_eq!(analog_write(15, 0x3FFF).unwrap(), vec![0xEF, 0x7F, 0x7F]);
    }

    #[test]
    fn analog_write_large_value_uses_extended_message() {
        let bytes = analog_write(20, 0x12345).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x6F, 0x14, 0x45, 0x46, 0x04, 0xF7]);
        assert_sysex_body_clean(&bytes);
    }

    #[test]
    fn analog_write_high_pin_pads_to_three_groups() {
        // Even a zero value carries the minimum three groups.
        assert_eq!(
            analog_write(20, 0).unwrap(),
            vec![0xF0, 0x6F, 0x14, 0x00, 0x00, 0x00, 0xF7]
        );
    }

    #[test]
    fn report_modes_encode_nibble_and_flag() {
        assert_eq!(report_analog(5, true).unwrap(), vec![0xC5, 1]);
        assert_eq!(report_digital(2, false).unwrap(), vec![0xD2, 0]);
        assert!(report_analog(16, true).is_err());
        assert!(report_digital(16, true).is_err());
    }

    #[test]
    fn digital_port_write_splits_bitmap() {
        assert_eq!(digital_port_write(2, 0xD5).unwrap(), vec![0x92, 0x55, 0x01]);
        assert!(digital_port_write(16, 0).is_err());
    }

    #[test]
    fn set_pin_mode_wire_form() {
        assert_eq!(
            set_pin_mode(9, PinMode::ServoControl).unwrap(),
            vec![0xF4, 9, 4]
        );
    }

    #[test]
    fn sampling_interval_packs_14bit() {
        let bytes = sampling_interval(1000).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x7A, 0x68, 0x07, 0xF7]);
        assert!(sampling_interval(0x4000).is_err());
    }

    #[test]
    fn query_wire_forms() {
        assert_eq!(request_protocol_version(), vec![0xF9]);
        assert_eq!(request_firmware(), vec![0xF0, 0x79, 0xF7]);
        assert_eq!(request_capability(), vec![0xF0, 0x6B, 0xF7]);
        assert_eq!(request_analog_mapping(), vec![0xF0, 0x69, 0xF7]);
        assert_eq!(request_pin_state(7).unwrap(), vec![0xF0, 0x6D, 7, 0xF7]);
    }

    #[test]
    fn servo_config_validates_pulse_order() {
        let bytes = servo_config(9, 544, 2400).unwrap();
        assert_eq!(
            bytes,
            vec![0xF0, 0x70, 9, 0x20, 0x04, 0x60, 0x12, 0xF7]
        );
        assert_sysex_body_clean(&bytes);
        assert!(matches!(
            servo_config(9, 2400, 544),
            Err(CommandError::PulseRangeInverted { .. })
        ));
        assert!(servo_config(9, 0x4000, 0x4000).is_err());
    }

    #[test]
    fn string_write_packs_code_units() {
        let bytes = string_write("Hi").unwrap();
        assert_eq!(bytes, vec![0xF0, 0x71, 0x48, 0x00, 0x69, 0x00, 0xF7]);
        assert_sysex_body_clean(&bytes);
    }

    #[test]
    fn string_write_rejects_wide_code_points() {
        assert!(string_write("\u{4000}").is_err());
    }

    #[test]
    fn i2c_config_wire_form() {
        assert_eq!(
            i2c_config(0x1234).unwrap(),
            vec![0xF0, 0x78, 0x34, 0x24, 0xF7]
        );
    }

    #[test]
    fn i2c_write_7bit_address() {
        let bytes = i2c_write(0x48, &[0xAB]).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x76, 0x48, 0x00, 0x2B, 0x01, 0xF7]);
        assert_sysex_body_clean(&bytes);
    }

    #[test]
    fn i2c_write_10bit_address_sets_mode_bits() {
        let bytes = i2c_write(0x248, &[]).unwrap();
        // 0x248 = high bits 0b100 in the mode byte plus the 10-bit flag.
        assert_eq!(bytes, vec![0xF0, 0x76, 0x48, 0x24, 0xF7]);
        assert!(i2c_write(0x400, &[]).is_err());
    }

    #[test]
    fn i2c_read_once_with_register() {
        let bytes = i2c_read(0x48, Some(0x10), 2, false).unwrap();
        assert_eq!(
            bytes,
            vec![0xF0, 0x76, 0x48, 0x08, 0x10, 0x00, 0x02, 0x00, 0xF7]
        );
    }

    #[test]
    fn i2c_read_continuous_without_register() {
        let bytes = i2c_read(0x48, None, 6, true).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x76, 0x48, 0x10, 0x06, 0x00, 0xF7]);
        assert!(i2c_read(0x48, None, 0x4000, true).is_err());
        assert!(i2c_read(0x48, Some(0x4000), 1, true).is_err());
    }

    #[test]
    fn i2c_stop_reading_is_stop_all() {
        assert_eq!(i2c_stop_reading(), vec![0xF0, 0x76, 0x00, 0x18, 0xF7]);
    }

    #[test]
    fn sysex_passthrough_validates_alphabet() {
        let bytes = send_sysex(0x04, &[0x01, 0x7F]).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x04, 0x01, 0x7F, 0xF7]);
        assert!(send_sysex(0x80, &[]).is_err());
        assert!(send_sysex(0x04, &[0x80]).is_err());
    }
}
