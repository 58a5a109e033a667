//! Byte-driven stream parser.
//!
//! The device interleaves unsolicited telemetry with replies on one byte
//! stream. Bytes with the top bit set are command bytes; everything else is
//! data belonging to the active frame. The parser consumes one byte at a
//! time and emits a [`Message`] whenever a frame completes.
//!
//! A wrong baud rate turns the stream into a storm of garbage that looks
//! like stray commands. The parser therefore never fails on bad input: an
//! unrecognized command byte resets it to idle, a command byte arriving
//! mid-frame abandons the partial frame, and data bytes with no frame in
//! progress are dropped. The receive thread keeps running through all of it.

use tracing::{trace, warn};

use super::codec::{unpack_14bit, unpack_14bit_wide};
use super::constants::*;
use super::message::{
    AnalogMapping, AnalogState, BoardCapability, DigitalPortState, Firmware, I2cReply, Message,
    PinCapability, PinMode, PinState, ProtocolVersion, SysExMessage,
};

/// Fixed-length frame kinds started by a channel or control command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectKind {
    Analog { channel: u8 },
    DigitalPort { port: u8 },
    ProtocolVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Awaiting a command byte; data bytes are dropped.
    Idle,
    /// Accumulating a fixed number of data bytes.
    Collecting { kind: CollectKind, needed: usize },
    /// Accumulating SysEx data until END_SYSEX.
    CollectingSysEx,
}

/// Stream parser; one instance per receive thread, never shared.
pub struct Framer {
    state: State,
    buffer: Vec<u8>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buffer: Vec::with_capacity(MAX_FRAME_SIZE),
        }
    }

    /// Drop any partial frame and return to idle.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
    }

    /// Consume one byte; returns a message when it completes a frame.
    pub fn push_byte(&mut self, byte: u8) -> Option<Message> {
        if byte & 0x80 != 0 {
            return self.on_command_byte(byte);
        }
        self.on_data_byte(byte)
    }

    /// Consume a run of bytes, collecting every completed message.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<Message> {
        bytes.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    fn on_command_byte(&mut self, byte: u8) -> Option<Message> {
        if self.state == State::CollectingSysEx && byte == END_SYSEX {
            let payload = std::mem::take(&mut self.buffer);
            self.state = State::Idle;
            return decode_sysex(&payload);
        }

        if self.state != State::Idle {
            trace!(byte = format!("0x{byte:02X}"), "command byte mid-frame, partial frame abandoned");
            self.reset();
        }

        match byte {
            ANALOG_MESSAGE..=ANALOG_MESSAGE_END => {
                self.state = State::Collecting {
                    kind: CollectKind::Analog {
                        channel: byte & 0x0F,
                    },
                    needed: 2,
                };
            }
            DIGITAL_MESSAGE..=DIGITAL_MESSAGE_END => {
                self.state = State::Collecting {
                    kind: CollectKind::DigitalPort { port: byte & 0x0F },
                    needed: 2,
                };
            }
            PROTOCOL_VERSION => {
                self.state = State::Collecting {
                    kind: CollectKind::ProtocolVersion,
                    needed: 2,
                };
            }
            START_SYSEX => {
                self.state = State::CollectingSysEx;
            }
            other => {
                // Resync policy: unknown command bytes are dropped, not errors.
                trace!(byte = format!("0x{other:02X}"), "unclassified command byte dropped");
            }
        }
        None
    }

    fn on_data_byte(&mut self, byte: u8) -> Option<Message> {
        match self.state {
            State::Idle => {
                trace!(byte = format!("0x{byte:02X}"), "data byte with no frame in progress dropped");
                None
            }
            State::Collecting { kind, needed } => {
                self.buffer.push(byte);
                if self.buffer.len() < needed {
                    return None;
                }
                let data = std::mem::take(&mut self.buffer);
                self.state = State::Idle;
                Some(decode_fixed(kind, &data))
            }
            State::CollectingSysEx => {
                if self.buffer.len() >= MAX_FRAME_SIZE {
                    warn!(
                        limit = MAX_FRAME_SIZE,
                        "SysEx frame exceeded buffer bound, discarding"
                    );
                    self.reset();
                    return None;
                }
                self.buffer.push(byte);
                None
            }
        }
    }
}

fn decode_fixed(kind: CollectKind, data: &[u8]) -> Message {
    match kind {
        CollectKind::Analog { channel } => Message::Analog(AnalogState {
            channel,
            level: u16::from(data[0]) | (u16::from(data[1]) << 7),
        }),
        CollectKind::DigitalPort { port } => Message::DigitalPort(DigitalPortState {
            port,
            pins: (u16::from(data[0]) | (u16::from(data[1]) << 7)) as u8,
        }),
        CollectKind::ProtocolVersion => Message::ProtocolVersion(ProtocolVersion {
            major: data[0],
            minor: data[1],
        }),
    }
}

/// Decode a complete SysEx payload: first byte is the sub-command, the rest
/// is data. Malformed payloads are dropped with a warning; unknown
/// sub-commands come back as generic [`Message::SysEx`] so callers can still
/// inspect them.
fn decode_sysex(payload: &[u8]) -> Option<Message> {
    let (&command, data) = payload.split_first().or_else(|| {
        warn!("empty SysEx frame dropped");
        None
    })?;

    match command {
        ANALOG_MAPPING_RESPONSE => Some(decode_analog_mapping(data)),
        CAPABILITY_RESPONSE => decode_capability(data),
        PIN_STATE_RESPONSE => decode_pin_state(data),
        STRING_DATA => decode_string(data),
        I2C_REPLY => decode_i2c_reply(data),
        REPORT_FIRMWARE => decode_firmware(data),
        USER_COMMAND_START..=USER_COMMAND_END => Some(Message::SysEx(SysExMessage {
            command,
            payload: data.to_vec(),
        })),
        other => {
            warn!(
                command = format!("0x{other:02X}"),
                len = data.len(),
                "unrecognized SysEx sub-command passed through undecoded"
            );
            Some(Message::SysEx(SysExMessage {
                command,
                payload: data.to_vec(),
            }))
        }
    }
}

fn decode_analog_mapping(data: &[u8]) -> Message {
    let channels = data
        .iter()
        .enumerate()
        .filter(|&(_, &channel)| channel != NO_CHANNEL)
        .map(|(pin, &channel)| (pin as u8, channel))
        .collect();
    Message::AnalogMapping(AnalogMapping { channels })
}

fn decode_capability(data: &[u8]) -> Option<Message> {
    let mut pins = Vec::new();
    let mut current = PinCapability {
        pin: 0,
        ..Default::default()
    };
    let mut iter = data.iter();
    while let Some(&byte) = iter.next() {
        if byte == NO_CHANNEL {
            let pin = pins.len() as u8;
            pins.push(PinCapability { pin, ..current });
            current = PinCapability::default();
            continue;
        }
        let Some(&resolution) = iter.next() else {
            warn!("capability record truncated mid-pair, frame dropped");
            return None;
        };
        current.modes.insert(PinMode::from_byte(byte), resolution);
    }
    if !current.modes.is_empty() {
        warn!("capability response missing terminator for last pin, frame dropped");
        return None;
    }
    Some(Message::Capability(BoardCapability { pins }))
}

fn decode_pin_state(data: &[u8]) -> Option<Message> {
    if data.len() < 3 {
        warn!(len = data.len(), "pin-state reply shorter than 3 bytes, frame dropped");
        return None;
    }
    let value = data[2..]
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (u64::from(b & 0x7F) << (7 * i)));
    Some(Message::PinState(PinState {
        pin: data[0],
        mode: PinMode::from_byte(data[1]),
        value,
    }))
}

fn decode_string(data: &[u8]) -> Option<Message> {
    let units = match unpack_14bit_wide(data) {
        Ok(units) => units,
        Err(e) => {
            warn!(error = %e, "string payload not pairwise packed, frame dropped");
            return None;
        }
    };
    // Every 14-bit value is a valid Unicode scalar (0x3FFF < 0xD800).
    let text = units
        .into_iter()
        .map(|u| char::from_u32(u32::from(u)).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    Some(Message::StringData(text))
}

fn decode_i2c_reply(data: &[u8]) -> Option<Message> {
    if data.len() < 4 || data.len() % 2 != 0 {
        warn!(len = data.len(), "I2C reply malformed, frame dropped");
        return None;
    }
    let word = |lo: u8, hi: u8| u16::from(lo & 0x7F) | (u16::from(hi & 0x7F) << 7);
    let payload = match unpack_14bit(&data[4..]) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "I2C reply data not pairwise packed, frame dropped");
            return None;
        }
    };
    Some(Message::I2cReply(I2cReply {
        address: word(data[0], data[1]),
        register: word(data[2], data[3]),
        data: payload,
    }))
}

fn decode_firmware(data: &[u8]) -> Option<Message> {
    if data.len() < 2 {
        warn!(len = data.len(), "firmware reply shorter than 2 bytes, frame dropped");
        return None;
    }
    let name_bytes = match unpack_14bit(&data[2..]) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "firmware name not pairwise packed, frame dropped");
            return None;
        }
    };
    Some(Message::Firmware(Firmware {
        major: data[0],
        minor: data[1],
        name: String::from_utf8_lossy(&name_bytes).into_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(bytes: &[u8]) -> Vec<Message> {
        Framer::new().push_bytes(bytes)
    }

    #[test]
    fn analog_state_message() {
        let messages = parse_all(&[0xE3, 0x2A, 0x01]);
        assert_eq!(
            messages,
            vec![Message::Analog(AnalogState {
                channel: 3,
                level: 170
            })]
        );
    }

    #[test]
    fn digital_port_message() {
        let messages = parse_all(&[0x92, 0x55, 0x01]);
        assert_eq!(
            messages,
            vec![Message::DigitalPort(DigitalPortState {
                port: 2,
                pins: 213
            })]
        );
    }

    #[test]
    fn protocol_version_message() {
        let messages = parse_all(&[0xF9, 0x02, 0x05]);
        assert_eq!(
            messages,
            vec![Message::ProtocolVersion(ProtocolVersion {
                major: 2,
                minor: 5
            })]
        );
    }

    #[test]
    fn firmware_reply_decodes_name() {
        let messages = parse_all(&[
            0xF0, 0x79, 0x02, 0x05, 0x53, 0x00, 0x74, 0x00, 0x64, 0x00, 0xF7,
        ]);
        assert_eq!(
            messages,
            vec![Message::Firmware(Firmware {
                major: 2,
                minor: 5,
                name: "Std".into()
            })]
        );
    }

    #[test]
    fn capability_reply_decodes_per_pin_records() {
        let messages = parse_all(&[
            0xF0, 0x6C, 0x00, 0x01, 0x01, 0x01, 0x7F, 0x02, 0x0A, 0x7F, 0xF7,
        ]);
        let Some(Message::Capability(cap)) = messages.first() else {
            panic!("expected capability message, got {messages:?}");
        };
        assert_eq!(cap.pins.len(), 2);
        assert!(cap.pins[0].supports(PinMode::DigitalInput));
        assert!(cap.pins[0].supports(PinMode::DigitalOutput));
        assert!(!cap.pins[0].supports(PinMode::AnalogInput));
        assert_eq!(cap.pins[1].resolution(PinMode::AnalogInput), Some(10));
    }

    #[test]
    fn analog_mapping_skips_unmapped_pins() {
        let messages = parse_all(&[0xF0, 0x6A, 0x7F, 0x7F, 0x00, 0x01, 0xF7]);
        assert_eq!(
            messages,
            vec![Message::AnalogMapping(AnalogMapping {
                channels: vec![(2, 0), (3, 1)]
            })]
        );
    }

    #[test]
    fn pin_state_value_sums_7bit_groups() {
        let messages = parse_all(&[0xF0, 0x6E, 0x0D, 0x01, 0x45, 0x46, 0x04, 0xF7]);
        assert_eq!(
            messages,
            vec![Message::PinState(PinState {
                pin: 13,
                mode: PinMode::DigitalOutput,
                value: 0x12345
            })]
        );
    }

    #[test]
    fn pin_state_too_short_is_dropped() {
        assert!(parse_all(&[0xF0, 0x6E, 0x0D, 0x01, 0xF7]).is_empty());
    }

    #[test]
    fn i2c_reply_unpacks_address_register_data() {
        let messages = parse_all(&[
            0xF0, 0x77, 0x48, 0x00, 0x10, 0x00, 0x7F, 0x01, 0x02, 0x00, 0xF7,
        ]);
        assert_eq!(
            messages,
            vec![Message::I2cReply(I2cReply {
                address: 0x48,
                register: 0x10,
                data: vec![0xFF, 0x02]
            })]
        );
    }

    #[test]
    fn string_data_decodes_14bit_units() {
        let messages = parse_all(&[0xF0, 0x71, 0x48, 0x00, 0x69, 0x00, 0xF7]);
        assert_eq!(messages, vec![Message::StringData("Hi".into())]);
    }

    #[test]
    fn user_defined_sysex_passes_raw_payload() {
        let messages = parse_all(&[0xF0, 0x04, 0x01, 0x02, 0x03, 0xF7]);
        assert_eq!(
            messages,
            vec![Message::SysEx(SysExMessage {
                command: 0x04,
                payload: vec![0x01, 0x02, 0x03]
            })]
        );
    }

    #[test]
    fn unknown_sysex_surfaces_as_generic_message() {
        let messages = parse_all(&[0xF0, 0x55, 0x10, 0x20, 0xF7]);
        assert_eq!(
            messages,
            vec![Message::SysEx(SysExMessage {
                command: 0x55,
                payload: vec![0x10, 0x20]
            })]
        );
    }

    #[test]
    fn garbage_before_command_is_discarded() {
        // 0x47 looks like data in idle, the rest is a valid analog message.
        let messages = parse_all(&[0x47, 0x11, 0x22, 0xE3, 0x2A, 0x01]);
        assert_eq!(
            messages,
            vec![Message::Analog(AnalogState {
                channel: 3,
                level: 170
            })]
        );
    }

    #[test]
    fn unknown_command_byte_does_not_abort_parsing() {
        let messages = parse_all(&[0xFA, 0xE3, 0x2A, 0x01]);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn command_byte_abandons_partial_frame() {
        // Analog frame interrupted after one data byte by a fresh digital frame.
        let messages = parse_all(&[0xE3, 0x2A, 0x92, 0x55, 0x01]);
        assert_eq!(
            messages,
            vec![Message::DigitalPort(DigitalPortState {
                port: 2,
                pins: 213
            })]
        );
    }

    #[test]
    fn command_byte_abandons_partial_sysex() {
        let messages = parse_all(&[0xF0, 0x79, 0x02, 0xE3, 0x2A, 0x01]);
        assert_eq!(
            messages,
            vec![Message::Analog(AnalogState {
                channel: 3,
                level: 170
            })]
        );
    }

    #[test]
    fn oversized_sysex_is_discarded_and_parser_recovers() {
        let mut framer = Framer::new();
        framer.push_byte(0xF0);
        for _ in 0..(MAX_FRAME_SIZE + 10) {
            assert_eq!(framer.push_byte(0x01), None);
        }
        // Terminator of the poisoned frame lands in idle and is dropped.
        assert_eq!(framer.push_byte(0xF7), None);
        let messages = framer.push_bytes(&[0xE3, 0x2A, 0x01]);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn parser_inverts_the_command_encoder() {
        // The few host commands that share wire forms with device messages
        // must round-trip through the parser.
        let mut framer = Framer::new();
        let port_write = crate::commands::digital_port_write(2, 0xD5).unwrap();
        assert_eq!(
            framer.push_bytes(&port_write),
            vec![Message::DigitalPort(DigitalPortState {
                port: 2,
                pins: 0xD5
            })]
        );
        let analog_write = crate::commands::analog_write(3, 170).unwrap();
        assert_eq!(
            framer.push_bytes(&analog_write),
            vec![Message::Analog(AnalogState {
                channel: 3,
                level: 170
            })]
        );
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut framer = Framer::new();
        framer.push_bytes(&[0xE3, 0x2A]);
        framer.reset();
        // The pending data byte is now garbage in idle.
        assert_eq!(framer.push_byte(0x01), None);
    }
}
