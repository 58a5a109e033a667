//! Firmata session - binds a transport to the protocol engine.
//!
//! The session owns one receive thread that pulls bytes from the transport,
//! drives the [`Framer`], and hands decoded messages to the [`Dispatcher`].
//! Caller threads encode commands, write them, and block on the dispatcher's
//! reply-wait when an answer is expected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::commands;
use crate::commands::CommandError;
use crate::dispatcher::Dispatcher;
use crate::events::{MessageObserver, Subscription};
use crate::protocol::Framer;
use crate::protocol::message::{
    AnalogMapping, AnalogState, BoardCapability, DigitalPortState, Firmware, I2cReply, Message,
    PinMode, PinState, ProtocolVersion,
};
use crate::transport::{Transport, TransportError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("timed out waiting for {expecting}")]
    Timeout { expecting: &'static str },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Configuration for a Firmata session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Reply-wait bound in milliseconds; `None` waits forever.
    pub timeout_ms: Option<u64>,
    /// When set, sent to the device right after the session opens.
    pub sampling_interval_ms: Option<u16>,
}

impl SessionConfig {
    /// Session with the given reply timeout.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(std::io::Error::other)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A live connection to a Firmata device.
///
/// Single-use: once disposed, build a new session. Dropping the session
/// disposes it, closing the transport only if the session opened it.
pub struct FirmataSession {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    config: SessionConfig,
    owns_transport: bool,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl FirmataSession {
    /// Bind a session to `transport`, opening it if the caller has not.
    ///
    /// A transport opened here is owned by the session and closed on
    /// dispose; one opened by the caller is left open.
    pub fn open(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let owns_transport = if transport.is_open() {
            false
        } else {
            transport.open()?;
            true
        };

        let mut session = Self {
            dispatcher: Arc::new(Dispatcher::new(config.timeout())),
            transport,
            config,
            owns_transport,
            running: Arc::new(AtomicBool::new(false)),
            receiver: None,
        };
        session.spawn_receiver();

        if let Some(interval) = session.config.sampling_interval_ms {
            session.set_sampling_interval(interval)?;
        }

        info!(
            port = session.transport.name(),
            baud = session.transport.baud_rate(),
            "session started"
        );
        Ok(session)
    }

    fn spawn_receiver(&mut self) {
        let transport = Arc::clone(&self.transport);
        let dispatcher = Arc::clone(&self.dispatcher);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        self.receiver = Some(thread::spawn(move || {
            let mut framer = Framer::new();
            while running.load(Ordering::SeqCst) && transport.is_open() {
                match transport.read_byte() {
                    Ok(Some(byte)) => {
                        if let Some(message) = framer.push_byte(byte) {
                            dispatcher.dispatch(message);
                        }
                    }
                    Ok(None) => {} // read timeout, poll again
                    Err(TransportError::NotOpen) | Err(TransportError::Disconnected) => break,
                    Err(e) => {
                        // Transient read errors must not kill the thread;
                        // log and keep pulling bytes.
                        warn!(error = %e, "receive error, retrying");
                        thread::sleep(Duration::from_millis(50));
                    }
                }
            }
            debug!("receive thread exiting");
        }));
    }

    fn stop_receiver(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }

    fn send(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.transport.write(bytes)?;
        Ok(())
    }

    fn timeout_err(
        &self,
        expecting: &'static str,
    ) -> impl FnOnce(crate::dispatcher::WaitError) -> SessionError {
        move |_| SessionError::Timeout { expecting }
    }

    // ------------------------------------------------------------------
    // Fire-and-forget commands
    // ------------------------------------------------------------------

    /// Reset the device to its power-up state.
    pub fn reset_device(&self) -> Result<(), SessionError> {
        self.send(&commands::system_reset())
    }

    /// Drive a digital pin high or low.
    pub fn digital_write(&self, pin: u8, high: bool) -> Result<(), SessionError> {
        self.send(&commands::digital_write(pin, high)?)
    }

    /// Write an analog level to a pin.
    pub fn analog_write(&self, pin: u8, value: u32) -> Result<(), SessionError> {
        self.send(&commands::analog_write(pin, value)?)
    }

    /// Enable or disable analog reporting for a channel.
    pub fn report_analog(&self, channel: u8, enabled: bool) -> Result<(), SessionError> {
        self.send(&commands::report_analog(channel, enabled)?)
    }

    /// Enable or disable digital reporting for a port.
    pub fn report_digital(&self, port: u8, enabled: bool) -> Result<(), SessionError> {
        self.send(&commands::report_digital(port, enabled)?)
    }

    /// Set all eight pins of a port from a bitmap.
    pub fn digital_port_write(&self, port: u8, pins: u8) -> Result<(), SessionError> {
        self.send(&commands::digital_port_write(port, pins)?)
    }

    /// Assign a mode to a pin.
    pub fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<(), SessionError> {
        self.send(&commands::set_pin_mode(pin, mode)?)
    }

    /// Set the device's sampling interval.
    pub fn set_sampling_interval(&self, interval_ms: u16) -> Result<(), SessionError> {
        self.send(&commands::sampling_interval(interval_ms)?)
    }

    /// Configure a servo's pulse range.
    pub fn servo_config(
        &self,
        pin: u8,
        min_pulse: u16,
        max_pulse: u16,
    ) -> Result<(), SessionError> {
        self.send(&commands::servo_config(pin, min_pulse, max_pulse)?)
    }

    /// Send text to the device.
    pub fn string_write(&self, text: &str) -> Result<(), SessionError> {
        self.send(&commands::string_write(text)?)
    }

    /// Set the delay between continuous I2C reads.
    pub fn i2c_config(&self, interval_us: u16) -> Result<(), SessionError> {
        self.send(&commands::i2c_config(interval_us)?)
    }

    /// Write bytes to an I2C peripheral.
    pub fn i2c_write(&self, address: u16, data: &[u8]) -> Result<(), SessionError> {
        self.send(&commands::i2c_write(address, data)?)
    }

    /// Start a one-shot or continuous I2C read; replies arrive as
    /// [`Message::I2cReply`] events (see [`FirmataSession::i2c_events`]).
    pub fn i2c_read(
        &self,
        address: u16,
        register: Option<u16>,
        count: u16,
        continuous: bool,
    ) -> Result<(), SessionError> {
        self.send(&commands::i2c_read(address, register, count, continuous)?)
    }

    /// Stop every continuous I2C read.
    pub fn i2c_stop_reading(&self) -> Result<(), SessionError> {
        self.send(&commands::i2c_stop_reading())
    }

    /// Send an arbitrary SysEx message.
    pub fn send_sysex(&self, command: u8, payload: &[u8]) -> Result<(), SessionError> {
        self.send(&commands::send_sysex(command, payload)?)
    }

    // ------------------------------------------------------------------
    // Request senders (the non-blocking half of each query)
    // ------------------------------------------------------------------

    /// Ask for the protocol version without waiting; pair with an observer
    /// or [`FirmataSession::query_protocol_version`] to consume the reply.
    pub fn request_protocol_version(&self) -> Result<(), SessionError> {
        self.send(&commands::request_protocol_version())
    }

    pub fn request_firmware(&self) -> Result<(), SessionError> {
        self.send(&commands::request_firmware())
    }

    pub fn request_capability(&self) -> Result<(), SessionError> {
        self.send(&commands::request_capability())
    }

    pub fn request_analog_mapping(&self) -> Result<(), SessionError> {
        self.send(&commands::request_analog_mapping())
    }

    pub fn request_pin_state(&self, pin: u8) -> Result<(), SessionError> {
        self.send(&commands::request_pin_state(pin)?)
    }

    // ------------------------------------------------------------------
    // Synchronous queries (request + reply-wait)
    // ------------------------------------------------------------------

    /// Query the wire-protocol version, blocking up to the session timeout.
    pub fn query_protocol_version(&self) -> Result<ProtocolVersion, SessionError> {
        self.request_protocol_version()?;
        self.dispatcher
            .wait_map(
                |m| match m {
                    Message::ProtocolVersion(v) => Some(*v),
                    _ => None,
                },
                self.config.timeout(),
            )
            .map_err(self.timeout_err("protocol version"))
    }

    /// Query the firmware name and version.
    pub fn query_firmware(&self) -> Result<Firmware, SessionError> {
        self.request_firmware()?;
        self.dispatcher
            .wait_map(
                |m| match m {
                    Message::Firmware(fw) => Some(fw.clone()),
                    _ => None,
                },
                self.config.timeout(),
            )
            .map_err(self.timeout_err("firmware report"))
    }

    /// Query the capabilities of every pin.
    pub fn query_capability(&self) -> Result<BoardCapability, SessionError> {
        self.request_capability()?;
        self.dispatcher
            .wait_map(
                |m| match m {
                    Message::Capability(c) => Some(c.clone()),
                    _ => None,
                },
                self.config.timeout(),
            )
            .map_err(self.timeout_err("capability report"))
    }

    /// Query the pin-to-analog-channel mapping.
    pub fn query_analog_mapping(&self) -> Result<AnalogMapping, SessionError> {
        self.request_analog_mapping()?;
        self.dispatcher
            .wait_map(
                |m| match m {
                    Message::AnalogMapping(map) => Some(map.clone()),
                    _ => None,
                },
                self.config.timeout(),
            )
            .map_err(self.timeout_err("analog mapping"))
    }

    /// Query one pin's current mode and value.
    pub fn query_pin_state(&self, pin: u8) -> Result<PinState, SessionError> {
        self.request_pin_state(pin)?;
        self.dispatcher
            .wait_map(
                |m| match m {
                    Message::PinState(state) if state.pin == pin => Some(*state),
                    _ => None,
                },
                self.config.timeout(),
            )
            .map_err(self.timeout_err("pin state"))
    }

    /// Block until any message matching `predicate` arrives.
    pub fn wait_for(
        &self,
        predicate: impl Fn(&Message) -> bool,
        timeout: Option<Duration>,
    ) -> Result<Message, SessionError> {
        self.dispatcher
            .wait_for(predicate, timeout)
            .map_err(self.timeout_err("matching message"))
    }

    // ------------------------------------------------------------------
    // Event delivery
    // ------------------------------------------------------------------

    /// Register the generic observer, replacing any previous one. It runs
    /// on the receive thread for every decoded message.
    pub fn set_message_observer(&self, observer: Box<dyn MessageObserver>) {
        self.dispatcher.set_observer(observer);
    }

    pub fn clear_message_observer(&self) {
        self.dispatcher.clear_observer();
    }

    /// Long-lived stream of analog samples; drop it to unsubscribe.
    pub fn analog_events(&self) -> Subscription<AnalogState> {
        self.dispatcher.subscribe_analog()
    }

    /// Long-lived stream of digital port changes.
    pub fn digital_events(&self) -> Subscription<DigitalPortState> {
        self.dispatcher.subscribe_digital()
    }

    /// Long-lived stream of I2C replies.
    pub fn i2c_events(&self) -> Subscription<I2cReply> {
        self.dispatcher.subscribe_i2c()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drop all buffered state and restart the link: the transport is
    /// closed and reopened, queued messages and pending reply-waiters are
    /// discarded, and the parser starts fresh.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        debug!(port = self.transport.name(), "clearing session");
        self.stop_receiver();
        self.transport.close()?;
        self.dispatcher.clear();
        self.transport.open()?;
        self.spawn_receiver();
        Ok(())
    }

    /// Detach from the transport. Closes it only if this session opened
    /// it; safe to call more than once.
    pub fn dispose(&mut self) {
        self.stop_receiver();
        self.dispatcher.clear();
        if self.owns_transport
            && self.transport.is_open()
            && let Err(e) = self.transport.close()
        {
            warn!(error = %e, "error closing transport on dispose");
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for FirmataSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::DISCOVERY_BAUD_RATE;
    use crate::transport::MockTransport;
    use std::time::Instant;

    const FIRMWARE_REPLY: &[u8] = &[
        0xF0, 0x79, 0x02, 0x05, 0x53, 0x00, 0x74, 0x00, 0x64, 0x00, 0xF7,
    ];

    fn mock() -> Arc<MockTransport> {
        Arc::new(MockTransport::new("mock0", DISCOVERY_BAUD_RATE))
    }

    fn open_session(transport: &Arc<MockTransport>, timeout_ms: u64) -> FirmataSession {
        FirmataSession::open(
            Arc::clone(transport) as Arc<dyn Transport>,
            SessionConfig::with_timeout_ms(timeout_ms),
        )
        .unwrap()
    }

    #[test]
    fn session_opens_and_owns_closed_transport() {
        let transport = mock();
        let session = open_session(&transport, 100);
        assert!(transport.is_open());
        drop(session);
        // Session opened it, so dispose closed it.
        assert!(!transport.is_open());
    }

    #[test]
    fn session_leaves_borrowed_transport_open() {
        let transport = mock();
        transport.open().unwrap();
        let session = open_session(&transport, 100);
        drop(session);
        assert!(transport.is_open());
    }

    #[test]
    fn firmware_query_round_trip() {
        let transport = mock();
        transport.set_responder(|frame| {
            if frame == [0xF0, 0x79, 0xF7] {
                FIRMWARE_REPLY.to_vec()
            } else {
                Vec::new()
            }
        });

        let session = open_session(&transport, 2000);
        let firmware = session.query_firmware().unwrap();
        assert_eq!(firmware.major, 2);
        assert_eq!(firmware.minor, 5);
        assert_eq!(firmware.name, "Std");
    }

    #[test]
    fn protocol_version_query_round_trip() {
        let transport = mock();
        transport.set_responder(|frame| {
            if frame == [0xF9] {
                vec![0xF9, 0x02, 0x05]
            } else {
                Vec::new()
            }
        });

        let session = open_session(&transport, 2000);
        let version = session.query_protocol_version().unwrap();
        assert_eq!((version.major, version.minor), (2, 5));
    }

    #[test]
    fn pin_state_query_matches_requested_pin() {
        let transport = mock();
        transport.set_responder(|frame| {
            if frame.starts_with(&[0xF0, 0x6D]) {
                // Reply for a different pin first, then the right one.
                vec![
                    0xF0, 0x6E, 0x02, 0x01, 0x01, 0xF7, // pin 2
                    0xF0, 0x6E, 0x0D, 0x01, 0x01, 0xF7, // pin 13
                ]
            } else {
                Vec::new()
            }
        });

        let session = open_session(&transport, 2000);
        let state = session.query_pin_state(13).unwrap();
        assert_eq!(state.pin, 13);
        assert_eq!(state.mode, PinMode::DigitalOutput);
        assert_eq!(state.value, 1);
    }

    #[test]
    fn query_times_out_when_device_is_silent() {
        let transport = mock();
        let session = open_session(&transport, 50);

        let start = Instant::now();
        let result = session.query_firmware();
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(SessionError::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed <= Duration::from_millis(200));
    }

    #[test]
    fn encode_failure_writes_nothing() {
        let transport = mock();
        let session = open_session(&transport, 100);
        transport.clear_writes();

        assert!(session.digital_write(200, true).is_err());
        assert!(session.report_analog(16, true).is_err());
        assert!(session.servo_config(9, 100, 50).is_err());
        assert!(transport.written_bytes().is_empty());
    }

    #[test]
    fn telemetry_reaches_subscribers() {
        let transport = mock();
        let session = open_session(&transport, 1000);
        let analog = session.analog_events();
        let digital = session.digital_events();

        transport.queue_bytes(&[0xE3, 0x2A, 0x01, 0x92, 0x55, 0x01]);

        let sample = analog.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((sample.channel, sample.level), (3, 170));
        let port = digital.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((port.port, port.pins), (2, 213));
    }

    #[test]
    fn i2c_reply_reaches_subscriber() {
        let transport = mock();
        let session = open_session(&transport, 1000);
        let replies = session.i2c_events();

        transport.queue_bytes(&[
            0xF0, 0x77, 0x48, 0x00, 0x10, 0x00, 0x7F, 0x01, 0xF7,
        ]);

        let reply = replies.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(reply.address, 0x48);
        assert_eq!(reply.register, 0x10);
        assert_eq!(reply.data, vec![0xFF]);
    }

    #[test]
    fn clear_drops_queued_messages_and_restarts() {
        let transport = mock();
        let mut session = open_session(&transport, 100);

        transport.queue_bytes(&[0xF9, 0x02, 0x05]);
        // Give the receive thread a moment to queue the message.
        std::thread::sleep(Duration::from_millis(50));

        session.clear().unwrap();
        assert!(transport.is_open());

        // The old version report is gone; a fresh query times out.
        assert!(matches!(
            session.query_protocol_version(),
            Err(SessionError::Timeout { .. })
        ));
    }

    #[test]
    fn dispose_is_idempotent() {
        let transport = mock();
        let mut session = open_session(&transport, 100);
        session.dispose();
        session.dispose();
        assert!(!transport.is_open());
    }

    #[test]
    fn commands_reach_the_wire_in_order() {
        let transport = mock();
        let session = open_session(&transport, 100);
        transport.clear_writes();

        session.set_pin_mode(13, PinMode::DigitalOutput).unwrap();
        session.digital_write(13, true).unwrap();
        session.report_digital(1, true).unwrap();

        assert_eq!(
            transport.writes(),
            vec![
                vec![0xF4, 13, 0x01],
                vec![0xF5, 13, 0x01],
                vec![0xD1, 0x01],
            ]
        );
    }
}
