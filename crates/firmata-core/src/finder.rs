//! Device discovery - probe serial ports and baud rates for a live device.
//!
//! For each candidate port the finder walks an ordered baud-rate list,
//! stands up a short-lived session, and asks for the firmware report. A
//! device that answers with a 2.x-or-newer firmware wins; everything else
//! is disposed and the probe moves on.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::session::{FirmataSession, SessionConfig, SessionError};
use crate::transport::serial::available_port_names;
use crate::transport::{SerialTransport, Transport, TransportError};

/// Baud rates tried first; StandardFirmata overwhelmingly ships at 57600.
pub const PRIMARY_BAUD_RATES: &[u32] = &[57_600, 115_200, 9_600];

/// Fallback rates for older or reconfigured firmware.
pub const SECONDARY_BAUD_RATES: &[u32] = &[28_800, 14_400, 38_400, 31_250, 4_800, 2_400];

/// Configuration for a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinderConfig {
    /// Baud rates to try per device, in order.
    pub baud_rates: Vec<u32>,
    /// Reply-wait bound for each probe attempt, in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Delay after opening a port before probing, for boards that
    /// auto-reset on open.
    pub startup_delay_ms: u64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            baud_rates: PRIMARY_BAUD_RATES
                .iter()
                .chain(SECONDARY_BAUD_RATES)
                .copied()
                .collect(),
            attempt_timeout_ms: 1_000,
            startup_delay_ms: 0,
        }
    }
}

type TransportFactory = dyn Fn(&str, u32) -> Arc<dyn Transport> + Send + Sync;
type AvailabilityPredicate = dyn Fn(&FirmataSession) -> Result<bool, SessionError> + Send + Sync;

/// Probes candidate (port, baud) pairs and returns the first live session.
pub struct SessionFinder {
    config: FinderConfig,
    factory: Box<TransportFactory>,
    predicate: Box<AvailabilityPredicate>,
}

impl Default for SessionFinder {
    fn default() -> Self {
        Self::new(FinderConfig::default())
    }
}

impl SessionFinder {
    pub fn new(config: FinderConfig) -> Self {
        Self {
            config,
            factory: Box::new(|name, baud| Arc::new(SerialTransport::new(name, baud))),
            predicate: Box::new(firmware_is_available),
        }
    }

    /// Replace how transports are built, e.g. with mocks in tests.
    pub fn with_factory(
        mut self,
        factory: impl Fn(&str, u32) -> Arc<dyn Transport> + Send + Sync + 'static,
    ) -> Self {
        self.factory = Box::new(factory);
        self
    }

    /// Replace the availability check run against each candidate session.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&FirmataSession) -> Result<bool, SessionError> + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Box::new(predicate);
        self
    }

    /// Probe all enumerated serial ports, most recently enumerated first.
    pub fn find(&self) -> Option<FirmataSession> {
        let mut names = available_port_names();
        names.reverse();
        self.find_among(names)
    }

    /// Probe the given device names in the given order.
    #[instrument(level = "info", skip_all)]
    pub fn find_among<I>(&self, names: I) -> Option<FirmataSession>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            for &baud in &self.config.baud_rates {
                match self.probe(name, baud) {
                    ProbeOutcome::Found(session) => {
                        info!(port = name, baud, "device found");
                        return Some(session);
                    }
                    ProbeOutcome::NextBaud => {}
                    ProbeOutcome::SkipDevice => break,
                }
            }
        }
        None
    }

    fn probe(&self, name: &str, baud: u32) -> ProbeOutcome {
        debug!(port = name, baud, "probing");
        let transport = (self.factory)(name, baud);
        let config = SessionConfig::with_timeout_ms(self.config.attempt_timeout_ms);

        let session = match FirmataSession::open(transport, config) {
            Ok(session) => session,
            Err(SessionError::Transport(TransportError::Unauthorized { .. })) => {
                // Another process holds the port; no baud rate will help.
                warn!(port = name, "port access denied, skipping device");
                return ProbeOutcome::SkipDevice;
            }
            Err(SessionError::Transport(TransportError::PortNotFound { .. })) => {
                debug!(port = name, "port vanished, skipping device");
                return ProbeOutcome::SkipDevice;
            }
            Err(e) => {
                debug!(port = name, baud, error = %e, "open failed");
                return ProbeOutcome::NextBaud;
            }
        };

        if self.config.startup_delay_ms > 0 {
            // Boards that reset when the port opens need time to boot.
            std::thread::sleep(Duration::from_millis(self.config.startup_delay_ms));
        }

        match (self.predicate)(&session) {
            Ok(true) => ProbeOutcome::Found(session),
            Ok(false) => {
                debug!(port = name, baud, "device answered but is not acceptable");
                ProbeOutcome::NextBaud
            }
            Err(SessionError::Timeout { .. }) => {
                debug!(port = name, baud, "probe timed out");
                ProbeOutcome::NextBaud
            }
            Err(SessionError::Transport(TransportError::Unauthorized { .. })) => {
                ProbeOutcome::SkipDevice
            }
            Err(e) => {
                warn!(port = name, baud, error = %e, "probe failed");
                ProbeOutcome::NextBaud
            }
        }
        // A rejected session drops here, disposing its transport.
    }
}

enum ProbeOutcome {
    Found(FirmataSession),
    NextBaud,
    SkipDevice,
}

/// Default availability check: the device reports a Firmata-2.x-or-newer
/// firmware within the attempt timeout.
fn firmware_is_available(session: &FirmataSession) -> Result<bool, SessionError> {
    let firmware = session.query_firmware()?;
    Ok(firmware.major >= 2)
}
