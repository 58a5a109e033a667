//! serialport-backed transport implementation and port enumeration.

use std::sync::Mutex;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, instrument, warn};

use super::traits::{Transport, TransportError};
use crate::protocol::constants::DEFAULT_BAUD_RATE;

/// Read timeout for the receive thread's poll quantum. Short enough that
/// session shutdown is prompt, long enough to avoid spinning.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial-port transport.
///
/// The port is split into reader and writer halves (`try_clone`) so the
/// receive thread can block in `read_byte` while callers write. Each half
/// sits behind its own mutex; writes serialize on the writer lock.
pub struct SerialTransport {
    name: String,
    baud_rate: u32,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialTransport {
    /// Create an unopened transport for `name` at `baud_rate`.
    pub fn new(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Create an unopened transport at the generic default baud rate.
    pub fn with_default_baud(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_BAUD_RATE)
    }

    fn classify_open_error(&self, error: serialport::Error) -> TransportError {
        match error.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound {
                name: self.name.clone(),
            },
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::Unauthorized {
                    name: self.name.clone(),
                }
            }
            _ => TransportError::OpenFailed {
                name: self.name.clone(),
                message: error.to_string(),
            },
        }
    }
}

impl Transport for SerialTransport {
    #[instrument(level = "info", skip(self), fields(port = %self.name, baud = self.baud_rate))]
    fn open(&self) -> Result<(), TransportError> {
        let mut reader = self.reader.lock().unwrap();
        if reader.is_some() {
            return Err(TransportError::OpenFailed {
                name: self.name.clone(),
                message: "already open".into(),
            });
        }

        let mut port = serialport::new(&self.name, self.baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| self.classify_open_error(e))?;

        // Keep DTR asserted: opening toggles DTR, which resets Arduino-style
        // boards; holding it high keeps the link stable afterwards.
        if let Err(e) = port.write_data_terminal_ready(true) {
            debug!(error = %e, "could not assert DTR, continuing");
        }
        let _ = port.clear(serialport::ClearBuffer::All);

        let writer = port.try_clone().map_err(|e| TransportError::OpenFailed {
            name: self.name.clone(),
            message: e.to_string(),
        })?;

        info!("serial port opened");
        *reader = Some(port);
        *self.writer.lock().unwrap() = Some(writer);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        // Take the writer half first so no new bytes go out mid-close.
        let writer = self.writer.lock().unwrap().take();
        let reader = self.reader.lock().unwrap().take();
        if writer.is_some() || reader.is_some() {
            debug!(port = %self.name, "serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.reader.lock().unwrap().is_some()
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut guard = self.writer.lock().unwrap();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        Ok(data.len())
    }

    fn read_byte(&self) -> Result<Option<u8>, TransportError> {
        let mut guard = self.reader.lock().unwrap();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        let mut byte = [0u8; 1];
        match port.read(&mut byte) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(_) => Ok(Some(byte[0])),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(None)
            }
            Err(e) => Err(TransportError::ReadFailed(e.to_string())),
        }
    }

    fn bytes_to_read(&self) -> Result<u32, TransportError> {
        let guard = self.reader.lock().unwrap();
        let port = guard.as_ref().ok_or(TransportError::NotOpen)?;
        port.bytes_to_read()
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

/// List candidate serial device names, sorted.
///
/// Merges the serialport API results with a `/dev` scan on Unix, since some
/// ports (bluetooth bridges, symlinked adapters) are invisible to the API.
/// When any Linux-style UART name is present (`ttyS*`, `ttyUSB*`, `ttyACM*`)
/// only those are kept; otherwise anything under `/dev/tty*` is a candidate
/// except `ttyC*` and the process's own `/dev/tty`.
pub fn available_port_names() -> Vec<String> {
    let mut names: Vec<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.port_name)
        .collect();

    #[cfg(unix)]
    {
        if let Ok(entries) = std::fs::read_dir("/dev") {
            for entry in entries.flatten() {
                if let Some(file_name) = entry.file_name().to_str()
                    && file_name.starts_with("tty")
                {
                    names.push(format!("/dev/{file_name}"));
                }
            }
        }
        names = filter_tty_names(names);
    }

    names.sort();
    names.dedup();
    if names.is_empty() {
        warn!("no serial ports found");
    }
    names
}

#[cfg(unix)]
fn filter_tty_names(names: Vec<String>) -> Vec<String> {
    const UART_PREFIXES: [&str; 3] = ["ttyS", "ttyUSB", "ttyACM"];

    let is_uart = |name: &str| {
        let base = name.rsplit('/').next().unwrap_or(name);
        UART_PREFIXES.iter().any(|p| base.starts_with(p))
    };

    if names.iter().any(|n| is_uart(n)) {
        names.into_iter().filter(|n| is_uart(n)).collect()
    } else {
        names
            .into_iter()
            .filter(|n| {
                let base = n.rsplit('/').next().unwrap_or(n);
                base != "tty" && !base.starts_with("ttyC")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopened_transport_rejects_io() {
        let transport = SerialTransport::new("/dev/null-port", 57_600);
        assert!(!transport.is_open());
        assert!(matches!(
            transport.write(&[0xF9]),
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(
            transport.read_byte(),
            Err(TransportError::NotOpen)
        ));
        assert_eq!(transport.name(), "/dev/null-port");
        assert_eq!(transport.baud_rate(), 57_600);
    }

    #[test]
    fn close_is_idempotent() {
        let transport = SerialTransport::with_default_baud("/dev/null-port");
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn uart_names_shadow_generic_ttys() {
        let names = vec![
            "/dev/ttyUSB0".to_string(),
            "/dev/ttyACM1".to_string(),
            "/dev/tty.usbmodem1".to_string(),
        ];
        assert_eq!(
            filter_tty_names(names),
            vec!["/dev/ttyUSB0".to_string(), "/dev/ttyACM1".to_string()]
        );
    }

    #[cfg(unix)]
    #[test]
    fn without_uarts_console_devices_are_excluded() {
        let names = vec![
            "/dev/tty".to_string(),
            "/dev/ttyC0".to_string(),
            "/dev/tty.usbserial".to_string(),
        ];
        assert_eq!(
            filter_tty_names(names),
            vec!["/dev/tty.usbserial".to_string()]
        );
    }
}
