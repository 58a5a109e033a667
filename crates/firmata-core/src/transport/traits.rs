//! Transport layer abstraction.
//!
//! Defines the byte-oriented `Transport` trait the protocol engine consumes,
//! allowing different implementations (serialport, mock, etc.).
//!
//! All methods take `&self` with interior locking so a single
//! `Arc<dyn Transport>` can serve the receive thread and any number of
//! writer threads; `write` is the synchronization boundary between writers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("port not found: {name}")]
    PortNotFound { name: String },

    #[error("failed to open {name}: {message}")]
    OpenFailed { name: String, message: String },

    #[error("access to {name} denied (held by another process?)")]
    Unauthorized { name: String },

    #[error("port is not open")]
    NotOpen,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-oriented full-duplex connection to a device.
pub trait Transport: Send + Sync {
    /// Open the connection; opening an already-open transport is an error.
    fn open(&self) -> Result<(), TransportError>;

    /// Close the connection. Closing a closed transport is a no-op, so the
    /// session's dispose path stays idempotent.
    fn close(&self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Write bytes, serialized at byte granularity between callers.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read the next byte, blocking up to the transport's read timeout.
    /// `Ok(None)` means the timeout elapsed with nothing to read.
    fn read_byte(&self) -> Result<Option<u8>, TransportError>;

    /// Hint of how many bytes are pending.
    fn bytes_to_read(&self) -> Result<u32, TransportError>;

    /// Device name (e.g. "/dev/ttyACM0" or "COM3").
    fn name(&self) -> &str;

    fn baud_rate(&self) -> u32;
}
