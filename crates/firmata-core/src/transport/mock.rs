//! Mock transport for testing the protocol engine without hardware.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::traits::{Transport, TransportError};

type Responder = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync;

/// In-memory transport: scripted device bytes, captured host writes.
pub struct MockTransport {
    name: String,
    baud_rate: u32,
    /// Bytes the "device" has emitted, drained by `read_byte`.
    rx_queue: Mutex<VecDeque<u8>>,
    /// Captured writes, one entry per `write` call.
    write_log: Mutex<Vec<Vec<u8>>>,
    open: Mutex<bool>,
    /// When set, `open` fails with this outcome.
    open_failure: Mutex<Option<OpenFailure>>,
    /// Optional device behavior: maps each written frame to reply bytes.
    responder: Mutex<Option<Box<Responder>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailure {
    Unauthorized,
    NotFound,
}

impl MockTransport {
    pub fn new(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            rx_queue: Mutex::new(VecDeque::new()),
            write_log: Mutex::new(Vec::new()),
            open: Mutex::new(false),
            open_failure: Mutex::new(None),
            responder: Mutex::new(None),
        }
    }

    /// Queue bytes to be returned by subsequent `read_byte` calls.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.rx_queue.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Script device behavior: every written frame is passed to `respond`,
    /// whose result is queued as incoming bytes.
    pub fn set_responder(&self, respond: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) {
        *self.responder.lock().unwrap() = Some(Box::new(respond));
    }

    /// Make the next `open` call fail.
    pub fn fail_open_with(&self, failure: OpenFailure) {
        *self.open_failure.lock().unwrap() = Some(failure);
    }

    /// All captured writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes flattened into one byte stream.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.write_log.lock().unwrap().concat()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }
}

impl Transport for MockTransport {
    fn open(&self) -> Result<(), TransportError> {
        match self.open_failure.lock().unwrap().take() {
            Some(OpenFailure::Unauthorized) => {
                return Err(TransportError::Unauthorized {
                    name: self.name.clone(),
                });
            }
            Some(OpenFailure::NotFound) => {
                return Err(TransportError::PortNotFound {
                    name: self.name.clone(),
                });
            }
            None => {}
        }
        *self.open.lock().unwrap() = true;
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        *self.open.lock().unwrap() = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        *self.open.lock().unwrap()
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        if let Some(respond) = self.responder.lock().unwrap().as_ref() {
            let reply = respond(data);
            self.rx_queue.lock().unwrap().extend(reply);
        }
        Ok(data.len())
    }

    fn read_byte(&self) -> Result<Option<u8>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        match self.rx_queue.lock().unwrap().pop_front() {
            Some(byte) => Ok(Some(byte)),
            None => {
                // Model the serial read timeout so the receive loop does not
                // spin against an empty queue.
                std::thread::sleep(Duration::from_millis(2));
                Ok(None)
            }
        }
    }

    fn bytes_to_read(&self) -> Result<u32, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        Ok(self.rx_queue.lock().unwrap().len() as u32)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_bytes_come_back_in_order() {
        let mock = MockTransport::new("mock0", 57_600);
        mock.open().unwrap();
        mock.queue_bytes(&[0xF9, 0x02, 0x05]);

        assert_eq!(mock.read_byte().unwrap(), Some(0xF9));
        assert_eq!(mock.read_byte().unwrap(), Some(0x02));
        assert_eq!(mock.read_byte().unwrap(), Some(0x05));
        assert_eq!(mock.read_byte().unwrap(), None);
    }

    #[test]
    fn writes_are_captured() {
        let mock = MockTransport::new("mock0", 57_600);
        mock.open().unwrap();
        mock.write(&[0xF0, 0x79, 0xF7]).unwrap();
        mock.write(&[0xFF]).unwrap();

        assert_eq!(mock.writes().len(), 2);
        assert_eq!(mock.written_bytes(), vec![0xF0, 0x79, 0xF7, 0xFF]);
    }

    #[test]
    fn responder_queues_reply_bytes() {
        let mock = MockTransport::new("mock0", 57_600);
        mock.open().unwrap();
        mock.set_responder(|frame| {
            if frame == [0xF9] {
                vec![0xF9, 0x02, 0x05]
            } else {
                Vec::new()
            }
        });

        mock.write(&[0xF9]).unwrap();
        assert_eq!(mock.bytes_to_read().unwrap(), 3);
    }

    #[test]
    fn closed_mock_rejects_io() {
        let mock = MockTransport::new("mock0", 57_600);
        assert!(matches!(mock.write(&[0x00]), Err(TransportError::NotOpen)));
        assert!(matches!(mock.read_byte(), Err(TransportError::NotOpen)));
    }

    #[test]
    fn scripted_open_failure() {
        let mock = MockTransport::new("mock0", 57_600);
        mock.fail_open_with(OpenFailure::Unauthorized);
        assert!(matches!(
            mock.open(),
            Err(TransportError::Unauthorized { .. })
        ));
        // Failure is consumed; the next open succeeds.
        assert!(mock.open().is_ok());
    }
}
