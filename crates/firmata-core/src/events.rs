//! Event delivery for decoded messages.
//!
//! Two complementary mechanisms, so hosts can pick what fits:
//!
//! - a generic [`MessageObserver`] invoked on the receive thread for every
//!   decoded message (keep implementations quick);
//! - channel-backed [`Subscription`]s for a single message kind, consumed
//!   at the subscriber's own pace and cancelled by dropping.

use std::sync::mpsc;
use std::time::Duration;

use crate::protocol::message::Message;

/// Observer invoked for every decoded message.
///
/// Implement this in a host layer to watch the raw message flow.
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, message: &Message);
}

/// No-op observer that discards all messages.
pub struct NullObserver;

impl MessageObserver for NullObserver {
    fn on_message(&self, _message: &Message) {}
}

/// Observer that logs every message through tracing.
pub struct TracingObserver;

impl MessageObserver for TracingObserver {
    fn on_message(&self, message: &Message) {
        match message {
            Message::Analog(state) => {
                tracing::trace!(channel = state.channel, level = state.level, "analog state");
            }
            Message::DigitalPort(state) => {
                tracing::trace!(
                    port = state.port,
                    pins = format!("{:08b}", state.pins),
                    "digital port state"
                );
            }
            Message::ProtocolVersion(version) => {
                tracing::info!(version = %version, "protocol version");
            }
            Message::Firmware(firmware) => {
                tracing::info!(firmware = %firmware, "firmware report");
            }
            Message::StringData(text) => {
                tracing::info!(text = %text, "device string");
            }
            Message::I2cReply(reply) => {
                tracing::debug!(
                    address = reply.address,
                    register = reply.register,
                    len = reply.data.len(),
                    "I2C reply"
                );
            }
            other => {
                tracing::debug!(kind = other.kind(), "message received");
            }
        }
    }
}

/// Receiving end of a typed event stream.
///
/// Created by the session's subscription factories; every matching event
/// arrives until the subscription is dropped or the session goes away.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// Block until the next event; `None` once the session is gone.
    pub fn recv(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Block up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Take an event if one is already queued.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Iterate over events, blocking between them.
    pub fn iter(&self) -> mpsc::Iter<'_, T> {
        self.receiver.iter()
    }
}
