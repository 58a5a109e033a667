//! Message fan-out and the reply-wait primitive.
//!
//! Every decoded message is delivered to the generic observer, then to the
//! typed subscriptions, then appended to a bounded queue that reply-waiters
//! scan under a mutex and condition variable. The condition is signalled on
//! every insert, so a waiter posted before its reply arrives cannot miss it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, mpsc};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};

use crate::events::{MessageObserver, Subscription};
use crate::protocol::message::{
    AnalogState, DigitalPortState, I2cReply, Message, ReceivedMessage,
};

/// Bound on undelivered messages retained for reply-waiters.
pub const QUEUE_CAPACITY: usize = 100;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for a matching message")]
    Timeout,
}

struct QueueState {
    messages: VecDeque<ReceivedMessage>,
    /// Bumped by `clear` so in-flight waiters give up instead of matching
    /// messages from a previous session generation.
    generation: u64,
}

/// Shared fan-out hub between the receive thread and caller threads.
pub struct Dispatcher {
    queue: Mutex<QueueState>,
    available: Condvar,
    /// Messages older than this are preferred for eviction when full;
    /// `None` (infinite session timeout) falls back to oldest-first.
    stale_after: Option<Duration>,
    observer: Mutex<Option<Box<dyn MessageObserver>>>,
    analog_senders: Mutex<Vec<mpsc::Sender<AnalogState>>>,
    digital_senders: Mutex<Vec<mpsc::Sender<DigitalPortState>>>,
    i2c_senders: Mutex<Vec<mpsc::Sender<I2cReply>>>,
    /// Suppresses per-message warnings after the first eviction burst.
    evicting: AtomicBool,
}

impl Dispatcher {
    pub fn new(stale_after: Option<Duration>) -> Self {
        Self {
            queue: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(QUEUE_CAPACITY),
                generation: 0,
            }),
            available: Condvar::new(),
            stale_after,
            observer: Mutex::new(None),
            analog_senders: Mutex::new(Vec::new()),
            digital_senders: Mutex::new(Vec::new()),
            i2c_senders: Mutex::new(Vec::new()),
            evicting: AtomicBool::new(false),
        }
    }

    /// Register the generic observer, replacing any previous one.
    pub fn set_observer(&self, observer: Box<dyn MessageObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    pub fn clear_observer(&self) {
        *self.observer.lock().unwrap() = None;
    }

    pub fn subscribe_analog(&self) -> Subscription<AnalogState> {
        let (sender, receiver) = mpsc::channel();
        self.analog_senders.lock().unwrap().push(sender);
        Subscription::new(receiver)
    }

    pub fn subscribe_digital(&self) -> Subscription<DigitalPortState> {
        let (sender, receiver) = mpsc::channel();
        self.digital_senders.lock().unwrap().push(sender);
        Subscription::new(receiver)
    }

    pub fn subscribe_i2c(&self) -> Subscription<I2cReply> {
        let (sender, receiver) = mpsc::channel();
        self.i2c_senders.lock().unwrap().push(sender);
        Subscription::new(receiver)
    }

    /// Fan a decoded message out to the observer, typed subscribers, and the
    /// reply-wait queue. Called from the receive thread only.
    pub fn dispatch(&self, message: Message) {
        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer.on_message(&message);
        }

        match &message {
            Message::Analog(state) => forward(&self.analog_senders, *state),
            Message::DigitalPort(state) => forward(&self.digital_senders, *state),
            Message::I2cReply(reply) => forward(&self.i2c_senders, reply.clone()),
            _ => {}
        }

        let mut queue = self.queue.lock().unwrap();
        if queue.messages.len() >= QUEUE_CAPACITY {
            self.evict_one(&mut queue.messages);
        }
        queue.messages.push_back(ReceivedMessage::new(message));
        drop(queue);
        self.available.notify_all();
    }

    /// Evict to make room: the oldest stale message first, the oldest
    /// unconditionally when nothing is stale. Keeps memory bounded under
    /// bursty telemetry while recent replies survive.
    fn evict_one(&self, messages: &mut VecDeque<ReceivedMessage>) {
        let victim = self
            .stale_after
            .and_then(|stale| {
                messages
                    .iter()
                    .position(|m| m.received_at.elapsed() > stale)
            })
            .unwrap_or(0);
        if let Some(evicted) = messages.remove(victim) {
            if !self.evicting.swap(true, Ordering::Relaxed) {
                debug!(
                    kind = evicted.message.kind(),
                    "reply queue full, evicting"
                );
            }
        }
    }

    /// Atomically take the first queued message `extract` accepts, or block
    /// until one arrives or the deadline passes.
    pub fn wait_map<T>(
        &self,
        extract: impl Fn(&Message) -> Option<T>,
        timeout: Option<Duration>,
    ) -> Result<T, WaitError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = self.queue.lock().unwrap();
        let generation = queue.generation;

        loop {
            if let Some(index) = queue
                .messages
                .iter()
                .position(|m| extract(&m.message).is_some())
            {
                let received = queue.messages.remove(index).expect("index in bounds");
                trace!(kind = received.message.kind(), "reply matched");
                return extract(&received.message).ok_or(WaitError::Timeout);
            }

            if queue.generation != generation {
                // The session was cleared underneath us.
                return Err(WaitError::Timeout);
            }

            queue = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::Timeout);
                    }
                    self.available
                        .wait_timeout(queue, deadline - now)
                        .unwrap()
                        .0
                }
                None => self.available.wait(queue).unwrap(),
            };
        }
    }

    /// Reply-wait with a plain predicate.
    pub fn wait_for(
        &self,
        predicate: impl Fn(&Message) -> bool,
        timeout: Option<Duration>,
    ) -> Result<Message, WaitError> {
        self.wait_map(
            |m| if predicate(m) { Some(m.clone()) } else { None },
            timeout,
        )
    }

    /// Drop all queued messages and release in-flight waiters.
    pub fn clear(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.messages.clear();
        queue.generation += 1;
        self.evicting.store(false, Ordering::Relaxed);
        drop(queue);
        self.available.notify_all();
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().unwrap().messages.len()
    }
}

/// Send to every live subscriber, pruning the ones whose receiver is gone.
fn forward<T: Clone>(senders: &Mutex<Vec<mpsc::Sender<T>>>, value: T) {
    senders
        .lock()
        .unwrap()
        .retain(|sender| sender.send(value.clone()).is_ok());
}
