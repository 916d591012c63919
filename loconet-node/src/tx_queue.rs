//! Outgoing message queue
//!
//! Messages wait in priority order until the bus is free. At most one message is in flight at a
//! time; it keeps a cursor of bytes handed to the channel and a cursor of bytes seen echoed back
//! from the bus. If a collision is detected the in-flight message goes back to the front of the
//! queue and is sent again from the first byte.
use core::cell::RefCell;

use critical_section::Mutex;
use defmt_or_log::warn;
use heapless::Vec;
use loconet_common::{
    lncv::AckCode,
    messages::{Message, MessageError},
};
use snafu::{ResultExt as _, Snafu};

/// Default number of messages which can be held, including the one in flight
pub const TX_QUEUE_DEPTH: usize = 8;

/// Queue priority used for LNCV responses and acknowledgements
pub const RESPONSE_PRIORITY: u8 = 1;

/// Errors when queueing a message
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum TxError {
    /// No room left in the queue
    #[snafu(display("Transmit queue is full"))]
    QueueFull,
    /// The message could not be built
    #[snafu(display("Invalid message: {source}"))]
    InvalidMessage {
        /// The underlying error
        source: MessageError,
    },
}

/// Something messages can be queued on
///
/// Message handlers get one of these to send responses.
pub trait MessageSink {
    /// Queue a complete message
    ///
    /// Lower `priority` values are sent first.
    fn enqueue(&self, priority: u8, message: Message) -> Result<(), TxError>;

    /// Build and queue a message from an opcode and payload
    fn send(&self, priority: u8, opcode: u8, payload: &[u8]) -> Result<(), TxError> {
        let message = Message::new(opcode, payload).context(InvalidMessageSnafu)?;
        self.enqueue(priority, message)
    }

    /// Queue a long acknowledge of a request with opcode `opcode`
    fn long_ack(&self, opcode: u8, code: AckCode) -> Result<(), TxError> {
        self.enqueue(RESPONSE_PRIORITY, Message::long_ack(opcode, code.into()))
    }
}

#[derive(Debug)]
struct Pending {
    priority: u8,
    message: Message,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    tx_index: usize,
    echo_index: usize,
}

impl InFlight {
    fn new(message: Message) -> Self {
        Self {
            message,
            tx_index: 0,
            echo_index: 0,
        }
    }
}

#[derive(Debug)]
struct Inner<const N: usize> {
    pending: Vec<Pending, N>,
    current: Option<InFlight>,
}

impl<const N: usize> Inner<N> {
    fn occupied(&self) -> usize {
        self.pending.len() + self.current.is_some() as usize
    }

    /// Insert behind everything of equal or more urgent priority, aging what gets passed over
    fn insert(&mut self, priority: u8, message: Message) -> Result<(), Message> {
        if self.occupied() >= N {
            return Err(message);
        }
        let len = self.pending.len();
        let p = priority as u16;
        // The head is about to be sent and is never displaced
        let mut pos = len.min(1);
        while pos < len && (self.pending[pos].priority as u16) <= p {
            pos += 1;
        }
        while pos < len && (self.pending[pos].priority as u16) == p + 1 {
            self.pending[pos].priority -= 1;
            pos += 1;
        }
        for entry in self.pending[pos..].iter_mut() {
            entry.priority = entry.priority.saturating_sub(1);
        }
        self.pending
            .insert(pos, Pending { priority, message })
            .map_err(|p| p.message)
    }
}

/// The transmit queue
///
/// Shared between the polling loop (which queues and starts messages) and the serial interrupts
/// (which pull bytes, check echoes, and requeue on collision). All access goes through a
/// critical section.
#[allow(missing_debug_implementations)]
pub struct TxQueue<const N: usize = TX_QUEUE_DEPTH> {
    inner: Mutex<RefCell<Inner<N>>>,
}

impl<const N: usize> Default for TxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TxQueue<N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                pending: Vec::new(),
                current: None,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<N>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Number of messages waiting, not counting one in flight
    pub fn len(&self) -> usize {
        self.with(|q| q.pending.len())
    }

    /// True if no messages are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a message has been started and not yet released
    pub fn in_flight(&self) -> bool {
        self.with(|q| q.current.is_some())
    }

    /// Move the head of the queue in flight
    ///
    /// Returns false if a message is already in flight or nothing is waiting.
    pub fn start_next(&self) -> bool {
        self.with(|q| {
            if q.current.is_some() || q.pending.is_empty() {
                return false;
            }
            let head = q.pending.remove(0);
            q.current = Some(InFlight::new(head.message));
            true
        })
    }

    /// The next byte to hand to the channel, or None when all have been written
    pub fn next_tx_byte(&self) -> Option<u8> {
        self.with(|q| {
            let current = q.current.as_mut()?;
            let byte = *current.message.as_bytes().get(current.tx_index)?;
            current.tx_index += 1;
            Some(byte)
        })
    }

    /// The byte expected back from the bus for the next echo
    ///
    /// Returns None if nothing is in flight or every written byte has already been echoed.
    pub fn next_echo_byte(&self) -> Option<u8> {
        self.with(|q| {
            let current = q.current.as_mut()?;
            if current.echo_index >= current.tx_index {
                return None;
            }
            let byte = current.message.as_bytes()[current.echo_index];
            current.echo_index += 1;
            Some(byte)
        })
    }

    /// Put the in-flight message back at the front of the queue, to be sent again from the start
    ///
    /// Returns false if nothing was in flight.
    pub fn requeue_current(&self) -> bool {
        self.with(|q| match q.current.take() {
            Some(current) => {
                // A slot is always reserved for the in-flight message, so this cannot fail
                let _ = q.pending.insert(
                    0,
                    Pending {
                        priority: 0,
                        message: current.message,
                    },
                );
                true
            }
            None => false,
        })
    }

    /// Release the in-flight message once every byte has been handed to the channel
    pub fn release_completed(&self) -> Option<Message> {
        self.with(|q| {
            let done = q
                .current
                .as_ref()
                .is_some_and(|c| c.tx_index >= c.message.len());
            if done {
                q.current.take().map(|c| c.message)
            } else {
                None
            }
        })
    }
}

impl<const N: usize> MessageSink for TxQueue<N> {
    fn enqueue(&self, priority: u8, message: Message) -> Result<(), TxError> {
        match self.with(|q| q.insert(priority, message)) {
            Ok(()) => Ok(()),
            Err(message) => {
                warn!("TX queue full, dropping message with opcode {:x}", message.opcode());
                QueueFullSnafu.fail()
            }
        }
    }
}
