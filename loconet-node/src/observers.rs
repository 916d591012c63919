//! Dispatch of received messages to handlers
use heapless::Vec;
use loconet_common::messages::opcode_number;
use snafu::Snafu;

use crate::tx_queue::MessageSink;

/// Default number of (opcode, handler) registrations
pub const MAX_OBSERVERS: usize = 16;

/// Something which wants to see received messages
pub trait MessageHandler {
    /// Called for each valid frame whose opcode number matches a registration
    ///
    /// `payload` excludes the opcode, the length byte of variable frames, and the checksum.
    /// Responses can be queued on `tx`.
    fn on_message(&self, opcode: u8, payload: &[u8], tx: &dyn MessageSink);
}

/// Errors when registering a handler
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum ObserverError {
    /// Every registration slot is in use
    #[snafu(display("Observer registry is full"))]
    RegistryFull,
}

/// Handlers registered by opcode number, called in registration order
pub struct ObserverRegistry<'a, const N: usize = MAX_OBSERVERS> {
    entries: Vec<(u8, &'a dyn MessageHandler), N>,
}

impl<const N: usize> core::fmt::Debug for ObserverRegistry<'_, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(number, _)| number))
            .finish()
    }
}

impl<const N: usize> Default for ObserverRegistry<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

fn same_handler(a: &dyn MessageHandler, b: &dyn MessageHandler) -> bool {
    core::ptr::addr_eq(a, b)
}

impl<'a, const N: usize> ObserverRegistry<'a, N> {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Call `handler` for messages with the same opcode number as `opcode`
    pub fn register(
        &mut self,
        opcode: u8,
        handler: &'a dyn MessageHandler,
    ) -> Result<(), ObserverError> {
        self.entries
            .push((opcode_number(opcode), handler))
            .map_err(|_| ObserverError::RegistryFull)
    }

    /// Remove every registration of `handler` for the opcode number of `opcode`
    ///
    /// Returns the number of registrations removed.
    pub fn unregister(&mut self, opcode: u8, handler: &dyn MessageHandler) -> usize {
        let number = opcode_number(opcode);
        let before = self.entries.len();
        self.entries
            .retain(|(n, h)| !(*n == number && same_handler(*h, handler)));
        before - self.entries.len()
    }

    /// Number of registrations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pass a message to every handler registered for its opcode number
    ///
    /// Returns the number of handlers called.
    pub fn dispatch(&self, opcode: u8, payload: &[u8], tx: &dyn MessageSink) -> usize {
        let number = opcode_number(opcode);
        let mut count = 0;
        for (_, handler) in self.entries.iter().filter(|(n, _)| *n == number) {
            handler.on_message(opcode, payload, tx);
            count += 1;
        }
        count
    }
}
