//! Polling side of a bus node
use loconet_common::{
    constants::opcodes::{OPC_IMM_PACKET, OPC_PEER_XFER, OPC_RD_SL_DATA, OPC_WR_SL_DATA},
    traits::ByteChannel,
};

use crate::{
    bus_link::BusLink,
    framer::{process_one, RxOutcome},
    observers::{MessageHandler, ObserverError, ObserverRegistry, MAX_OBSERVERS},
};

/// Opcodes the LNCV server listens to
pub const LNCV_OPCODES: [u8; 4] = [OPC_PEER_XFER, OPC_IMM_PACKET, OPC_WR_SL_DATA, OPC_RD_SL_DATA];

/// A bus node
///
/// Owns the handler registrations and drives the receive framer and transmitter from the polling
/// loop. Everything shared with interrupts lives in the [`BusLink`].
#[allow(missing_debug_implementations)]
pub struct Node<'a, const RX: usize, const TX: usize, const OBS: usize = MAX_OBSERVERS> {
    link: &'a BusLink<RX, TX>,
    observers: ObserverRegistry<'a, OBS>,
    rx_message_count: u32,
}

impl<'a, const RX: usize, const TX: usize, const OBS: usize> Node<'a, RX, TX, OBS> {
    /// Create a new node around `link`
    pub fn new(link: &'a BusLink<RX, TX>) -> Self {
        Self {
            link,
            observers: ObserverRegistry::new(),
            rx_message_count: 0,
        }
    }

    /// Call `handler` for received messages with the same opcode number as `opcode`
    pub fn register(
        &mut self,
        opcode: u8,
        handler: &'a dyn MessageHandler,
    ) -> Result<(), ObserverError> {
        self.observers.register(opcode, handler)
    }

    /// Remove the registrations of `handler` for `opcode`
    pub fn unregister(&mut self, opcode: u8, handler: &dyn MessageHandler) -> usize {
        self.observers.unregister(opcode, handler)
    }

    /// Register an LNCV server for every opcode it answers
    pub fn register_lncv(&mut self, server: &'a dyn MessageHandler) -> Result<(), ObserverError> {
        for opcode in LNCV_OPCODES {
            self.observers.register(opcode, server)?;
        }
        Ok(())
    }

    /// The shared link
    pub fn link(&self) -> &'a BusLink<RX, TX> {
        self.link
    }

    /// Number of frames dispatched since creation
    pub fn rx_message_count(&self) -> u32 {
        self.rx_message_count
    }

    /// Run periodic processing
    ///
    /// Dispatches every complete frame in the receive buffer, then starts a transmission if the
    /// bus is free. Never waits for more bytes.
    ///
    /// Returns the number of frames dispatched.
    pub fn process(&mut self, channel: &mut dyn ByteChannel) -> usize {
        let mut handled = 0;
        loop {
            let outcome = process_one(self.link.rx(), &self.observers, self.link);
            if outcome == RxOutcome::Handled {
                handled += 1;
            }
            if !outcome.should_continue() {
                break;
            }
        }
        self.rx_message_count = self.rx_message_count.wrapping_add(handled as u32);
        self.link.service_tx(channel);
        handled
    }
}
