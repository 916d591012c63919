//! Reassembly of frames from the receive buffer
use defmt_or_log::{debug, trace};
use loconet_common::messages::{checksum, is_opcode, FrameClass, MAX_MESSAGE_SIZE};

use crate::observers::ObserverRegistry;
use crate::ring_buffer::RxRingBuffer;
use crate::tx_queue::MessageSink;

/// Result of one framing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxOutcome {
    /// Nothing more can be done until more bytes arrive
    Idle,
    /// A frame was dispatched
    Handled,
    /// The candidate frame was cut short by a new opcode; try again from there
    Rescan,
}

impl RxOutcome {
    /// True if the caller should try again immediately
    pub fn should_continue(&self) -> bool {
        !matches!(self, RxOutcome::Idle)
    }
}

/// Try to take one frame off the front of `rx` and dispatch it
///
/// Stray data bytes at the front are dropped one per call. A frame interrupted by another opcode
/// (e.g. after a collision) is abandoned in favour of the new opcode. Frames with a bad checksum
/// are dropped silently.
pub fn process_one<const N: usize, const M: usize>(
    rx: &RxRingBuffer<N>,
    registry: &ObserverRegistry<'_, M>,
    tx: &dyn MessageSink,
) -> RxOutcome {
    let available = rx.available();
    if available < 2 {
        return RxOutcome::Idle;
    }

    let Some(opcode) = rx.peek(0) else {
        return RxOutcome::Idle;
    };
    let Some(class) = FrameClass::from_opcode(opcode) else {
        trace!("Discarding stray byte {:x}", opcode);
        rx.advance(1);
        return RxOutcome::Idle;
    };

    let length = match class.fixed_len() {
        Some(len) => len,
        None => rx.peek(1).unwrap_or(0) as usize,
    };

    // Any opcode inside the candidate frame means it was corrupted
    let scan_end = available.min(length);
    for i in 1..scan_end {
        if rx.peek(i).is_some_and(is_opcode) {
            trace!("Frame {:x} interrupted at offset {}", opcode, i);
            rx.advance(i);
            return RxOutcome::Rescan;
        }
    }

    if length < class.header_len() + 1 || length > rx.capacity() || length > MAX_MESSAGE_SIZE {
        debug!("Dropping opcode {:x} with impossible length {}", opcode, length);
        rx.advance(1);
        return RxOutcome::Idle;
    }

    if available < length {
        return RxOutcome::Idle;
    }

    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    let frame = &mut buf[..length];
    rx.copy_out(frame);
    rx.advance(length);

    if checksum(frame) != 0 {
        debug!("Dropping frame {:x} with bad checksum", opcode);
        return RxOutcome::Idle;
    }

    let payload = &frame[class.header_len()..length - 1];
    registry.dispatch(opcode, payload, tx);
    RxOutcome::Handled
}
