//! Single producer, single consumer byte queue between the receive interrupt and the framer
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Default capacity of the receive buffer
pub const RX_BUFFER_SIZE: usize = 64;

/// A fixed size ring of received bytes
///
/// One slot is always left empty so that a full buffer can be told apart from an empty one, so
/// `N - 1` bytes can be held. `N` must be a power of two.
///
/// Only one context may push (the receive interrupt) and only one context may read and advance
/// (the polling loop). Each cursor is written only by its owner.
pub struct RxRingBuffer<const N: usize = RX_BUFFER_SIZE> {
    buffer: UnsafeCell<[u8; N]>,
    writer: AtomicUsize,
    reader: AtomicUsize,
}

// Safety: a slot is written only by the producer while it lies outside [reader, writer), and read
// only by the consumer while it lies inside. The cursors are published with release ordering after
// the slot access they cover.
unsafe impl<const N: usize> Sync for RxRingBuffer<N> {}

impl<const N: usize> core::fmt::Debug for RxRingBuffer<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RxRingBuffer")
            .field("writer", &self.writer.load(Ordering::Relaxed))
            .field("reader", &self.reader.load(Ordering::Relaxed))
            .finish()
    }
}

impl<const N: usize> Default for RxRingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RxRingBuffer<N> {
    const MASK: usize = {
        assert!(N.is_power_of_two() && N >= 4);
        N - 1
    };

    /// Create an empty buffer
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0; N]),
            writer: AtomicUsize::new(0),
            reader: AtomicUsize::new(0),
        }
    }

    /// Number of bytes the buffer can hold
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Store a byte, returning false if the buffer is full
    ///
    /// Producer side only.
    pub fn try_push(&self, byte: u8) -> bool {
        let writer = self.writer.load(Ordering::Relaxed);
        let next = (writer + 1) & Self::MASK;
        if next == self.reader.load(Ordering::Acquire) {
            return false;
        }
        // Safety: the slot at `writer` is not visible to the consumer until the writer cursor
        // is published below
        unsafe {
            (*self.buffer.get())[writer] = byte;
        }
        self.writer.store(next, Ordering::Release);
        true
    }

    /// Store a byte, spinning until the consumer frees a slot
    ///
    /// Producer side only. This stalls the calling interrupt until the polling loop reads, so the
    /// buffer must be sized for the longest burst expected between polls.
    pub fn push(&self, byte: u8) {
        while !self.try_push(byte) {
            core::hint::spin_loop();
        }
    }

    /// Number of bytes ready to be read
    pub fn available(&self) -> usize {
        let writer = self.writer.load(Ordering::Acquire);
        let reader = self.reader.load(Ordering::Relaxed);
        if writer < reader {
            writer + N - reader
        } else {
            writer - reader
        }
    }

    /// Read the byte `offset` positions after the read cursor without consuming it
    ///
    /// Consumer side only. Returns None if fewer than `offset + 1` bytes are available.
    pub fn peek(&self, offset: usize) -> Option<u8> {
        if offset >= self.available() {
            return None;
        }
        let index = (self.reader.load(Ordering::Relaxed) + offset) & Self::MASK;
        // Safety: index lies in [reader, writer), which the producer does not touch
        Some(unsafe { (*self.buffer.get())[index] })
    }

    /// Copy `out.len()` bytes starting at the read cursor into `out`, without consuming them
    ///
    /// Returns false if not enough bytes are available.
    pub fn copy_out(&self, out: &mut [u8]) -> bool {
        if out.len() > self.available() {
            return false;
        }
        let reader = self.reader.load(Ordering::Relaxed);
        for (i, b) in out.iter_mut().enumerate() {
            // Safety: as for peek
            *b = unsafe { (*self.buffer.get())[(reader + i) & Self::MASK] };
        }
        true
    }

    /// Consume `count` bytes
    ///
    /// Consumer side only. Never advances past the write cursor.
    pub fn advance(&self, count: usize) {
        let count = count.min(self.available());
        let reader = self.reader.load(Ordering::Relaxed);
        self.reader.store((reader + count) & Self::MASK, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_one_less() {
        let rb = RxRingBuffer::<8>::new();
        for i in 0..7 {
            assert!(rb.try_push(i));
        }
        assert!(!rb.try_push(7));
        assert_eq!(7, rb.available());
        assert_eq!(Some(0), rb.peek(0));
        assert_eq!(Some(6), rb.peek(6));
        assert_eq!(None, rb.peek(7));
    }

    #[test]
    fn test_wraparound() {
        let rb = RxRingBuffer::<8>::new();
        for i in 0..6 {
            rb.push(i);
        }
        rb.advance(5);
        for i in 6..12 {
            rb.push(i);
        }
        assert_eq!(7, rb.available());
        let mut out = [0; 7];
        assert!(rb.copy_out(&mut out));
        assert_eq!([5, 6, 7, 8, 9, 10, 11], out);
        rb.advance(100);
        assert_eq!(0, rb.available());
    }

    #[test]
    fn test_threaded_producer() {
        static RB: RxRingBuffer<16> = RxRingBuffer::new();
        let producer = std::thread::spawn(|| {
            for i in 0..=255u8 {
                RB.push(i);
            }
        });
        let mut expected = 0u16;
        while expected < 256 {
            if let Some(b) = RB.peek(0) {
                assert_eq!(expected as u8, b);
                RB.advance(1);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
