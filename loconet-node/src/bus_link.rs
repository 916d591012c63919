//! The shared object between bus interrupts and the polling loop
use defmt_or_log::debug;
use loconet_common::{
    messages::Message,
    traits::{BusTimer, ByteChannel, Edge},
    AtomicCell, BusTiming,
};

use crate::{
    arbitration::Arbiter,
    ring_buffer::{RxRingBuffer, RX_BUFFER_SIZE},
    status::{NodeConfig, SharedConfig, SharedStatus},
    tx_queue::{MessageSink, TxError, TxQueue, TX_QUEUE_DEPTH},
};

/// A data structure to be shared between the bus interrupts (serial, edge detection and timer) and
/// the [`Node`](crate::Node) object.
///
/// Typically this is a static. Each interrupt handler calls the matching `on_*` method, passing
/// the hardware collaborators it needs.
pub struct BusLink<const RX: usize = RX_BUFFER_SIZE, const TX: usize = TX_QUEUE_DEPTH> {
    config: SharedConfig,
    status: SharedStatus,
    arbiter: Arbiter,
    rx: RxRingBuffer<RX>,
    tx: TxQueue<TX>,
    notify_cb: AtomicCell<Option<&'static (dyn Fn() + Sync)>>,
}

impl<const RX: usize, const TX: usize> core::fmt::Debug for BusLink<RX, TX> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusLink")
            .field("config", &self.config.load())
            .field("status", &self.status.load())
            .field("arbiter", &self.arbiter.state())
            .field("rx_available", &self.rx.available())
            .field("queue_depth", &self.tx.len())
            .finish()
    }
}

impl<const RX: usize, const TX: usize> BusLink<RX, TX> {
    /// Create a new BusLink
    pub const fn new(config: NodeConfig, timing: BusTiming) -> Self {
        Self {
            config: SharedConfig::new(config),
            status: SharedStatus::new(),
            arbiter: Arbiter::new(timing),
            rx: RxRingBuffer::new(),
            tx: TxQueue::new(),
            notify_cb: AtomicCell::new(None),
        }
    }

    /// Create a BusLink with the master flag, timing and LNCV defaults of a device config file
    #[cfg(feature = "std")]
    pub fn from_device_config(device: &loconet_common::device_config::DeviceConfig) -> Self {
        Self::new(device.into(), device.timing)
    }

    /// Set a callback for notification when received bytes or a free bus require processing.
    ///
    /// It must be static. Usually this will be a static fn, but in some circumstances, it may be
    /// desirable to use Box::leak to pass a heap allocated closure instead.
    pub fn set_process_notify_callback(&self, callback: &'static (dyn Fn() + Sync)) {
        self.notify_cb.store(Some(callback));
    }

    fn notify(&self) {
        if let Some(notify_cb) = self.notify_cb.load() {
            notify_cb();
        }
    }

    /// The live node config
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// The live bus status
    pub fn status(&self) -> &SharedStatus {
        &self.status
    }

    /// The arbitration state machine
    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    /// The receive buffer
    pub fn rx(&self) -> &RxRingBuffer<RX> {
        &self.rx
    }

    /// The transmit queue
    pub fn tx(&self) -> &TxQueue<TX> {
        &self.tx
    }

    /// Number of messages waiting to be sent
    pub fn queue_depth(&self) -> usize {
        self.tx.len()
    }

    /// Begin operation
    ///
    /// The bus is treated as if activity had just ended, so no message is sent before a full
    /// arbitration sequence has elapsed.
    pub fn start(&self, timer: &mut dyn BusTimer) {
        self.status.set_busy(true);
        self.arbiter.on_bus_edge(Edge::Rise, &self.status, timer);
    }

    /// Call from the edge detection interrupt
    pub fn on_bus_edge(&self, edge: Edge, timer: &mut dyn BusTimer) {
        self.arbiter.on_bus_edge(edge, &self.status, timer);
    }

    /// Call from the timer interrupt
    pub fn on_timer_expired(&self, timer: &mut dyn BusTimer, channel: &mut dyn ByteChannel) {
        self.arbiter
            .on_timer_expired(&self.config, &self.status, timer, channel);
        if self.status.load().can_transmit() && (!self.tx.is_empty() || self.tx.in_flight()) {
            self.notify();
        }
    }

    /// Call from the receive interrupt with each received byte
    ///
    /// `framing_error` is the UART's framing error flag for this byte. Bytes which echo our own
    /// transmission are checked and consumed here; everything else goes to the receive buffer.
    pub fn on_byte_received(
        &self,
        byte: u8,
        framing_error: bool,
        channel: &mut dyn ByteChannel,
        timer: &mut dyn BusTimer,
    ) {
        let status = self.status.load();
        if status.collision_detected {
            return;
        }
        if framing_error {
            self.signal_collision(channel, timer);
            return;
        }
        match self.tx.next_echo_byte() {
            Some(expected) if expected == byte => (),
            Some(_) => self.signal_collision(channel, timer),
            None if status.transmitting => self.signal_collision(channel, timer),
            None => {
                channel.set_activity(true);
                self.rx.push(byte);
                channel.set_activity(false);
                self.notify();
            }
        }
    }

    /// Call from the data register empty interrupt
    pub fn on_transmit_ready(&self, channel: &mut dyn ByteChannel) {
        let status = self.status.load();
        if status.collision_detected {
            self.status.set_transmitting(false);
            channel.stop_transmit();
        } else if status.transmitting {
            match self.tx.next_tx_byte() {
                Some(byte) => channel.write_byte(byte),
                None => {
                    self.status.set_transmitting(false);
                    channel.stop_transmit();
                }
            }
        } else {
            channel.stop_transmit();
        }
    }

    /// Call from the transmit complete interrupt
    pub fn on_transmit_complete(&self, channel: &mut dyn ByteChannel) {
        if self.tx.release_completed().is_some() {
            self.status.set_transmitting(false);
            channel.set_activity(false);
        }
    }

    /// Abort the current transmission and hold the bus in a line break
    ///
    /// The in-flight message, if any, goes back to the front of the queue.
    pub fn signal_collision(&self, channel: &mut dyn ByteChannel, timer: &mut dyn BusTimer) {
        debug!("Collision detected");
        self.status.set_collision_detected(true);
        channel.disable_rx_tx();
        let requeued = self.tx.requeue_current();
        if requeued || self.status.load().transmitting {
            self.status.set_transmitting(false);
            channel.stop_transmit();
            channel.force_tx_idle();
            channel.set_activity(false);
        }
        self.arbiter.begin_line_break(&self.status, timer);
    }

    /// Start sending the next queued message if the bus is free
    ///
    /// Returns true if a transmission was started.
    pub fn service_tx(&self, channel: &mut dyn ByteChannel) -> bool {
        if self.tx.in_flight() || self.tx.is_empty() {
            return false;
        }
        if !self.status.try_begin_transmit() {
            return false;
        }
        if !self.tx.start_next() {
            self.status.set_transmitting(false);
            self.status.set_busy(false);
            return false;
        }
        channel.set_activity(true);
        channel.start_transmit();
        true
    }
}

impl<const RX: usize, const TX: usize> MessageSink for BusLink<RX, TX> {
    fn enqueue(&self, priority: u8, message: Message) -> Result<(), TxError> {
        self.tx.enqueue(priority, message)?;
        if self.status.load().can_transmit() {
            self.notify();
        }
        Ok(())
    }
}
