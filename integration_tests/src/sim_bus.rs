//! A simulated LocoNet segment
//!
//! Time is simulated in microseconds. The wire carries one byte slot at a time; every byte takes
//! [`BYTE_TIME_US`] and is seen by every receiver, including the sender, when its stop bit ends.
//! Bytes started by more than one transmitter in the same slot are combined as the line driver
//! would combine them (wired AND); a byte started while another is already on the wire, or
//! received while a node holds a line break, arrives with a framing error.
//!
//! Each simulated node has its own [`BusLink`], timer and channel. The polling side is driven by
//! passing the matching [`Node`] objects to [`SimBus::run_for`] and friends, in the same order the
//! nodes were created.
use std::collections::VecDeque;

use loconet_node::{
    common::{
        device_config::DeviceConfig,
        messages::Message,
        traits::{BusTimer, ByteChannel, Edge},
        BusTiming,
    },
    BusLink, Node, NodeConfig,
};

/// Duration of one byte on the wire: start bit, 8 data bits, stop bit at 60us per bit
pub const BYTE_TIME_US: u64 = 600;

/// Receive buffer size of simulated nodes
pub const SIM_RX: usize = 64;
/// Transmit queue depth of simulated nodes
pub const SIM_TX: usize = 8;

/// The link type used by simulated nodes
pub type SimLink = BusLink<SIM_RX, SIM_TX>;
/// The node type used with the simulated bus
pub type SimNode<'a> = Node<'a, SIM_RX, SIM_TX>;

/// Guard against tests which never settle
const MAX_STEPS: usize = 100_000;

/// A one-shot timer in simulated time
#[derive(Debug, Default)]
pub struct SimTimer {
    now: u64,
    deadline: Option<u64>,
    /// Every delay the timer was started with
    pub started: Vec<u32>,
}

impl BusTimer for SimTimer {
    fn start(&mut self, delay_us: u32) {
        self.deadline = Some(self.now + delay_us as u64);
        self.started.push(delay_us);
    }
}

/// A UART attached to the simulated wire
#[derive(Debug)]
pub struct SimChannel {
    dre_enabled: bool,
    rx_tx_enabled: bool,
    data: Option<u8>,
    break_requested: bool,
    holding_break: bool,
    /// Current state of the activity indicator
    pub activity: bool,
    /// Every byte handed to the UART
    pub written: Vec<u8>,
    /// Number of times the line was forced into a break
    pub breaks: usize,
}

impl Default for SimChannel {
    fn default() -> Self {
        Self {
            dre_enabled: false,
            rx_tx_enabled: true,
            data: None,
            break_requested: false,
            holding_break: false,
            activity: false,
            written: Vec::new(),
            breaks: 0,
        }
    }
}

impl ByteChannel for SimChannel {
    fn write_byte(&mut self, byte: u8) {
        self.data = Some(byte);
        self.written.push(byte);
    }

    fn start_transmit(&mut self) {
        self.dre_enabled = true;
    }

    fn stop_transmit(&mut self) {
        self.dre_enabled = false;
    }

    fn enable_rx_tx(&mut self) {
        self.rx_tx_enabled = true;
        self.holding_break = false;
    }

    fn disable_rx_tx(&mut self) {
        self.rx_tx_enabled = false;
        self.data = None;
    }

    fn force_tx_idle(&mut self) {
        self.break_requested = true;
        self.breaks += 1;
    }

    fn set_activity(&mut self, on: bool) {
        self.activity = on;
    }
}

/// One simulated node's interrupt side
#[derive(Debug)]
pub struct SimPort {
    link: &'static SimLink,
    /// The node's arbitration timer
    pub timer: SimTimer,
    /// The node's UART
    pub channel: SimChannel,
}

/// A byte which appeared on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireByte {
    /// Time the stop bit ended
    pub time_us: u64,
    /// The value receivers saw
    pub value: u8,
    /// True if the byte was corrupted
    pub framing_error: bool,
}

/// Who is driving the current byte slot
const RAW_DRIVER: usize = usize::MAX;

#[derive(Debug)]
struct Slot {
    start: u64,
    drivers: Vec<(usize, u8)>,
    overlapped: bool,
}

/// A simulated bus segment
#[derive(Debug)]
pub struct SimBus {
    ports: Vec<SimPort>,
    now: u64,
    slot: Option<Slot>,
    raw_queue: VecDeque<u8>,
    inject_after: Option<usize>,
    wire: Vec<WireByte>,
}

impl SimBus {
    /// Create a bus with one node per config, all using the standard timing
    pub fn new(configs: &[NodeConfig]) -> Self {
        Self::with_links(
            configs
                .iter()
                .map(|config| SimLink::new(*config, BusTiming::new()))
                .collect(),
        )
    }

    /// Create a bus with one node per device config file
    pub fn from_devices(devices: &[DeviceConfig]) -> Self {
        Self::with_links(devices.iter().map(SimLink::from_device_config).collect())
    }

    fn with_links(links: Vec<SimLink>) -> Self {
        let ports = links
            .into_iter()
            .map(|link| SimPort {
                link: Box::leak(Box::new(link)),
                timer: SimTimer::default(),
                channel: SimChannel::default(),
            })
            .collect();
        Self {
            ports,
            now: 0,
            slot: None,
            raw_queue: VecDeque::new(),
            inject_after: None,
            wire: Vec::new(),
        }
    }

    /// The link of node `idx`
    ///
    /// Links live for the rest of the test so that nodes and servers can borrow them freely.
    pub fn link(&self, idx: usize) -> &'static SimLink {
        self.ports[idx].link
    }

    /// The interrupt side of node `idx`
    pub fn port(&self, idx: usize) -> &SimPort {
        &self.ports[idx]
    }

    /// Current simulated time
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Every byte seen on the wire so far
    pub fn wire(&self) -> &[WireByte] {
        &self.wire
    }

    /// The values of the bytes seen on the wire, excluding corrupted ones
    pub fn wire_values(&self) -> Vec<u8> {
        self.wire
            .iter()
            .filter(|b| !b.framing_error)
            .map(|b| b.value)
            .collect()
    }

    /// Intact frames seen on the wire, in order
    pub fn wire_frames(&self) -> Vec<Message> {
        let bytes = self.wire_values();
        let mut frames = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] & 0x80 == 0 {
                i += 1;
                continue;
            }
            let end = (i + 1..bytes.len())
                .find(|j| bytes[*j] & 0x80 != 0)
                .unwrap_or(bytes.len());
            if let Ok(msg) = Message::from_bytes(&bytes[i..end]) {
                frames.push(msg);
            }
            i = end;
        }
        frames
    }

    /// Send bytes from a device outside the simulation, without arbitration or echo checking
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.raw_queue.extend(bytes);
    }

    /// Corrupt the byte slot which follows the next `after` slots
    pub fn inject_collision_after(&mut self, after: usize) {
        self.inject_after = Some(after);
    }

    /// Start every node, as at power on
    pub fn start(&mut self) {
        let now = self.now;
        for port in &mut self.ports {
            port.timer.now = now;
            port.link.start(&mut port.timer);
        }
    }

    /// Run until simulated time has advanced by `duration_us`
    pub fn run_for(&mut self, nodes: &mut [SimNode<'_>], duration_us: u64) {
        let end = self.now + duration_us;
        for _ in 0..MAX_STEPS {
            self.settle(nodes);
            match self.next_event() {
                Some(t) if t <= end => self.advance_to(t),
                _ => {
                    self.set_time(end);
                    return;
                }
            }
        }
        panic!("Simulation did not settle");
    }

    /// Run until nothing is queued, nothing is on the wire, and every timer has expired
    pub fn run_until_quiet(&mut self, nodes: &mut [SimNode<'_>]) {
        for _ in 0..MAX_STEPS {
            self.settle(nodes);
            match self.next_event() {
                Some(t) => self.advance_to(t),
                None => {
                    if self.is_quiet() {
                        return;
                    }
                    panic!("Bus stalled with pending work at {}us", self.now);
                }
            }
        }
        panic!("Simulation did not settle");
    }

    fn is_quiet(&self) -> bool {
        self.raw_queue.is_empty()
            && self
                .ports
                .iter()
                .all(|p| p.link.tx().is_empty() && !p.link.tx().in_flight())
    }

    fn set_time(&mut self, t: u64) {
        self.now = t;
        for port in &mut self.ports {
            port.timer.now = t;
        }
    }

    fn next_event(&self) -> Option<u64> {
        let slot_end = self.slot.as_ref().map(|s| s.start + BYTE_TIME_US);
        self.ports
            .iter()
            .filter_map(|p| p.timer.deadline)
            .chain(slot_end)
            .min()
    }

    fn broadcast_edge(&mut self, edge: Edge, except: Option<usize>) {
        for (i, port) in self.ports.iter_mut().enumerate() {
            if Some(i) != except {
                port.link.on_bus_edge(edge, &mut port.timer);
            }
        }
    }

    fn break_held(&self) -> bool {
        self.ports.iter().any(|p| p.channel.holding_break)
    }

    /// Handle everything which happens without time passing
    fn settle(&mut self, nodes: &mut [SimNode<'_>]) {
        assert_eq!(nodes.len(), self.ports.len(), "one node per port");
        loop {
            let mut changed = false;

            for (i, node) in nodes.iter_mut().enumerate() {
                node.process(&mut self.ports[i].channel);
            }

            // Line breaks starting or ending
            for i in 0..self.ports.len() {
                if self.ports[i].channel.break_requested {
                    self.ports[i].channel.break_requested = false;
                    let was_held = self.break_held();
                    self.ports[i].channel.holding_break = true;
                    if !was_held && self.slot.is_none() {
                        self.broadcast_edge(Edge::Fall, Some(i));
                    }
                    changed = true;
                }
            }

            // Data register empty interrupts
            for i in 0..self.ports.len() {
                let driving = self
                    .slot
                    .as_ref()
                    .is_some_and(|s| s.drivers.iter().any(|(d, _)| *d == i));
                let port = &mut self.ports[i];
                if port.channel.dre_enabled && port.channel.data.is_none() && !driving {
                    port.link.on_transmit_ready(&mut port.channel);
                    changed = true;
                }
            }

            // Bytes entering the wire
            for i in 0..self.ports.len() {
                let port = &mut self.ports[i];
                if !port.channel.rx_tx_enabled {
                    continue;
                }
                if let Some(byte) = port.channel.data.take() {
                    self.drive(i, byte);
                    changed = true;
                }
            }
            if self.slot.is_none() && !self.break_held() {
                if let Some(byte) = self.raw_queue.pop_front() {
                    self.drive(RAW_DRIVER, byte);
                    changed = true;
                }
            }

            if !changed {
                return;
            }
        }
    }

    fn drive(&mut self, driver: usize, byte: u8) {
        let now = self.now;
        match &mut self.slot {
            Some(slot) => {
                if slot.start != now {
                    slot.overlapped = true;
                }
                slot.drivers.push((driver, byte));
            }
            None => {
                self.slot = Some(Slot {
                    start: now,
                    drivers: vec![(driver, byte)],
                    overlapped: false,
                });
                if !self.break_held() {
                    self.broadcast_edge(Edge::Fall, None);
                }
            }
        }
    }

    fn advance_to(&mut self, t: u64) {
        self.set_time(t);

        let slot_done = self
            .slot
            .as_ref()
            .is_some_and(|s| s.start + BYTE_TIME_US == t);
        if slot_done {
            if let Some(slot) = self.slot.take() {
                self.finish_slot(slot);
            }
        }

        let was_held = self.break_held();
        for port in &mut self.ports {
            if port.timer.deadline == Some(t) {
                port.timer.deadline = None;
                port.link.on_timer_expired(&mut port.timer, &mut port.channel);
            }
        }
        if was_held && !self.break_held() && self.slot.is_none() {
            self.broadcast_edge(Edge::Rise, None);
        }
    }

    fn finish_slot(&mut self, slot: Slot) {
        let mut value = slot.drivers.iter().fold(0xFF, |acc, (_, b)| acc & b);
        let mut framing_error = slot.overlapped || self.break_held();
        if let Some(after) = self.inject_after {
            if after == 0 {
                framing_error = true;
                self.inject_after = None;
            } else {
                self.inject_after = Some(after - 1);
            }
        }
        if self.break_held() {
            value = 0;
        }
        self.wire.push(WireByte {
            time_us: self.now,
            value,
            framing_error,
        });

        for port in &mut self.ports {
            if port.channel.rx_tx_enabled {
                port.link
                    .on_byte_received(value, framing_error, &mut port.channel, &mut port.timer);
            }
        }
        if !self.break_held() {
            self.broadcast_edge(Edge::Rise, None);
        }

        for (driver, _) in slot.drivers {
            if driver == RAW_DRIVER {
                continue;
            }
            let port = &mut self.ports[driver];
            if port.channel.dre_enabled {
                port.link.on_transmit_ready(&mut port.channel);
            }
            if port.channel.data.is_none() {
                port.link.on_transmit_complete(&mut port.channel);
            }
        }
    }
}
