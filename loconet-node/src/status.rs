//! Config and status shared between the interrupt handlers and the polling loop
use loconet_common::{
    constants::lncv::{INITIAL_ADDRESS, INITIAL_PRIORITY},
    AtomicCell, DeviceAddress, Priority,
};

/// Flags describing the current state of the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusStatus {
    /// The bus has seen activity and the access delays have not yet elapsed
    pub busy: bool,
    /// A message is being written to the channel
    pub transmitting: bool,
    /// A collision was detected and the line break has not yet finished
    pub collision_detected: bool,
}

impl BusStatus {
    /// True when a new transmission may be started
    pub fn can_transmit(&self) -> bool {
        !(self.busy || self.transmitting || self.collision_detected)
    }
}

/// Interrupt safe storage for [`BusStatus`]
///
/// Transitions go through the named setters, which keep `transmitting` implying `busy`.
#[derive(Debug, Default)]
pub struct SharedStatus {
    inner: AtomicCell<BusStatus>,
}

impl SharedStatus {
    /// Create a status with all flags cleared
    pub const fn new() -> Self {
        Self {
            inner: AtomicCell::new(BusStatus {
                busy: false,
                transmitting: false,
                collision_detected: false,
            }),
        }
    }

    /// Read all flags at once
    pub fn load(&self) -> BusStatus {
        self.inner.load()
    }

    /// Set or clear the busy flag
    ///
    /// Busy cannot be cleared while transmitting.
    pub fn set_busy(&self, busy: bool) {
        self.inner.update(|mut s| {
            s.busy = busy || s.transmitting;
            s
        });
    }

    /// Set or clear the transmitting flag. Setting it also marks the bus busy.
    pub fn set_transmitting(&self, transmitting: bool) {
        self.inner.update(|mut s| {
            s.transmitting = transmitting;
            s.busy |= transmitting;
            s
        });
    }

    /// Set or clear the collision flag
    pub fn set_collision_detected(&self, collision: bool) {
        self.inner.update(|mut s| {
            s.collision_detected = collision;
            s
        });
    }

    /// Atomically move from "free" to "transmitting"
    ///
    /// Returns false, leaving the flags untouched, if the bus is not free.
    pub fn try_begin_transmit(&self) -> bool {
        self.inner
            .fetch_update(|s| {
                if s.can_transmit() {
                    Some(BusStatus {
                        busy: true,
                        transmitting: true,
                        collision_detected: false,
                    })
                } else {
                    None
                }
            })
            .is_ok()
    }
}

/// Identity and arbitration settings of the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// The module address, LNCV 0
    pub address: DeviceAddress,
    /// True for the command station
    pub is_master: bool,
    /// Arbitration priority, LNCV 2
    pub priority: Priority,
}

impl NodeConfig {
    /// The factory configuration
    pub const fn new() -> Self {
        Self {
            address: DeviceAddress::saturating(INITIAL_ADDRESS),
            is_master: false,
            priority: Priority::saturating(INITIAL_PRIORITY),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl From<&loconet_common::device_config::DeviceConfig> for NodeConfig {
    /// The configuration a node starts with before its LNCVs are loaded
    fn from(device: &loconet_common::device_config::DeviceConfig) -> Self {
        Self {
            address: DeviceAddress::saturating(device.lncv.initial_address),
            is_master: device.master,
            priority: Priority::saturating(device.lncv.initial_priority),
        }
    }
}

/// Interrupt safe storage for [`NodeConfig`]
#[derive(Debug, Default)]
pub struct SharedConfig {
    inner: AtomicCell<NodeConfig>,
}

impl SharedConfig {
    /// Create a new shared config
    pub const fn new(config: NodeConfig) -> Self {
        Self {
            inner: AtomicCell::new(config),
        }
    }

    /// Read the whole config
    pub fn load(&self) -> NodeConfig {
        self.inner.load()
    }

    /// The current address
    pub fn address(&self) -> DeviceAddress {
        self.inner.load().address
    }

    /// The current priority
    pub fn priority(&self) -> Priority {
        self.inner.load().priority
    }

    /// True if this node is the bus master
    pub fn is_master(&self) -> bool {
        self.inner.load().is_master
    }

    /// Change the address
    pub fn set_address(&self, address: DeviceAddress) {
        self.inner.update(|mut c| {
            c.address = address;
            c
        });
    }

    /// Change the priority
    pub fn set_priority(&self, priority: Priority) {
        self.inner.update(|mut c| {
            c.priority = priority;
            c
        });
    }
}
