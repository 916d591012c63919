//! Bus access arbitration
//!
//! There is no central arbiter on the bus. Every node watches the line, and once activity stops it
//! waits a carrier detect delay, then (unless it is the master) a master delay, then a delay
//! proportional to its priority. Only after all of these elapse without new activity is the bus
//! considered free. A falling edge which is not followed by a rise is treated as a line break.
use defmt_or_log::trace;
use loconet_common::{
    traits::{BusTimer, ByteChannel, Edge},
    AtomicCell, BusTiming,
};

use crate::status::{SharedConfig, SharedStatus};

/// The phase of the arbitration sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArbitrationState {
    /// No timer running
    Idle,
    /// Waiting for the line to stay idle for the carrier detect time
    CarrierDetectWait,
    /// Waiting out the master delay
    MasterDelayWait,
    /// Waiting out the priority delay
    PriorityDelayWait,
    /// Waiting out a line break
    LineBreakWait,
}

/// The arbitration state machine
///
/// All methods are called from interrupt context: edges from the edge detection interrupt and
/// `on_timer_expired` from the timer interrupt.
#[derive(Debug)]
pub struct Arbiter {
    state: AtomicCell<ArbitrationState>,
    timing: BusTiming,
}

impl Arbiter {
    /// Create a new arbiter
    pub const fn new(timing: BusTiming) -> Self {
        Self {
            state: AtomicCell::new(ArbitrationState::Idle),
            timing,
        }
    }

    /// The current state
    pub fn state(&self) -> ArbitrationState {
        self.state.load()
    }

    fn arm(&self, timer: &mut dyn BusTimer, delay_us: u32, state: ArbitrationState) {
        timer.start(delay_us);
        self.state.store(state);
    }

    /// Handle a transition of the bus line
    ///
    /// While recovering from a collision, a rise does not cut the line break short.
    pub fn on_bus_edge(&self, edge: Edge, status: &SharedStatus, timer: &mut dyn BusTimer) {
        status.set_busy(true);
        match edge {
            Edge::Rise
                if status.load().collision_detected
                    && self.state.load() == ArbitrationState::LineBreakWait => {}
            Edge::Rise => self.arm(
                timer,
                self.timing.carrier_detect_us,
                ArbitrationState::CarrierDetectWait,
            ),
            Edge::Fall => self.arm(
                timer,
                self.timing.line_break_us,
                ArbitrationState::LineBreakWait,
            ),
        }
    }

    /// Start a line break after a collision, without waiting for the edge it causes
    pub fn begin_line_break(&self, status: &SharedStatus, timer: &mut dyn BusTimer) {
        self.on_bus_edge(Edge::Fall, status, timer);
    }

    /// Handle expiry of the timer
    pub fn on_timer_expired(
        &self,
        config: &SharedConfig,
        status: &SharedStatus,
        timer: &mut dyn BusTimer,
        channel: &mut dyn ByteChannel,
    ) {
        let state = self.state.load();
        trace!("Arbitration timer expired in {:?}", state);
        match state {
            ArbitrationState::CarrierDetectWait => {
                if config.is_master() {
                    status.set_busy(false);
                    self.state.store(ArbitrationState::Idle);
                } else {
                    self.arm(
                        timer,
                        self.timing.master_delay_us,
                        ArbitrationState::MasterDelayWait,
                    );
                }
            }
            ArbitrationState::MasterDelayWait => {
                let priority = config.priority().raw();
                if priority != 0 {
                    self.arm(
                        timer,
                        self.timing.priority_delay_us(priority),
                        ArbitrationState::PriorityDelayWait,
                    );
                } else {
                    status.set_busy(false);
                    self.state.store(ArbitrationState::Idle);
                }
            }
            ArbitrationState::PriorityDelayWait => {
                status.set_busy(false);
                self.state.store(ArbitrationState::Idle);
            }
            ArbitrationState::LineBreakWait => {
                channel.enable_rx_tx();
                if status.load().collision_detected {
                    // End of our own break: the line is released, so wait for it to stay idle
                    status.set_collision_detected(false);
                    self.arm(
                        timer,
                        self.timing.carrier_detect_us,
                        ArbitrationState::CarrierDetectWait,
                    );
                } else {
                    // The bus stays busy until the rise that ends the break restarts carrier detect
                    self.state.store(ArbitrationState::Idle);
                }
            }
            ArbitrationState::Idle => (),
        }
    }
}
