//! Bus access timing

use crate::constants::timing::*;

/// Delays used by the arbitration state machine, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusTiming {
    /// Time the line must stay idle after activity before it is considered free
    pub carrier_detect_us: u32,
    /// Extra wait imposed on every node which is not the bus master
    pub master_delay_us: u32,
    /// How long the line is held broken after a collision
    pub line_break_us: u32,
    /// Backoff per unit of node priority
    pub priority_unit_us: u32,
}

impl BusTiming {
    /// Standard timing for 16666 baud
    pub const fn new() -> Self {
        Self {
            carrier_detect_us: CARRIER_DETECT_US,
            master_delay_us: MASTER_DELAY_US,
            line_break_us: LINE_BREAK_US,
            priority_unit_us: PRIORITY_UNIT_US,
        }
    }

    /// The priority backoff for a node with priority `priority`
    pub const fn priority_delay_us(&self, priority: u8) -> u32 {
        self.priority_unit_us * priority as u32
    }
}

impl Default for BusTiming {
    fn default() -> Self {
        Self::new()
    }
}
