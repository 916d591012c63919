//! Hardware access traits
//!
//! The protocol logic never touches registers. A board support layer implements these traits over
//! its UART, edge interrupt and one-shot timer, and passes them into the interrupt entry points.

/// A transition of the bus line, seen by the edge detection interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    /// The line went to its idle (mark) level
    Rise,
    /// The line left its idle level, e.g. a start bit
    Fall,
}

/// The serial peripheral attached to the bus
pub trait ByteChannel {
    /// Load a byte into the transmit data register
    fn write_byte(&mut self, byte: u8);
    /// Enable the data register empty interrupt, so that `on_transmit_ready` gets called
    fn start_transmit(&mut self);
    /// Disable the data register empty interrupt
    fn stop_transmit(&mut self);
    /// Enable the receiver and transmitter
    fn enable_rx_tx(&mut self);
    /// Disable the receiver and transmitter
    fn disable_rx_tx(&mut self);
    /// Take the TX pin away from the UART and drive it high
    ///
    /// The line driver inverts, so this holds the bus in a line break until `enable_rx_tx` hands
    /// the pin back to the UART.
    fn force_tx_idle(&mut self);
    /// Turn the activity indicator on or off
    fn set_activity(&mut self, _on: bool) {}
}

/// A one-shot timer driving bus arbitration
pub trait BusTimer {
    /// (Re)start the timer. When it expires, `on_timer_expired` must be called once.
    fn start(&mut self, delay_us: u32);
}
