//! Test support for running loconet nodes against a simulated bus
pub mod sim_bus;
