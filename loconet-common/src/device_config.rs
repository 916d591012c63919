//! Device config file
//!
//! A DeviceConfig is created from a TOML file, and describes how a node is wired to its bus and
//! which defaults it reports before it has been programmed.
//!
//! # An example TOML file
//!
//! ```toml
//! # Only the command station should set this
//! master = false
//!
//! [timing]
//! carrier_detect_us = 1200
//! master_delay_us = 360
//! line_break_us = 900
//! priority_unit_us = 60
//!
//! [lncv]
//! cv_count = 30
//! device_class = 0x04BA
//! initial_address = 3
//! initial_priority = 5
//!
//! [hardware]
//! serial_unit = 0
//! rx_pad = 3
//! tx_pin = "PA10"
//! rx_pin = "PA11"
//! edge_pin = "PA11"
//! edge_interrupt = 11
//! timer_unit = 3
//! activity_led = "PA17"
//! ```
//!
//! All sections are optional. Timing and LNCV values default to the standard values in
//! [`constants`](crate::constants).
use serde::{de::Error, Deserialize};
use snafu::ResultExt as _;
use snafu::Snafu;

use crate::address::{DeviceAddress, Priority};
use crate::lncv::LncvConfig;
use crate::timing::BusTiming;

/// Error returned when loading a device config fails
#[derive(Debug, Snafu)]
pub enum LoadError {
    /// An IO error occured while reading the file
    #[snafu(display("IO error: {source}"))]
    Io {
        /// The underlying IO error
        source: std::io::Error,
    },
    /// An error occured in the TOML parser
    #[snafu(display("Toml parse error: {source}"))]
    TomlParsing {
        /// The toml error which led to this error
        source: toml::de::Error,
    },
    /// The initial address cannot be stored in LNCV 0
    #[snafu(display("Initial address {value} is out of range"))]
    InvalidAddress {
        /// The configured value
        value: u16,
    },
    /// The initial priority cannot be stored in LNCV 2
    #[snafu(display("Initial priority {value} is out of range"))]
    InvalidPriority {
        /// The configured value
        value: u8,
    },
    /// Fewer LNCVs than the address, marker and priority slots
    #[snafu(display("cv_count must be at least 3, got {value}"))]
    TooFewCvs {
        /// The configured value
        value: u16,
    },
}

/// A GPIO pin, written as e.g. "PA04" in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConfig {
    /// Port letter
    pub port: char,
    /// Pin number within the port
    pub pin: u8,
}

impl<'de> serde::Deserialize<'de> for PinConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let upper = s.to_uppercase();
        let mut chars = upper.chars();
        let port = match (chars.next(), chars.next()) {
            (Some('P'), Some(port)) if port.is_ascii_alphabetic() => port,
            _ => {
                return Err(D::Error::custom(format!(
                    "Invalid pin: {} (expected e.g. 'PA04')",
                    s
                )))
            }
        };
        let pin = chars
            .as_str()
            .parse::<u8>()
            .ok()
            .filter(|p| *p < 32)
            .ok_or_else(|| D::Error::custom(format!("Invalid pin number in '{}'", s)))?;
        Ok(PinConfig { port, pin })
    }
}

/// Peripheral wiring of the bus interface
#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct HardwareConfig {
    /// Index of the serial peripheral used for the bus
    pub serial_unit: u8,
    /// Which pad of the serial peripheral is used for RX
    pub rx_pad: u8,
    /// Pin driving the bus transmitter
    pub tx_pin: PinConfig,
    /// Pin connected to the bus receiver
    pub rx_pin: PinConfig,
    /// Pin used to detect bus edges, usually the same as `rx_pin`
    pub edge_pin: PinConfig,
    /// External interrupt line for `edge_pin`
    pub edge_interrupt: u8,
    /// Index of the timer used for arbitration delays
    pub timer_unit: u8,
    /// Optional LED lit during bus activity
    #[serde(default)]
    pub activity_led: Option<PinConfig>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
/// Device configuration structure
pub struct DeviceConfig {
    /// True if this node is the bus master (command station)
    #[serde(default)]
    pub master: bool,

    /// Arbitration delays
    #[serde(default)]
    pub timing: BusTiming,

    /// LNCV store parameters and factory defaults
    #[serde(default)]
    pub lncv: LncvConfig,

    /// Board wiring
    #[serde(default)]
    pub hardware: Option<HardwareConfig>,
}

impl DeviceConfig {
    /// Try to read a device config from a file
    pub fn load(config_path: impl AsRef<std::path::Path>) -> Result<Self, LoadError> {
        let config_str = std::fs::read_to_string(&config_path).context(IoSnafu)?;
        Self::load_from_str(&config_str)
    }

    /// Try to read a config from a &str
    pub fn load_from_str(config_str: &str) -> Result<Self, LoadError> {
        let config: DeviceConfig = toml::from_str(config_str).context(TomlParsingSnafu)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LoadError> {
        let lncv = &self.lncv;
        if DeviceAddress::new(lncv.initial_address).is_err() {
            return InvalidAddressSnafu {
                value: lncv.initial_address,
            }
            .fail();
        }
        if Priority::new(lncv.initial_priority).is_err() {
            return InvalidPrioritySnafu {
                value: lncv.initial_priority,
            }
            .fail();
        }
        if lncv.cv_count < 3 {
            return TooFewCvsSnafu {
                value: lncv.cv_count,
            }
            .fail();
        }
        Ok(())
    }
}
