//! Device address and transmit priority

/// Largest address which can be stored in LNCV 0
pub const MAX_ADDRESS: u16 = 0x3FE;
/// Largest transmit priority
pub const MAX_PRIORITY: u8 = 0x0F;

/// The 10-bit address of a module
///
/// LNCV 0 holds the address. Writes must be below 0x3FF, so 0x3FF never appears as a valid
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceAddress(u16);

impl DeviceAddress {
    /// Create a new address, checking range
    pub const fn new(value: u16) -> Result<Self, InvalidAddressError> {
        if value <= MAX_ADDRESS {
            Ok(DeviceAddress(value))
        } else {
            Err(InvalidAddressError)
        }
    }

    /// Create an address, clamping out of range values to [`MAX_ADDRESS`]
    pub const fn saturating(value: u16) -> Self {
        if value > MAX_ADDRESS {
            DeviceAddress(MAX_ADDRESS)
        } else {
            DeviceAddress(value)
        }
    }

    /// Get the address as a u16
    pub const fn raw(&self) -> u16 {
        self.0
    }
}

impl From<DeviceAddress> for u16 {
    fn from(value: DeviceAddress) -> Self {
        value.raw()
    }
}

impl TryFrom<u16> for DeviceAddress {
    type Error = InvalidAddressError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// The priority of a module, used to stagger bus access
///
/// Lower values win arbitration. 0 is accepted here for completeness, but LNCV 2 only accepts
/// 1 through 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Priority(u8);

impl Priority {
    /// Create a new priority, checking range
    pub const fn new(value: u8) -> Result<Self, InvalidPriorityError> {
        if value <= MAX_PRIORITY {
            Ok(Priority(value))
        } else {
            Err(InvalidPriorityError)
        }
    }

    /// Create a priority, clamping out of range values to [`MAX_PRIORITY`]
    pub const fn saturating(value: u8) -> Self {
        if value > MAX_PRIORITY {
            Priority(MAX_PRIORITY)
        } else {
            Priority(value)
        }
    }

    /// Get the priority as a u8
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// True if `value` may be written to the priority LNCV
    pub const fn is_assignable(value: u16) -> bool {
        value > 0 && value <= MAX_PRIORITY as u16
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.raw()
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidPriorityError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Returned when constructing a [`DeviceAddress`] from an out of range value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidAddressError;

impl core::fmt::Display for InvalidAddressError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid device address")
    }
}
impl core::error::Error for InvalidAddressError {}

/// Returned when constructing a [`Priority`] from an out of range value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPriorityError;

impl core::fmt::Display for InvalidPriorityError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid priority")
    }
}
impl core::error::Error for InvalidPriorityError {}
