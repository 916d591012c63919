//! LNCV programming messages
//!
//! LNCV (LocoNet Configuration Variable) requests carry a 12 byte payload inside a PEER_XFER or
//! IMM_PACKET frame. Multi-byte fields are little endian. Because data bytes on the wire may not
//! have their high bit set, the high bits of payload bytes 5 through 11 are stripped before
//! sending and carried in byte 4, bit `i` holding the high bit of byte `5 + i`.
//!
//! | Byte   | Field        |
//! | ------ | ------------ |
//! | 0      | source       |
//! | 1..3   | destination  |
//! | 3      | request id   |
//! | 4      | high bits    |
//! | 5..7   | device class |
//! | 7..9   | lncv number  |
//! | 9..11  | lncv value   |
//! | 11     | flags        |
use crate::constants::lncv::{destination, flags, request, source};
use crate::constants::opcodes::OPC_PEER_XFER;
use crate::messages::{Message, MessageError};

/// Size of the LNCV payload
pub const CV_PAYLOAD_LEN: usize = 12;

const MSB_INDEX: usize = 4;
const MSB_FIRST: usize = 5;
const MSB_COUNT: usize = 7;

/// Restore the high bits of bytes 5..12 from the bits stored in byte 4
pub fn restore_high_bits(payload: &mut [u8; CV_PAYLOAD_LEN]) {
    let msb = payload[MSB_INDEX];
    for i in 0..MSB_COUNT {
        if msb & (1 << i) != 0 {
            payload[MSB_FIRST + i] |= 0x80;
        }
    }
}

/// Move the high bits of bytes 5..12 into byte 4, leaving every byte 7-bit clean
pub fn strip_high_bits(payload: &mut [u8; CV_PAYLOAD_LEN]) {
    let mut msb = 0;
    for i in 0..MSB_COUNT {
        if payload[MSB_FIRST + i] & 0x80 != 0 {
            msb |= 1 << i;
            payload[MSB_FIRST + i] &= 0x7F;
        }
    }
    payload[MSB_INDEX] = msb;
}

/// Status codes returned in a long acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AckCode {
    /// Unspecified failure
    ErrorGeneric = 0,
    /// The LNCV number does not exist
    OutOfRange = 1,
    /// The LNCV may not be written
    ReadOnly = 2,
    /// The value is not acceptable for this LNCV
    InvalidValue = 3,
    /// Success
    Ok = 0x7F,
}

impl From<AckCode> for u8 {
    fn from(value: AckCode) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for AckCode {
    type Error = MessageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AckCode::ErrorGeneric),
            1 => Ok(AckCode::OutOfRange),
            2 => Ok(AckCode::ReadOnly),
            3 => Ok(AckCode::InvalidValue),
            0x7F => Ok(AckCode::Ok),
            _ => Err(MessageError::InvalidField),
        }
    }
}

/// What an incoming request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CvRequest {
    /// Enter programming mode
    ProgrammingOn,
    /// Leave programming mode
    ProgrammingOff,
    /// Write an LNCV
    Write,
    /// Read an LNCV
    Read,
}

/// A decoded LNCV payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CvMessage {
    /// Who sent this message
    pub source: u8,
    /// Who it is addressed to
    pub destination: u16,
    /// The request ID
    pub request_id: u8,
    /// The high bit byte as received
    pub msb: u8,
    /// Device class of the module being programmed
    pub device_class: u16,
    /// LNCV number
    pub lncv_number: u16,
    /// LNCV value
    pub lncv_value: u16,
    /// Flags
    pub flags: u8,
}

impl CvMessage {
    /// Decode a payload as received from the wire, restoring high bits
    pub fn from_payload(payload: &[u8]) -> Result<Self, MessageError> {
        let mut data: [u8; CV_PAYLOAD_LEN] =
            payload.try_into().map_err(|_| MessageError::Truncated {
                expected: CV_PAYLOAD_LEN,
                actual: payload.len(),
            })?;
        restore_high_bits(&mut data);
        Ok(Self::from_raw(&data))
    }

    /// Decode a payload whose high bits are already in place
    pub fn from_raw(data: &[u8; CV_PAYLOAD_LEN]) -> Self {
        Self {
            source: data[0],
            destination: u16::from_le_bytes([data[1], data[2]]),
            request_id: data[3],
            msb: data[4],
            device_class: u16::from_le_bytes([data[5], data[6]]),
            lncv_number: u16::from_le_bytes([data[7], data[8]]),
            lncv_value: u16::from_le_bytes([data[9], data[10]]),
            flags: data[11],
        }
    }

    /// Encode the fields without touching high bits
    pub fn to_raw(&self) -> [u8; CV_PAYLOAD_LEN] {
        let mut data = [0; CV_PAYLOAD_LEN];
        data[0] = self.source;
        data[1..3].copy_from_slice(&self.destination.to_le_bytes());
        data[3] = self.request_id;
        data[4] = self.msb;
        data[5..7].copy_from_slice(&self.device_class.to_le_bytes());
        data[7..9].copy_from_slice(&self.lncv_number.to_le_bytes());
        data[9..11].copy_from_slice(&self.lncv_value.to_le_bytes());
        data[11] = self.flags;
        data
    }

    /// Encode for the wire, moving high bits into the msb byte
    pub fn to_payload(&self) -> [u8; CV_PAYLOAD_LEN] {
        let mut data = self.to_raw();
        strip_high_bits(&mut data);
        data
    }

    /// Classify the request
    ///
    /// The flag byte takes precedence, so a write with PROG_ON set is a programming mode request.
    pub fn request(&self) -> CvRequest {
        if self.flags == flags::PROG_ON {
            CvRequest::ProgrammingOn
        } else if self.flags == flags::PROG_OFF {
            CvRequest::ProgrammingOff
        } else if self.request_id == request::CFG_WRITE {
            CvRequest::Write
        } else {
            CvRequest::Read
        }
    }

    /// Build the response to this request, reporting `value`
    pub fn read_response(&self, value: u16) -> CvMessage {
        let destination = if self.source == source::KPU {
            destination::UB_KPU
        } else {
            self.source as u16
        };
        CvMessage {
            source: source::MODULE,
            destination,
            request_id: request::CFG_READ,
            msb: 0,
            device_class: self.device_class,
            lncv_number: self.lncv_number,
            lncv_value: value,
            flags: 0,
        }
    }

    /// Wrap in a PEER_XFER frame
    pub fn to_message(&self) -> Result<Message, MessageError> {
        Message::new(OPC_PEER_XFER, &self.to_payload())
    }
}

/// Parameters of the LNCV store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LncvConfig {
    /// Number of LNCV slots
    pub cv_count: u16,
    /// Device class which requests must match, and which is stamped into LNCV 1
    pub device_class: u16,
    /// Address reported until LNCV 0 has been written
    pub initial_address: u16,
    /// Priority reported until LNCV 2 has been written
    pub initial_priority: u8,
}

impl LncvConfig {
    /// The default configuration
    pub const fn new() -> Self {
        use crate::constants::lncv::*;
        Self {
            cv_count: CV_COUNT,
            device_class: DEVICE_CLASS,
            initial_address: INITIAL_ADDRESS,
            initial_priority: INITIAL_PRIORITY,
        }
    }
}

impl Default for LncvConfig {
    fn default() -> Self {
        Self::new()
    }
}
