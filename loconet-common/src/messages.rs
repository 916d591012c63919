//! Bus frame format
//!
//! Every frame starts with an opcode byte (the only byte on the wire with its high bit set) and
//! ends with a checksum byte. The top three bits of the opcode select the frame length:
//!
//! | Opcode bits 7..5 | Frame length |
//! | ---------------- | ------------ |
//! | `100`            | 2 bytes      |
//! | `101`            | 4 bytes      |
//! | `110`            | 6 bytes      |
//! | `111`            | given by the second byte |
//!
//! The checksum byte is chosen so that the XOR of every byte in the frame, including the
//! checksum, is `0xFF`.
use heapless::Vec;
use snafu::Snafu;

use crate::constants::opcodes::OPC_LONG_ACK;

/// Largest frame which can be described by the length byte of a variable length frame
pub const MAX_MESSAGE_SIZE: usize = 127;

/// Returns true if `byte` starts a frame
pub const fn is_opcode(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// The low five bits of the opcode, used to look up handlers for received messages
pub const fn opcode_number(opcode: u8) -> u8 {
    opcode & 0x1F
}

/// Compute the checksum over `bytes`
///
/// When `bytes` is a frame without its checksum, the result is the checksum byte to append.
/// When `bytes` is a complete frame, the result is 0 if the frame is intact.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0xFF, |acc, b| acc ^ b)
}

/// The length class of a frame, encoded in the top 3 bits of its opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameClass {
    /// Opcode and checksum only
    Two,
    /// Opcode, two data bytes, checksum
    Four,
    /// Opcode, four data bytes, checksum
    Six,
    /// Opcode, length byte, data, checksum
    Variable,
}

impl FrameClass {
    /// Get the class of a frame from its opcode
    ///
    /// Returns None if `opcode` is not an opcode byte.
    pub const fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode >> 5 {
            0b100 => Some(FrameClass::Two),
            0b101 => Some(FrameClass::Four),
            0b110 => Some(FrameClass::Six),
            0b111 => Some(FrameClass::Variable),
            _ => None,
        }
    }

    /// The total length of a fixed size frame, or None for variable frames
    pub const fn fixed_len(&self) -> Option<usize> {
        match self {
            FrameClass::Two => Some(2),
            FrameClass::Four => Some(4),
            FrameClass::Six => Some(6),
            FrameClass::Variable => None,
        }
    }

    /// Number of bytes before the payload
    pub const fn header_len(&self) -> usize {
        match self {
            FrameClass::Variable => 2,
            _ => 1,
        }
    }
}

/// A complete frame, including opcode, length byte for variable frames, and checksum
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    bytes: Vec<u8, MAX_MESSAGE_SIZE>,
}

impl Message {
    /// Build a frame from an opcode and payload
    ///
    /// For variable length opcodes the length byte is inserted ahead of the payload. The checksum
    /// is computed and appended.
    pub fn new(opcode: u8, payload: &[u8]) -> Result<Self, MessageError> {
        let class = FrameClass::from_opcode(opcode).ok_or(MessageError::NotAnOpcode { byte: opcode })?;
        let total = payload.len() + class.header_len() + 1;
        match class.fixed_len() {
            Some(expected) if expected != total => {
                return PayloadLengthSnafu {
                    opcode,
                    expected: expected - 2,
                    actual: payload.len(),
                }
                .fail();
            }
            None if total > MAX_MESSAGE_SIZE => {
                return MessageTooLongSnafu { length: total }.fail();
            }
            _ => (),
        }

        let mut bytes = Vec::new();
        // Capacity was checked above
        let _ = bytes.push(opcode);
        if class == FrameClass::Variable {
            let _ = bytes.push(total as u8);
        }
        let _ = bytes.extend_from_slice(payload);
        let chk = checksum(&bytes);
        let _ = bytes.push(chk);
        Ok(Self { bytes })
    }

    /// A two byte message
    pub fn two(opcode: u8) -> Result<Self, MessageError> {
        Self::new(opcode, &[])
    }

    /// A four byte message
    pub fn four(opcode: u8, arg1: u8, arg2: u8) -> Result<Self, MessageError> {
        Self::new(opcode, &[arg1, arg2])
    }

    /// A six byte message
    pub fn six(opcode: u8, args: [u8; 4]) -> Result<Self, MessageError> {
        Self::new(opcode, &args)
    }

    /// Acknowledge a request with opcode `opcode`, returning a status code
    pub fn long_ack(opcode: u8, code: u8) -> Self {
        let bytes = [OPC_LONG_ACK, opcode & 0x7F, code & 0x7F];
        let mut vec = Vec::new();
        let _ = vec.extend_from_slice(&bytes);
        let _ = vec.push(checksum(&bytes));
        Self { bytes: vec }
    }

    /// Parse a complete frame, verifying its length and checksum
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let opcode = *bytes.first().ok_or(MessageError::Truncated { expected: 2, actual: 0 })?;
        let class = FrameClass::from_opcode(opcode).ok_or(MessageError::NotAnOpcode { byte: opcode })?;
        let expected = match class.fixed_len() {
            Some(len) => len,
            None => *bytes.get(1).ok_or(MessageError::Truncated { expected: 2, actual: bytes.len() })?
                as usize,
        };
        if expected < 2 || expected > MAX_MESSAGE_SIZE {
            return MessageTooLongSnafu { length: expected }.fail();
        }
        if bytes.len() != expected {
            return TruncatedSnafu { expected, actual: bytes.len() }.fail();
        }
        if checksum(bytes) != 0 {
            return BadChecksumSnafu { opcode }.fail();
        }
        let mut vec = Vec::new();
        let _ = vec.extend_from_slice(bytes);
        Ok(Self { bytes: vec })
    }

    /// The opcode byte
    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    /// The whole frame as it appears on the wire
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total frame length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// A message is never empty, it always holds at least an opcode and checksum
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The data bytes between the header and the checksum
    pub fn payload(&self) -> &[u8] {
        let header = FrameClass::from_opcode(self.opcode())
            .map(|c| c.header_len())
            .unwrap_or(1);
        &self.bytes[header..self.bytes.len() - 1]
    }
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Message(")?;
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, ")")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Message {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Message({=[u8]:02X})", self.as_bytes())
    }
}

/// Errors building or parsing a message
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum MessageError {
    /// The first byte of a frame did not have its high bit set
    #[snafu(display("0x{byte:02X} is not an opcode"))]
    NotAnOpcode {
        /// The offending byte
        byte: u8,
    },
    /// A fixed length opcode was given the wrong number of data bytes
    #[snafu(display("Opcode 0x{opcode:02X} takes {expected} data bytes, got {actual}"))]
    PayloadLength {
        /// The opcode
        opcode: u8,
        /// Data bytes the opcode class carries
        expected: usize,
        /// Data bytes supplied
        actual: usize,
    },
    /// The frame would not fit in a variable length frame
    #[snafu(display("Message length {length} out of range"))]
    MessageTooLong {
        /// Total frame length
        length: usize,
    },
    /// Fewer or more bytes than the opcode calls for
    #[snafu(display("Expected {expected} bytes, got {actual}"))]
    Truncated {
        /// Required length
        expected: usize,
        /// Length found
        actual: usize,
    },
    /// The checksum byte did not match
    #[snafu(display("Bad checksum on message with opcode 0x{opcode:02X}"))]
    BadChecksum {
        /// Opcode of the rejected frame
        opcode: u8,
    },
    /// A message did not contain a field with a valid value
    #[snafu(display("Field value out of range"))]
    InvalidField,
}
