//! Constants defining opcodes and special values

/// Opcode bytes for the messages this stack sends or listens for
///
/// The three high bits of an opcode select its frame length (see
/// [`FrameClass`](crate::messages::FrameClass)), the low five bits are the opcode number used to
/// dispatch received messages.
pub mod opcodes {
    /// Global power on
    pub const OPC_GPON: u8 = 0x83;
    /// Long acknowledge of a previous request
    pub const OPC_LONG_ACK: u8 = 0xB4;
    /// Peer to peer transfer, used for LNCV programming
    pub const OPC_PEER_XFER: u8 = 0xE5;
    /// Slot data response, used to close a programming sequence
    pub const OPC_RD_SL_DATA: u8 = 0xE7;
    /// Immediate packet, also used for LNCV programming by some command stations
    pub const OPC_IMM_PACKET: u8 = 0xED;
    /// Write slot data, used to open a programming sequence
    pub const OPC_WR_SL_DATA: u8 = 0xEF;
}

/// Special values for LNCV programming messages
pub mod lncv {
    /// Source field values
    pub mod source {
        /// A KPU, e.g. an Intellibox
        pub const KPU: u8 = 0x01;
        /// IB-Switch
        pub const IBSWITCH: u8 = 0x04;
        /// An LNCV module, i.e. us
        pub const MODULE: u8 = 0x05;
    }

    /// Destination field values
    pub mod destination {
        /// Uhlenbrock KPU
        pub const UB_KPU: u16 = 0x4B49;
        /// An LNCV module
        pub const MODULE: u16 = 0x0005;
    }

    /// Request ID field values
    pub mod request {
        /// Read a value (also the request ID used in every response)
        pub const CFG_READ: u8 = 0x1F;
        /// Write a value
        pub const CFG_WRITE: u8 = 0x20;
        /// Request a value
        pub const CFG_REQUEST: u8 = 0x21;
    }

    /// Flag field values
    pub mod flags {
        /// Enter programming mode
        pub const PROG_ON: u8 = 0x80;
        /// Leave programming mode
        pub const PROG_OFF: u8 = 0x40;
    }

    /// First payload byte of WR_SL_DATA / RD_SL_DATA messages which bracket a programming sequence
    pub const SEQUENCE_SENTINEL: u8 = 0x7C;

    /// Device class identifying this kind of module. It is also stamped into LNCV 1 once the
    /// module has been configured.
    pub const DEVICE_CLASS: u16 = 0x04BA;
    /// Address used until LNCV 0 has been written
    pub const INITIAL_ADDRESS: u16 = 0x03;
    /// Priority used until LNCV 2 has been written
    pub const INITIAL_PRIORITY: u8 = 0x05;
    /// Number of LNCV slots
    pub const CV_COUNT: u16 = 0x1E;
}

/// Bus timing, in microseconds. One bit time is 60us at 16666 baud.
pub mod timing {
    /// Idle time required before the bus is considered free (20 bit times)
    pub const CARRIER_DETECT_US: u32 = 1200;
    /// Additional wait for every device that is not the bus master (6 bit times)
    pub const MASTER_DELAY_US: u32 = 360;
    /// Duration of a line break after a collision (15 bit times)
    pub const LINE_BREAK_US: u32 = 900;
    /// Backoff per unit of configured priority (1 bit time)
    pub const PRIORITY_UNIT_US: u32 = 60;
}
