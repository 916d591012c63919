//! A library to implement a LocoNet node in Rust
//!
//! Loconet-node implements the protocol engine of a device on a LocoNet bus: a multi-drop,
//! half-duplex serial bus with no central arbiter, where every device listens to its own
//! transmissions to detect collisions. It is intended to run on microcontrollers, so it is no_std
//! compatible and performs no heap allocation. It provides the following features:
//!
//! * *Arbitration*: carrier detect, master delay and priority delay timing, and line break recovery
//!   after a collision.
//! * *Framing*: reassembly of frames from the received byte stream, with checksum validation and
//!   resynchronization on corrupted frames.
//! * *Dispatch*: received frames are passed to handlers registered by opcode.
//! * *Transmission*: a priority queue of outgoing messages, with loop-back echo checking and
//!   automatic retry after a collision.
//! * *LNCV programming*: an [`LncvServer`] answering LNCV read, write and programming mode requests,
//!   backed by a two-phase [`PageStore`](storage::PageStore).
//!
//! # Getting Started
//!
//! ## Device Configuration
//!
//! A node can be described by a
//! [DeviceConfig](common::device_config::DeviceConfig) TOML file, see
//! [common::device_config] module docs for more info.
//!
//! ## The [`BusLink`]
//!
//! All state shared between interrupt handlers and the main loop lives in a [`BusLink`], which is
//! usually a static:
//!
//! ```ignore
//! static BUS: BusLink = BusLink::new(NodeConfig::new(), BusTiming::new());
//! ```
//!
//! The board support code implements [`ByteChannel`](common::traits::ByteChannel) over its UART
//! and [`BusTimer`](common::traits::BusTimer) over a one-shot timer, and forwards interrupts:
//!
//! ```ignore
//! fn uart_rx_irq() {
//!     let (byte, framing_error) = uart.read();
//!     BUS.on_byte_received(byte, framing_error, &mut uart, &mut timer);
//! }
//! fn uart_dre_irq() {
//!     BUS.on_transmit_ready(&mut uart);
//! }
//! fn uart_txc_irq() {
//!     BUS.on_transmit_complete(&mut uart);
//! }
//! fn edge_irq() {
//!     BUS.on_bus_edge(if rx_pin.is_high() { Edge::Rise } else { Edge::Fall }, &mut timer);
//! }
//! fn timer_irq() {
//!     BUS.on_timer_expired(&mut timer, &mut uart);
//! }
//! ```
//!
//! ## Instantiating the [`Node`] object
//!
//! The node owns the handler registrations. The LNCV server is created first, since it loads the
//! stored address and priority into the link's config:
//!
//! ```ignore
//! let server = LncvServer::new(flash_store, NoHooks, BUS.config(), LncvConfig::new())
//!     .expect("LNCV store not formatted");
//! let mut node: Node<'_, RX_BUFFER_SIZE, TX_QUEUE_DEPTH> = Node::new(&BUS);
//! node.register_lncv(&server).unwrap();
//! BUS.start(&mut timer);
//! ```
//!
//! ## Processing
//!
//! [`Node::process`] must be called from the main loop. It dispatches every complete frame and
//! starts the next transmission when the bus is free. The [`BusLink`] provides a callback which
//! can be used to wake the main loop when there is work to do.
//!
//! ```ignore
//! loop {
//!     node.process(&mut uart);
//!     wait_for_interrupt();
//! }
//! ```
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::comparison_chain)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod arbitration;
mod bus_link;
mod framer;
pub mod lncv_server;
mod node;
pub mod observers;
pub mod ring_buffer;
pub mod status;
pub mod storage;
pub mod tx_queue;

// Re-export types used by applications
pub use critical_section;
pub use loconet_common as common;

pub use bus_link::BusLink;
pub use framer::{process_one, RxOutcome};
pub use lncv_server::{CvHooks, LncvServer, NoHooks};
pub use node::{Node, LNCV_OPCODES};
pub use observers::{MessageHandler, ObserverError, ObserverRegistry};
pub use ring_buffer::RX_BUFFER_SIZE;
pub use status::{BusStatus, NodeConfig, SharedConfig, SharedStatus};
pub use tx_queue::{MessageSink, TxError, TxQueue, TX_QUEUE_DEPTH};
