//! Common functionality shared among the loconet crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `loconet-node`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod atomic_cell;
pub use atomic_cell::AtomicCell;
pub mod address;
pub mod constants;
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod device_config;
pub mod lncv;
pub mod messages;
pub mod timing;
pub mod traits;

pub use address::{DeviceAddress, Priority};
pub use lncv::{AckCode, CvMessage, LncvConfig};
pub use messages::{Message, MessageError};
pub use timing::BusTiming;
