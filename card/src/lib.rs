//! # Ferrite Card - SD-card SPI protocol engine
//!
//! Drives a removable memory card attached over SPI from power-on to a
//! classified, addressable state, then exchanges fixed-size data blocks with
//! integrity checking. The engine is transport-agnostic: it talks to the bus
//! through the [`SpiPort`](ferrite_hal::SpiPort) trait and never touches a
//! peripheral register itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  CardSession (façade)                │
//! ├──────────────────────────┬──────────────────────────┤
//! │  Negotiation state       │  Block transfer engine   │
//! │  machine (one-shot)      │  (CMD17 / CID / CSD)     │
//! ├──────────────────────────┴──────────────────────────┤
//! │        Frame codec · response views · registers      │
//! ├─────────────────────────────────────────────────────┤
//! │                   Checksum unit                      │
//! ├─────────────────────────────────────────────────────┤
//! │              Transport Port (ferrite-hal)            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! A session is created per card insertion, negotiated once, and used for
//! register and block reads until the card is removed. Operations are
//! strictly sequenced; there is never more than one command in flight.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod block;
pub mod checksum;
pub mod error;
pub mod frame;
pub mod negotiate;
pub mod register;
pub mod response;
pub mod session;
pub mod sim;

pub use crate::error::{CardError, CardResult};
pub use crate::negotiate::RetryBudgets;
pub use crate::register::{CidRegister, CsdRegister};
pub use crate::response::{IfCondView, OcrView, R1Status};
pub use crate::session::{BlockAddressing, CardClass, CardSession};

/// Data block length in bytes, fixed by the card command set
pub const BLOCK_LEN: usize = 512;

/// CID/CSD register block length in bytes
pub const REGISTER_LEN: usize = 16;

/// Token byte preceding the payload of a read transfer
pub const START_BLOCK_TOKEN: u8 = 0b1111_1110;

/// Filler bytes (8 clocks each) driven with chip-select released before the
/// first command; the card requires at least 74 power-on clocks
pub const WAKE_FILLER_GROUPS: usize = 10;
