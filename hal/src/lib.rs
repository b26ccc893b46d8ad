//! # Ferrite HAL - Transport Port abstraction
//!
//! This crate defines the boundary between the card protocol engine and the
//! SPI hardware underneath it. A board crate implements [`SpiPort`] on top of
//! its SPI peripheral; everything above only ever sees blocking calls with a
//! bounded wait.
//!
//! ## Design Philosophy
//!
//! The HAL is designed to be:
//! - **Minimal**: byte and buffer exchange, chip-select, clock regime
//! - **Blocking**: every operation completes or times out before returning
//! - **Exclusive**: one in-flight operation per port, enforced by scoped
//!   chip-select guards

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod port;
pub mod signal;

pub use port::{ClockClass, Selection, SpiPort, FILLER};
pub use signal::TransferSignal;

/// Result type for transport operations
pub type BusResult<T> = Result<T, BusError>;

/// Errors that can occur on the SPI transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The operation did not complete within its wait budget
    Timeout,
    /// Receive data was lost because the peripheral was not drained in time
    Overrun,
    /// The peripheral is occupied by an in-flight transfer
    Busy,
    /// The port has not been initialized
    NotInitialized,
}

/// Wait budget for a single transport operation, in milliseconds
pub type Millis = u32;
