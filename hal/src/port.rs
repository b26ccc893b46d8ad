//! SPI transport port.
//!
//! This module defines the trait a board crate implements on top of its SPI
//! peripheral, plus the scoped chip-select guard the protocol engine uses to
//! keep the select line released on every exit path.

use core::ops::{Deref, DerefMut};

use crate::{BusResult, Millis};

/// Idle filler byte. MOSI rests high between frames, and the card clocks
/// response bytes out while the host transmits this value.
pub const FILLER: u8 = 0xFF;

/// Clock regime requested from the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockClass {
    /// Slow clock for card negotiation (100-400 kHz)
    Init,
    /// Full-speed clock for data transfer
    Operational,
}

/// Blocking SPI port with chip-select control.
///
/// Implementations may exchange bytes synchronously by polling a busy flag,
/// or run buffered transfers over DMA and park on a [`TransferSignal`]
/// completed from interrupt context; either way each call returns only once
/// the transfer is done or the wait budget has elapsed.
///
/// [`TransferSignal`]: crate::signal::TransferSignal
pub trait SpiPort {
    /// Assert the chip-select line
    fn select(&mut self);

    /// Release the chip-select line
    fn deselect(&mut self);

    /// Exchange one byte: transmit `out`, return the byte clocked in
    fn exchange_byte(&mut self, out: u8, timeout: Millis) -> BusResult<u8>;

    /// Transmit a buffer, discarding whatever is clocked in
    fn write_bytes(&mut self, buf: &[u8], timeout: Millis) -> BusResult<()>;

    /// Fill a buffer from the line while transmitting filler bytes
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Millis) -> BusResult<()>;

    /// Switch the clock divider regime
    fn set_clock(&mut self, class: ClockClass);

    /// Receive one byte by clocking out filler
    #[inline]
    fn receive_byte(&mut self, timeout: Millis) -> BusResult<u8> {
        self.exchange_byte(FILLER, timeout)
    }

    /// Power-on wake train.
    ///
    /// Clocks out `groups` filler bytes (8 clocks each) with chip-select
    /// released. The card needs 74 or more clocks after power-up before it
    /// accepts its first command, so callers pass at least 10 groups.
    fn wake(&mut self, groups: usize, timeout: Millis) -> BusResult<()> {
        log::trace!("port wake: {} filler bytes", groups);
        self.deselect();
        for _ in 0..groups {
            self.exchange_byte(FILLER, timeout)?;
        }
        Ok(())
    }
}

/// Scoped chip-select.
///
/// Asserts the select line on construction and releases it when dropped, so
/// early `?` returns inside a protocol exchange cannot leave the card
/// selected. Dereferences to the underlying port.
pub struct Selection<'a, P: SpiPort + ?Sized> {
    port: &'a mut P,
}

impl<'a, P: SpiPort + ?Sized> Selection<'a, P> {
    /// Assert chip-select and return the guard
    pub fn new(port: &'a mut P) -> Self {
        port.select();
        Self { port }
    }
}

impl<P: SpiPort + ?Sized> Drop for Selection<'_, P> {
    fn drop(&mut self) {
        self.port.deselect();
    }
}

impl<P: SpiPort + ?Sized> Deref for Selection<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.port
    }
}

impl<P: SpiPort + ?Sized> DerefMut for Selection<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.port
    }
}

impl<P: SpiPort + ?Sized> core::fmt::Debug for Selection<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Selection")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BusError;

    /// Port that records select/deselect transitions.
    struct TracePort {
        selected: bool,
        selects: u32,
        deselects: u32,
        bytes_out: u32,
    }

    impl TracePort {
        fn new() -> Self {
            Self {
                selected: false,
                selects: 0,
                deselects: 0,
                bytes_out: 0,
            }
        }
    }

    impl SpiPort for TracePort {
        fn select(&mut self) {
            self.selected = true;
            self.selects += 1;
        }

        fn deselect(&mut self) {
            self.selected = false;
            self.deselects += 1;
        }

        fn exchange_byte(&mut self, _out: u8, _timeout: Millis) -> BusResult<u8> {
            self.bytes_out += 1;
            Ok(FILLER)
        }

        fn write_bytes(&mut self, buf: &[u8], _timeout: Millis) -> BusResult<()> {
            self.bytes_out += buf.len() as u32;
            Ok(())
        }

        fn read_bytes(&mut self, _buf: &mut [u8], _timeout: Millis) -> BusResult<()> {
            Ok(())
        }

        fn set_clock(&mut self, _class: ClockClass) {}
    }

    #[test]
    fn test_selection_releases_on_drop() {
        let mut port = TracePort::new();
        {
            let _sel = Selection::new(&mut port);
        }
        assert!(!port.selected);
        assert_eq!(port.selects, 1);
        assert_eq!(port.deselects, 1);
    }

    #[test]
    fn test_selection_releases_on_early_return() {
        fn failing_exchange(port: &mut TracePort) -> BusResult<()> {
            let mut sel = Selection::new(port);
            sel.exchange_byte(0x40, 1)?;
            Err(BusError::Timeout)
        }

        let mut port = TracePort::new();
        assert_eq!(failing_exchange(&mut port), Err(BusError::Timeout));
        assert!(!port.selected);
    }

    #[test]
    fn test_wake_runs_with_chip_select_released() {
        let mut port = TracePort::new();
        port.selected = true;
        port.wake(10, 1).unwrap();
        assert!(!port.selected);
        assert_eq!(port.bytes_out, 10);
    }
}
