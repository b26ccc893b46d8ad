//! Transfer completion signal.
//!
//! Ports that run buffered transfers over DMA get their end-of-transfer
//! notification from interrupt context. This module provides the one-shot
//! flag that carries the notification to the waiting caller: the interrupt
//! handler is the single producer, the blocked transport call the single
//! consumer.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{BusError, BusResult};

/// One-shot completion flag for an in-flight transfer.
///
/// The waiting side arms it with [`reset`](Self::reset) before starting the
/// transfer, then parks in [`wait`](Self::wait); the interrupt handler calls
/// [`complete`](Self::complete). There is no cancellation: an abandoned wait
/// simply runs its spin budget out.
#[derive(Debug)]
pub struct TransferSignal {
    done: AtomicBool,
}

impl TransferSignal {
    /// Create a signal in the completed state (no transfer pending)
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(true),
        }
    }

    /// Arm the signal for a new transfer
    #[inline]
    pub fn reset(&self) {
        self.done.store(false, Ordering::Release);
    }

    /// Mark the transfer complete. Called from interrupt context.
    #[inline]
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Check completion without blocking
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Busy-wait until the transfer completes or `spin_budget` polls elapse
    pub fn wait(&self, spin_budget: u32) -> BusResult<()> {
        for _ in 0..spin_budget {
            if self.done.load(Ordering::Acquire) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(BusError::Timeout)
    }
}

impl Default for TransferSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_signal_is_complete() {
        let signal = TransferSignal::new();
        assert!(signal.is_complete());
        assert_eq!(signal.wait(1), Ok(()));
    }

    #[test]
    fn test_armed_signal_times_out() {
        let signal = TransferSignal::new();
        signal.reset();
        assert!(!signal.is_complete());
        assert_eq!(signal.wait(64), Err(BusError::Timeout));
    }

    #[test]
    fn test_completed_signal_releases_waiter() {
        let signal = TransferSignal::new();
        signal.reset();
        signal.complete();
        assert_eq!(signal.wait(1), Ok(()));
    }

    #[test]
    fn test_signal_rearms() {
        let signal = TransferSignal::new();
        signal.reset();
        signal.complete();
        signal.reset();
        assert_eq!(signal.wait(8), Err(BusError::Timeout));
    }
}
