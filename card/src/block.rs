//! Block transfer engine.
//!
//! Once the card is classified, data moves as fixed-size blocks framed by a
//! start token and a trailing 16-bit checksum. The engine performs exactly
//! one command exchange and one framed transfer per call and never retries
//! internally; retry policy belongs to the caller.

use ferrite_hal::{Millis, Selection, SpiPort};

use crate::checksum::checksum16;
use crate::error::{CardError, CardResult};
use crate::frame;
use crate::negotiate::{send_command, wait_r1, RetryBudgets};
use crate::response::R1Status;
use crate::{BLOCK_LEN, REGISTER_LEN, START_BLOCK_TOKEN};

/// Poll for the start-data token under an already-held selection.
///
/// Idle-line filler precedes the token; every poll cycle clocks one byte in.
fn wait_for_token<P: SpiPort>(
    sel: &mut Selection<'_, P>,
    poll_budget: u32,
    timeout: Millis,
) -> CardResult<()> {
    for _ in 0..poll_budget {
        if sel.receive_byte(timeout)? == START_BLOCK_TOKEN {
            return Ok(());
        }
    }
    log::debug!("block: no start token within {} polls", poll_budget);
    Err(CardError::Timeout)
}

/// Issue a command and fail on any error flag in its response
fn command_checked<P: SpiPort>(
    port: &mut P,
    index: u8,
    argument: u32,
    budgets: &RetryBudgets,
) -> CardResult<R1Status> {
    send_command(port, index, argument, budgets.byte_timeout)?;
    let r1 = wait_r1(port, budgets.response_poll, budgets.byte_timeout)?;
    match CardError::from_r1(r1) {
        Some(err) => Err(err),
        None => Ok(r1),
    }
}

/// Read one 512-byte data block.
///
/// `address` is already translated for the session's addressing mode. The
/// chip-select line is held from token poll through the trailing checksum
/// bytes and released afterward on every exit path. The trailing checksum is
/// verified only when data-checksum mode is on.
pub(crate) fn read_block<P: SpiPort>(
    port: &mut P,
    address: u32,
    out: &mut [u8; BLOCK_LEN],
    checksum_enabled: bool,
    budgets: &RetryBudgets,
) -> CardResult<()> {
    command_checked(port, frame::READ_SINGLE_BLOCK, address, budgets)?;

    let timeout = budgets.byte_timeout;
    let mut trailer = [0u8; 2];
    {
        let mut sel = Selection::new(port);
        wait_for_token(&mut sel, budgets.token_poll, timeout)?;
        sel.read_bytes(out, timeout)?;
        sel.read_bytes(&mut trailer, timeout)?;
    }

    if checksum_enabled {
        let received = u16::from_le_bytes(trailer);
        let computed = checksum16(out);
        if received != computed {
            log::warn!(
                "block: data checksum mismatch at {:#x} ({:#06x} != {:#06x})",
                address,
                received,
                computed
            );
            return Err(CardError::DataChecksum);
        }
    }
    Ok(())
}

/// Read a 16-byte register block (identification or card-specific data).
///
/// Same token framing as a data block; the trailing checksum bytes are
/// clocked through but not verified.
pub(crate) fn read_register_block<P: SpiPort>(
    port: &mut P,
    index: u8,
    out: &mut [u8; REGISTER_LEN],
    budgets: &RetryBudgets,
) -> CardResult<()> {
    command_checked(port, index, 0, budgets)?;

    let timeout = budgets.byte_timeout;
    let mut sel = Selection::new(port);
    wait_for_token(&mut sel, budgets.token_poll, timeout)?;
    sel.read_bytes(out, timeout)?;
    let mut trailer = [0u8; 2];
    sel.read_bytes(&mut trailer, timeout)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
