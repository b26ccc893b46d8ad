//! Negotiation state machine.
//!
//! Drives the card from power-on to a classified, ready state:
//!
//! ```text
//! Start → ResetIdle → ProbeInterface → ReadOcrInitial
//!       → AcmdInitLoop → ReadOcrFinal → Ready(class) | Failed
//! ```
//!
//! The machine runs once per session and never re-enters an earlier state
//! except through its own retry counters; a terminal failure leaves the
//! session unclassified and the caller decides whether to tear down and
//! start over. All retry counters are explicit budgets so tests can inject
//! small ones.

use ferrite_hal::{Millis, Selection, SpiPort, FILLER};

use crate::error::{CardError, CardResult};
use crate::frame::{self, CommandFrame};
use crate::response::{IfCondView, OcrView, R1Status};
use crate::session::CardClass;
use crate::WAKE_FILLER_GROUPS;

// ============================================================================
// Retry budgets
// ============================================================================

/// Explicit attempt budgets for every bounded wait in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudgets {
    /// Response poll cycles per command before giving up on the start bit
    pub response_poll: u32,
    /// Interface-condition probe attempts
    pub probe_attempts: u8,
    /// Application init-command attempts while the card stays idle
    pub init_attempts: u8,
    /// Poll cycles while waiting for a data start token
    pub token_poll: u32,
    /// Transport wait budget for a single byte or buffer exchange
    pub byte_timeout: Millis,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            response_poll: 1000,
            probe_attempts: 3,
            init_attempts: 20,
            token_poll: 1000,
            byte_timeout: 1000,
        }
    }
}

// ============================================================================
// Command exchange helpers
// ============================================================================

/// Send one command frame.
///
/// Chip-select is held for a leading filler byte plus the six frame bytes and
/// released again; the response is collected by a separate poll so the card
/// gets its post-command clocks.
pub(crate) fn send_command<P: SpiPort>(
    port: &mut P,
    index: u8,
    argument: u32,
    timeout: Millis,
) -> CardResult<()> {
    let cmd = CommandFrame::encode(index, argument);
    let mut sel = Selection::new(port);
    sel.exchange_byte(FILLER, timeout)?;
    sel.write_bytes(cmd.as_bytes(), timeout)?;
    Ok(())
}

/// Poll for a response byte with a clear start bit.
///
/// The card shifts filler until its response is ready; every poll cycle
/// clocks one byte in. Exhausting the budget is the protocol-level timeout.
pub(crate) fn wait_r1<P: SpiPort>(
    port: &mut P,
    poll_budget: u32,
    timeout: Millis,
) -> CardResult<R1Status> {
    let mut sel = Selection::new(port);
    sel.exchange_byte(FILLER, timeout)?;
    for _ in 0..poll_budget {
        let r1 = R1Status::decode(sel.receive_byte(timeout)?);
        if r1.is_response() {
            return Ok(r1);
        }
    }
    Err(CardError::Timeout)
}

/// Read the four-byte extended payload following an R1 response
pub(crate) fn read_extended<P: SpiPort>(port: &mut P, timeout: Millis) -> CardResult<[u8; 4]> {
    let mut raw = [0u8; 4];
    let mut sel = Selection::new(port);
    sel.read_bytes(&mut raw, timeout)?;
    Ok(raw)
}

// ============================================================================
// State machine
// ============================================================================

/// Run the negotiation once and classify the card.
///
/// `checksum_enabled` is the data-checksum mode carried into the
/// toggle-checksum exchange the original initialization performs before the
/// init loop. On success the returned class is terminal for the session; on
/// failure no session state has been committed.
pub(crate) fn run<P: SpiPort>(
    port: &mut P,
    checksum_enabled: bool,
    budgets: &RetryBudgets,
) -> CardResult<CardClass> {
    let timeout = budgets.byte_timeout;

    // Power-on wake train, chip-select released.
    port.wake(WAKE_FILLER_GROUPS, timeout)?;

    // ResetIdle: the card enters SPI mode when it sees the reset command
    // with chip-select asserted.
    log::debug!("negotiate: reset to idle");
    send_command(port, frame::GO_IDLE_STATE, 0, timeout)?;
    wait_r1(port, budgets.response_poll, timeout)?;

    // ProbeInterface: legacy cards reject the probe outright; v2 cards echo
    // the voltage range and check pattern back.
    let mut class = probe_interface(port, budgets)?;
    log::debug!("negotiate: probed class {:?}", class);

    // The checksum option must be settled before the init loop starts.
    let crc_arg = if checksum_enabled { frame::CRC_OPTION_ON } else { 0 };
    send_command(port, frame::CRC_ON_OFF, crc_arg, timeout)?;
    wait_r1(port, budgets.response_poll, timeout)?;

    // ReadOcrInitial: the exchange is kept for protocol timing; the payload
    // takes no part in any decision here.
    if class != CardClass::LegacyV1 {
        send_command(port, frame::READ_OCR, 0, timeout)?;
        let r1 = wait_r1(port, budgets.response_poll, timeout)?;
        if r1.is_idle() {
            let ocr = OcrView::decode(read_extended(port, timeout)?);
            log::trace!("negotiate: initial ocr {:?}", ocr);
        }
    }

    // AcmdInitLoop: keep kicking the application init command until the idle
    // flag clears; high-capacity support is advertised to every card that
    // answered the probe.
    let op_cond_arg = if class == CardClass::LegacyV1 { 0 } else { frame::HCS };
    let mut attempts = budgets.init_attempts;
    loop {
        if attempts == 0 {
            log::warn!("negotiate: card stayed idle for {} init attempts", budgets.init_attempts);
            return Err(CardError::InitTimeout);
        }
        attempts -= 1;

        send_command(port, frame::APP_CMD, 0, timeout)?;
        wait_r1(port, budgets.response_poll, timeout)?;

        send_command(port, frame::APP_SEND_OP_COND, op_cond_arg, timeout)?;
        let r1 = wait_r1(port, budgets.response_poll, timeout)?;
        if !r1.is_idle() {
            break;
        }
    }

    // ReadOcrFinal: the capacity-status bit is only valid now that the card
    // finished powering up, and only for cards that answered the probe.
    if class != CardClass::LegacyV1 {
        send_command(port, frame::READ_OCR, 0, timeout)?;
        wait_r1(port, budgets.response_poll, timeout)?;
        let ocr = OcrView::decode(read_extended(port, timeout)?);
        if ocr.high_capacity {
            class = CardClass::HighCapacityV2;
        }
    }

    log::info!("negotiate: card ready, class {:?}", class);
    Ok(class)
}

/// ProbeInterface step: up to `probe_attempts` interface-condition probes.
fn probe_interface<P: SpiPort>(port: &mut P, budgets: &RetryBudgets) -> CardResult<CardClass> {
    let timeout = budgets.byte_timeout;
    let mut attempts = budgets.probe_attempts;

    loop {
        if attempts == 0 {
            log::warn!("negotiate: interface probe exhausted its attempts");
            return Err(CardError::ProtocolMismatch);
        }
        attempts -= 1;

        send_command(port, frame::SEND_IF_COND, frame::IF_COND_ARG, timeout)?;
        match wait_r1(port, budgets.response_poll, timeout) {
            Ok(r1) if r1.contains(R1Status::ILLEGAL_COMMAND) => {
                // Card predates the probe command entirely.
                return Ok(CardClass::LegacyV1);
            }
            Ok(_) => {
                let echo = IfCondView::decode(read_extended(port, timeout)?);
                if echo.check_pattern == frame::CHECK_PATTERN {
                    if echo.voltage_accepted != frame::VHS_27_36V {
                        log::warn!(
                            "negotiate: voltage range not echoed (got {:#x})",
                            echo.voltage_accepted
                        );
                    }
                    return Ok(CardClass::StandardV2);
                }
                // Garbled echo: resend while budget remains.
                log::debug!("negotiate: check pattern mismatch, retrying probe");
            }
            Err(CardError::Timeout) => {
                log::debug!("negotiate: probe response timeout, retrying");
            }
            Err(other) => return Err(other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CardModel, SimPort};

    fn small_budgets() -> RetryBudgets {
        RetryBudgets {
            response_poll: 8,
            token_poll: 8,
            byte_timeout: 1,
            ..RetryBudgets::default()
        }
    }

    #[test]
    fn test_legacy_card_classified_by_probe_rejection() {
        let mut port = SimPort::new(CardModel::LegacyV1);
        let class = run(&mut port, false, &small_budgets()).unwrap();
        assert_eq!(class, CardClass::LegacyV1);
        // Legacy path never reads the operating-conditions register.
        assert_eq!(port.commands_seen(frame::READ_OCR), 0);
    }

    #[test]
    fn test_standard_card_classified_by_clear_capacity_bit() {
        let mut port = SimPort::new(CardModel::StandardV2);
        let class = run(&mut port, false, &small_budgets()).unwrap();
        assert_eq!(class, CardClass::StandardV2);
    }

    #[test]
    fn test_high_capacity_card_classified_by_capacity_bit() {
        let mut port = SimPort::new(CardModel::HighCapacityV2);
        let class = run(&mut port, false, &small_budgets()).unwrap();
        assert_eq!(class, CardClass::HighCapacityV2);
    }

    #[test]
    fn test_never_ready_card_times_out_after_exact_budget() {
        let mut port = SimPort::new(CardModel::NeverReady);
        let err = run(&mut port, false, &small_budgets()).unwrap_err();
        assert_eq!(err, CardError::InitTimeout);
        // Exactly the configured number of application init attempts, each
        // one a marker command plus the init command itself.
        assert_eq!(port.commands_seen(frame::APP_SEND_OP_COND), 20);
        assert_eq!(port.commands_seen(frame::APP_CMD), 20);
    }

    #[test]
    fn test_garbled_echo_exhausts_probe_budget() {
        let mut port = SimPort::new(CardModel::MismatchedEcho);
        let err = run(&mut port, false, &small_budgets()).unwrap_err();
        assert_eq!(err, CardError::ProtocolMismatch);
        assert_eq!(port.commands_seen(frame::SEND_IF_COND), 3);
    }

    #[test]
    fn test_checksum_mode_carried_into_toggle_command() {
        let mut port = SimPort::new(CardModel::StandardV2);
        run(&mut port, true, &small_budgets()).unwrap();
        assert_eq!(port.last_argument(frame::CRC_ON_OFF), Some(frame::CRC_OPTION_ON));

        let mut port = SimPort::new(CardModel::StandardV2);
        run(&mut port, false, &small_budgets()).unwrap();
        assert_eq!(port.last_argument(frame::CRC_ON_OFF), Some(0));
    }

    #[test]
    fn test_legacy_card_init_omits_capacity_support() {
        let mut port = SimPort::new(CardModel::LegacyV1);
        run(&mut port, false, &small_budgets()).unwrap();
        assert_eq!(port.last_argument(frame::APP_SEND_OP_COND), Some(0));

        let mut port = SimPort::new(CardModel::HighCapacityV2);
        run(&mut port, false, &small_budgets()).unwrap();
        assert_eq!(
            port.last_argument(frame::APP_SEND_OP_COND),
            Some(frame::HCS)
        );
    }

    #[test]
    fn test_unresponsive_card_times_out_in_reset() {
        let mut port = SimPort::new(CardModel::Unresponsive);
        let err = run(&mut port, false, &small_budgets()).unwrap_err();
        assert_eq!(err, CardError::Timeout);
    }
}
