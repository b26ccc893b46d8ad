//! Response decoding.
//!
//! Every command yields a one-byte R1 status. Two commands append a four-byte
//! payload that must be read under the view matching the command just issued:
//! the operating-conditions view after a read-OCR command, the
//! interface-condition view after an interface probe. The views are separate
//! pure decoders over the same bytes so the wrong one cannot be applied by
//! accident.

use bitflags::bitflags;

bitflags! {
    /// R1 status byte.
    ///
    /// Seven independent condition flags plus the mandatory-zero top bit.
    /// While the card is still shifting out filler the top bit reads 1, so
    /// [`is_response`](Self::is_response) doubles as the start-bit check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1Status: u8 {
        /// Card is in the idle state, running its initialization
        const IDLE_STATE = 1 << 0;
        /// An erase sequence was cleared before executing
        const ERASE_RESET = 1 << 1;
        /// Command index not recognized by the card
        const ILLEGAL_COMMAND = 1 << 2;
        /// Command frame checksum did not verify
        const COMMAND_CRC_ERROR = 1 << 3;
        /// Error in the sequence of erase commands
        const ERASE_SEQUENCE_ERROR = 1 << 4;
        /// Misaligned address for the block length
        const ADDRESS_ERROR = 1 << 5;
        /// Command argument outside the accepted range
        const PARAMETER_ERROR = 1 << 6;
        /// Mandatory zero; set while no response has started
        const START_BIT = 1 << 7;
    }
}

impl R1Status {
    /// Decode a wire byte. Any byte is structurally valid.
    #[inline]
    pub fn decode(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    /// Whether the byte is an actual response (start bit clear)
    #[inline]
    pub fn is_response(self) -> bool {
        !self.contains(Self::START_BIT)
    }

    /// Whether the card reports the idle state
    #[inline]
    pub fn is_idle(self) -> bool {
        self.contains(Self::IDLE_STATE)
    }

    /// Whether any error flag is raised
    pub fn any_error(self) -> bool {
        self.intersects(
            Self::ERASE_RESET
                | Self::ILLEGAL_COMMAND
                | Self::COMMAND_CRC_ERROR
                | Self::ERASE_SEQUENCE_ERROR
                | Self::ADDRESS_ERROR
                | Self::PARAMETER_ERROR,
        )
    }
}

// ============================================================================
// Extended response views
// ============================================================================

/// Operating-conditions register view of the four-byte extended response.
///
/// Valid only after a read-OCR command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrView {
    /// Power-up procedure has finished (bit 31)
    pub power_up_done: bool,
    /// Card-capacity-status bit; only meaningful once power-up is done
    pub high_capacity: bool,
    /// Supported voltage window, register bits 23:15 (2.7-3.6 V in steps)
    pub voltage_window: u16,
}

impl OcrView {
    /// Decode the extended payload, most significant register byte first
    pub fn decode(raw: [u8; 4]) -> Self {
        Self {
            power_up_done: raw[0] & 0x80 != 0,
            high_capacity: raw[0] & 0x40 != 0,
            voltage_window: ((raw[1] as u16) << 1) | ((raw[2] >> 7) as u16),
        }
    }
}

/// Interface-condition view of the four-byte extended response.
///
/// Valid only after an interface-condition probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfCondView {
    /// Voltage range the card accepted (argument bits 11:8 echoed)
    pub voltage_accepted: u8,
    /// Check pattern echoed from the probe argument
    pub check_pattern: u8,
}

impl IfCondView {
    /// Decode the extended payload, most significant register byte first
    pub fn decode(raw: [u8; 4]) -> Self {
        Self {
            voltage_accepted: raw[2] & 0x0F,
            check_pattern: raw[3],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
