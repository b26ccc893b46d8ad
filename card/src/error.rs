//! Error taxonomy for the protocol engine.

use ferrite_hal::BusError;

use crate::response::R1Status;

/// Result type for card protocol operations
pub type CardResult<T> = Result<T, CardError>;

/// Errors surfaced by the protocol engine.
///
/// Every caller-visible operation returns one of these; nothing is swallowed.
/// The negotiation state machine aggregates its step failures into a single
/// terminal error and leaves the session unclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardError {
    /// No valid start bit or data token arrived within the poll budget
    Timeout,
    /// The card rejected a command frame checksum
    CommandChecksum,
    /// A data block failed its trailing checksum verification
    DataChecksum,
    /// The card does not recognize the command index
    IllegalCommand,
    /// Misaligned or out-of-range block address
    AddressError,
    /// Command argument outside the accepted range
    ParameterError,
    /// Error in an erase command sequence
    EraseSequence,
    /// The interface-condition echo did not match what was sent
    ProtocolMismatch,
    /// The card never left the idle state within the init attempt budget
    InitTimeout,
    /// Operation attempted before negotiation reached the ready state
    NotReady,
    /// The card raised a status flag with no more specific classification
    GenericCard,
    /// The transport underneath failed
    Bus(BusError),
}

impl CardError {
    /// Map a response status to the single error it reports, if any.
    ///
    /// A response can raise several flags at once; the mapping is
    /// deterministic, most diagnostic flag first: illegal command, then
    /// command checksum, then address, then parameter, then erase sequence,
    /// with every remaining flag folding into the generic card error. A
    /// rejected command index explains all later flags and a checksum failure
    /// explains the argument-level ones, so each earlier entry subsumes the
    /// ones after it.
    pub fn from_r1(r1: R1Status) -> Option<Self> {
        if r1.contains(R1Status::ILLEGAL_COMMAND) {
            Some(Self::IllegalCommand)
        } else if r1.contains(R1Status::COMMAND_CRC_ERROR) {
            Some(Self::CommandChecksum)
        } else if r1.contains(R1Status::ADDRESS_ERROR) {
            Some(Self::AddressError)
        } else if r1.contains(R1Status::PARAMETER_ERROR) {
            Some(Self::ParameterError)
        } else if r1.contains(R1Status::ERASE_SEQUENCE_ERROR) {
            Some(Self::EraseSequence)
        } else if r1.any_error() {
            Some(Self::GenericCard)
        } else {
            None
        }
    }
}

impl From<BusError> for CardError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_r1_maps_to_no_error() {
        assert_eq!(CardError::from_r1(R1Status::decode(0x00)), None);
        assert_eq!(CardError::from_r1(R1Status::decode(0x01)), None);
    }

    #[test]
    fn test_single_flag_mapping() {
        assert_eq!(
            CardError::from_r1(R1Status::ILLEGAL_COMMAND),
            Some(CardError::IllegalCommand)
        );
        assert_eq!(
            CardError::from_r1(R1Status::COMMAND_CRC_ERROR),
            Some(CardError::CommandChecksum)
        );
        assert_eq!(
            CardError::from_r1(R1Status::ADDRESS_ERROR),
            Some(CardError::AddressError)
        );
        assert_eq!(
            CardError::from_r1(R1Status::PARAMETER_ERROR),
            Some(CardError::ParameterError)
        );
        assert_eq!(
            CardError::from_r1(R1Status::ERASE_SEQUENCE_ERROR),
            Some(CardError::EraseSequence)
        );
        assert_eq!(
            CardError::from_r1(R1Status::ERASE_RESET),
            Some(CardError::GenericCard)
        );
    }

    #[test]
    fn test_multi_flag_precedence() {
        // Illegal command wins over everything else raised alongside it.
        let all = R1Status::decode(0x7E);
        assert_eq!(CardError::from_r1(all), Some(CardError::IllegalCommand));

        // Without it, the checksum flag is next.
        let rest = R1Status::decode(0x7A);
        assert_eq!(CardError::from_r1(rest), Some(CardError::CommandChecksum));

        // Address beats parameter.
        let addressed =
            R1Status::ADDRESS_ERROR | R1Status::PARAMETER_ERROR | R1Status::ERASE_SEQUENCE_ERROR;
        assert_eq!(
            CardError::from_r1(addressed),
            Some(CardError::AddressError)
        );
    }

    #[test]
    fn test_bus_error_conversion() {
        let err: CardError = BusError::Timeout.into();
        assert_eq!(err, CardError::Bus(BusError::Timeout));
    }
}
