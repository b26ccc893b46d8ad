//! Card session.
//!
//! The aggregate the embedding firmware owns for the lifetime of one card
//! insertion: it holds the transport port, runs negotiation once, and then
//! serves register and block reads until the card is removed. On removal or
//! an unrecoverable protocol error the caller resets the session (or drops
//! it) and starts over with a fresh insertion.

use ferrite_hal::{ClockClass, SpiPort};

use crate::block;
use crate::error::{CardError, CardResult};
use crate::frame;
use crate::negotiate::{self, send_command, wait_r1, RetryBudgets};
use crate::register::{CidRegister, CsdRegister};
use crate::{BLOCK_LEN, REGISTER_LEN};

/// Negotiated capability tier of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardClass {
    /// Negotiation has not completed
    Unclassified,
    /// Version 1.x standard-capacity card; no interface-condition support
    LegacyV1,
    /// Version 2.00 standard-capacity card
    StandardV2,
    /// Version 2.00 high- or extended-capacity card
    HighCapacityV2,
}

/// How block indices translate to command arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAddressing {
    /// Argument is a byte offset; block index times the block length
    ByteAddressed,
    /// Argument is the block index itself
    BlockAddressed,
}

/// One card insertion's worth of protocol state.
///
/// Holds the negotiated class and addressing mode. The invariant maintained
/// throughout: the session is block-addressed exactly when the card is
/// high-capacity.
#[derive(Debug)]
pub struct CardSession<P: SpiPort> {
    port: P,
    card_class: CardClass,
    block_addressing: BlockAddressing,
    checksum_enabled: bool,
    budgets: RetryBudgets,
}

impl<P: SpiPort> CardSession<P> {
    /// Create an unclassified session over a port, with default budgets
    pub fn new(port: P) -> Self {
        Self::with_budgets(port, RetryBudgets::default())
    }

    /// Create an unclassified session with explicit retry budgets
    pub fn with_budgets(port: P, budgets: RetryBudgets) -> Self {
        Self {
            port,
            card_class: CardClass::Unclassified,
            block_addressing: BlockAddressing::ByteAddressed,
            checksum_enabled: false,
            budgets,
        }
    }

    /// Negotiated card class
    #[inline]
    pub fn card_class(&self) -> CardClass {
        self.card_class
    }

    /// Addressing mode fixed by negotiation
    #[inline]
    pub fn block_addressing(&self) -> BlockAddressing {
        self.block_addressing
    }

    /// Whether data-block checksum verification is on
    #[inline]
    pub fn checksum_enabled(&self) -> bool {
        self.checksum_enabled
    }

    /// Block length in bytes: fixed while ready, zero before negotiation
    pub fn block_length(&self) -> u32 {
        if self.is_ready() {
            BLOCK_LEN as u32
        } else {
            0
        }
    }

    /// Whether negotiation has completed
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.card_class != CardClass::Unclassified
    }

    /// Run the negotiation state machine once.
    ///
    /// Drops the port to the init clock regime first. On success the class
    /// and addressing mode are committed; on failure the session stays
    /// unclassified and nothing is partially committed.
    pub fn negotiate(&mut self) -> CardResult<CardClass> {
        self.port.set_clock(ClockClass::Init);
        let class = negotiate::run(&mut self.port, self.checksum_enabled, &self.budgets)?;
        self.card_class = class;
        self.block_addressing = if class == CardClass::HighCapacityV2 {
            BlockAddressing::BlockAddressed
        } else {
            BlockAddressing::ByteAddressed
        };
        Ok(class)
    }

    /// Read one data block by block index.
    pub fn read_block(&mut self, index: u32, out: &mut [u8; BLOCK_LEN]) -> CardResult<()> {
        self.ensure_ready()?;
        let address = match self.block_addressing {
            BlockAddressing::BlockAddressed => index,
            BlockAddressing::ByteAddressed => index
                .checked_mul(BLOCK_LEN as u32)
                .ok_or(CardError::AddressError)?,
        };
        block::read_block(
            &mut self.port,
            address,
            out,
            self.checksum_enabled,
            &self.budgets,
        )
    }

    /// Read and decode the card identification register.
    pub fn read_identification(&mut self) -> CardResult<CidRegister> {
        self.ensure_ready()?;
        let mut raw = [0u8; REGISTER_LEN];
        block::read_register_block(&mut self.port, frame::SEND_CID, &mut raw, &self.budgets)?;
        Ok(CidRegister::decode(&raw))
    }

    /// Read and decode the card-specific data register.
    pub fn read_specific_data(&mut self) -> CardResult<CsdRegister> {
        self.ensure_ready()?;
        let mut raw = [0u8; REGISTER_LEN];
        block::read_register_block(&mut self.port, frame::SEND_CSD, &mut raw, &self.budgets)?;
        CsdRegister::decode(&raw)
    }

    /// Turn data-block checksum verification on or off.
    ///
    /// Before negotiation the setting is recorded and carried into the
    /// toggle-checksum exchange the state machine performs; once the card is
    /// ready the toggle command is issued immediately.
    pub fn set_data_checksum(&mut self, enabled: bool) -> CardResult<()> {
        self.checksum_enabled = enabled;
        if self.is_ready() {
            let arg = if enabled { frame::CRC_OPTION_ON } else { 0 };
            send_command(&mut self.port, frame::CRC_ON_OFF, arg, self.budgets.byte_timeout)?;
            let r1 = wait_r1(
                &mut self.port,
                self.budgets.response_poll,
                self.budgets.byte_timeout,
            )?;
            if let Some(err) = CardError::from_r1(r1) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Switch the transport clock regime.
    ///
    /// Negotiation runs slow; callers switch to the operational regime once
    /// the card is ready. The port maps the class to its divider.
    pub fn set_transport_speed_class(&mut self, class: ClockClass) {
        self.port.set_clock(class);
    }

    /// Return the session to the unclassified state (card removal path).
    pub fn reset(&mut self) {
        log::debug!("session reset to unclassified");
        self.card_class = CardClass::Unclassified;
        self.block_addressing = BlockAddressing::ByteAddressed;
    }

    /// Borrow the underlying port
    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Borrow the underlying port mutably.
    ///
    /// Meant for the embedding layer between protocol operations; exchanges
    /// must not be interleaved with an in-flight session operation.
    #[inline]
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Tear the session down and recover the port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn ensure_ready(&self) -> CardResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(CardError::NotReady)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
