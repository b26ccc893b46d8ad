//! Simulated card port.
//!
//! An in-tree scripted model of a card behind the transport trait, used to
//! exercise the protocol engine without hardware. The model assembles
//! command frames off the outgoing byte stream and queues the response bytes
//! a real card would shift back: idle filler, R1, extended payloads, data
//! tokens and trailing checksums. Command arrivals are counted so tests can
//! assert attempt budgets exactly.

use ferrite_hal::{BusResult, ClockClass, Millis, SpiPort, FILLER};

use crate::checksum::checksum16;
use crate::frame::{self, CommandFrame, FRAME_LEN};
use crate::{BLOCK_LEN, REGISTER_LEN, START_BLOCK_TOKEN};

/// Personality of the simulated card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardModel {
    /// Rejects the interface probe; initializes without capacity support
    LegacyV1,
    /// Echoes the probe; finishes init with the capacity bit clear
    StandardV2,
    /// Echoes the probe; finishes init with the capacity bit set
    HighCapacityV2,
    /// Echoes the probe but never leaves the idle state
    NeverReady,
    /// Answers the probe with a corrupted check pattern
    MismatchedEcho,
    /// Never drives a response byte at all
    Unresponsive,
}

/// Response byte ring. Sized for a full block transfer with framing.
struct ByteQueue {
    buf: [u8; 1024],
    head: usize,
    len: usize,
}

impl ByteQueue {
    const fn new() -> Self {
        Self {
            buf: [0; 1024],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.len < self.buf.len() {
            let tail = (self.head + self.len) % self.buf.len();
            self.buf[tail] = byte;
            self.len += 1;
        }
    }

    fn push_all(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    /// Pop the next queued byte; an empty queue reads as idle line
    fn pop(&mut self) -> u8 {
        if self.len == 0 {
            return FILLER;
        }
        let byte = self.buf[self.head];
        self.head = (self.head + 1) % self.buf.len();
        self.len -= 1;
        byte
    }
}

impl core::fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ByteQueue").field("len", &self.len).finish()
    }
}

/// Scripted card model implementing the transport trait.
#[derive(Debug)]
pub struct SimPort {
    model: CardModel,
    selected: bool,
    clock: ClockClass,
    responses: ByteQueue,

    // Command frame assembly off the outgoing stream
    frame: [u8; FRAME_LEN],
    frame_fill: usize,
    acmd_armed: bool,

    // Card state
    ready: bool,
    init_polls_done: u8,
    init_polls_needed: u8,

    // Served data
    payload: [u8; BLOCK_LEN],
    payload_crc: [u8; 2],
    register: [u8; REGISTER_LEN],
    serve_token: bool,

    // Bookkeeping for assertions
    counts: [u32; 64],
    last_args: [Option<u32>; 64],
}

impl SimPort {
    /// Create a fresh card with the given personality.
    pub fn new(model: CardModel) -> Self {
        Self {
            model,
            selected: false,
            clock: ClockClass::Init,
            responses: ByteQueue::new(),
            frame: [0; FRAME_LEN],
            frame_fill: 0,
            acmd_armed: false,
            ready: false,
            init_polls_done: 0,
            init_polls_needed: 2,
            payload: [0; BLOCK_LEN],
            payload_crc: [0; 2],
            register: [0; REGISTER_LEN],
            serve_token: true,
            counts: [0; 64],
            last_args: [None; 64],
        }
    }

    /// How many times a command index has arrived
    pub fn commands_seen(&self, index: u8) -> u32 {
        self.counts[(index & 0x3F) as usize]
    }

    /// The argument carried by the most recent arrival of a command index
    pub fn last_argument(&self, index: u8) -> Option<u32> {
        self.last_args[(index & 0x3F) as usize]
    }

    /// Stage the payload served by the next block read, with its checksum
    pub fn set_block(&mut self, payload: &[u8; BLOCK_LEN]) {
        self.payload = *payload;
        self.payload_crc = checksum16(payload).to_le_bytes();
    }

    /// Corrupt one staged payload byte after the checksum was captured
    pub fn flip_payload_byte(&mut self, index: usize) {
        self.payload[index] ^= 0x01;
    }

    /// Stage the register block served by CID/CSD reads
    pub fn set_register(&mut self, register: &[u8; REGISTER_LEN]) {
        self.register = *register;
    }

    /// Withhold the start token from subsequent transfers
    pub fn suppress_token(&mut self) {
        self.serve_token = false;
    }

    /// Current chip-select state
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Current clock regime
    pub fn clock(&self) -> ClockClass {
        self.clock
    }

    fn r1_base(&self) -> u8 {
        if self.ready {
            0x00
        } else {
            0x01
        }
    }

    /// Queue the gap filler plus an R1 byte
    fn respond_r1(&mut self, r1: u8) {
        self.responses.push(FILLER);
        self.responses.push(r1);
    }

    /// Queue the framing and body of a read transfer
    fn respond_transfer(&mut self, body_is_register: bool) {
        if !self.serve_token {
            return;
        }
        self.responses.push(FILLER);
        self.responses.push(START_BLOCK_TOKEN);
        if body_is_register {
            let register = self.register;
            self.responses.push_all(&register);
            self.responses.push_all(&[FILLER, FILLER]);
        } else {
            let payload = self.payload;
            let crc = self.payload_crc;
            self.responses.push_all(&payload);
            self.responses.push_all(&crc);
        }
    }

    fn absorb(&mut self, byte: u8) {
        if self.frame_fill == 0 {
            if !CommandFrame::is_frame_start(byte) {
                return;
            }
            self.frame[0] = byte;
            self.frame_fill = 1;
            return;
        }

        self.frame[self.frame_fill] = byte;
        self.frame_fill += 1;
        if self.frame_fill == FRAME_LEN {
            self.frame_fill = 0;
            let index = self.frame[0] & 0x3F;
            let arg =
                u32::from_be_bytes([self.frame[1], self.frame[2], self.frame[3], self.frame[4]]);
            self.execute(index, arg);
        }
    }

    fn execute(&mut self, index: u8, arg: u32) {
        self.counts[index as usize] += 1;
        self.last_args[index as usize] = Some(arg);

        if self.model == CardModel::Unresponsive {
            return;
        }

        let application = self.acmd_armed;
        self.acmd_armed = false;

        match index {
            frame::GO_IDLE_STATE => {
                self.ready = false;
                self.init_polls_done = 0;
                self.respond_r1(0x01);
            }
            frame::SEND_IF_COND => match self.model {
                CardModel::LegacyV1 => self.respond_r1(0x05),
                CardModel::MismatchedEcho => {
                    self.respond_r1(0x01);
                    self.responses.push_all(&[0x00, 0x00, frame::VHS_27_36V, 0x55]);
                }
                _ => {
                    self.respond_r1(0x01);
                    let echo = [0x00, 0x00, (arg >> 8) as u8 & 0x0F, arg as u8];
                    self.responses.push_all(&echo);
                }
            },
            frame::CRC_ON_OFF => {
                let r1 = self.r1_base();
                self.respond_r1(r1);
            }
            frame::READ_OCR => {
                let r1 = self.r1_base();
                self.respond_r1(r1);
                let mut first = 0x00;
                if self.ready {
                    first = 0x80;
                    if self.model == CardModel::HighCapacityV2 {
                        first |= 0x40;
                    }
                }
                self.responses.push_all(&[first, 0xFF, 0x80, 0x00]);
            }
            frame::APP_CMD => {
                let r1 = self.r1_base();
                self.respond_r1(r1);
                self.acmd_armed = true;
            }
            frame::APP_SEND_OP_COND if application => {
                if self.model == CardModel::NeverReady {
                    self.respond_r1(0x01);
                } else {
                    self.init_polls_done = self.init_polls_done.saturating_add(1);
                    if self.init_polls_done >= self.init_polls_needed {
                        self.ready = true;
                    }
                    let r1 = self.r1_base();
                    self.respond_r1(r1);
                }
            }
            frame::READ_SINGLE_BLOCK => {
                let r1 = self.r1_base();
                self.respond_r1(r1);
                self.respond_transfer(false);
            }
            frame::SEND_CID | frame::SEND_CSD => {
                let r1 = self.r1_base();
                self.respond_r1(r1);
                self.respond_transfer(true);
            }
            _ => {
                // Anything else is outside the model's command set.
                self.respond_r1(self.r1_base() | 0x04);
            }
        }
    }
}

impl SpiPort for SimPort {
    fn select(&mut self) {
        self.selected = true;
    }

    fn deselect(&mut self) {
        self.selected = false;
    }

    fn exchange_byte(&mut self, out: u8, _timeout: Millis) -> BusResult<u8> {
        self.absorb(out);
        Ok(self.responses.pop())
    }

    fn write_bytes(&mut self, buf: &[u8], _timeout: Millis) -> BusResult<()> {
        for &byte in buf {
            self.absorb(byte);
        }
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8], _timeout: Millis) -> BusResult<()> {
        for byte in buf.iter_mut() {
            *byte = self.responses.pop();
        }
        Ok(())
    }

    fn set_clock(&mut self, class: ClockClass) {
        self.clock = class;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_assembly_ignores_filler() {
        let mut port = SimPort::new(CardModel::StandardV2);
        port.exchange_byte(FILLER, 1).unwrap();
        port.exchange_byte(FILLER, 1).unwrap();
        let cmd = CommandFrame::encode(frame::GO_IDLE_STATE, 0);
        port.write_bytes(cmd.as_bytes(), 1).unwrap();
        assert_eq!(port.commands_seen(frame::GO_IDLE_STATE), 1);
    }

    #[test]
    fn test_response_preceded_by_gap_byte() {
        let mut port = SimPort::new(CardModel::StandardV2);
        let cmd = CommandFrame::encode(frame::GO_IDLE_STATE, 0);
        port.write_bytes(cmd.as_bytes(), 1).unwrap();
        assert_eq!(port.exchange_byte(FILLER, 1).unwrap(), FILLER);
        assert_eq!(port.exchange_byte(FILLER, 1).unwrap(), 0x01);
    }

    #[test]
    fn test_empty_queue_reads_as_idle_line() {
        let mut port = SimPort::new(CardModel::StandardV2);
        assert_eq!(port.exchange_byte(FILLER, 1).unwrap(), FILLER);
    }

    #[test]
    fn test_unresponsive_model_stays_silent() {
        let mut port = SimPort::new(CardModel::Unresponsive);
        let cmd = CommandFrame::encode(frame::GO_IDLE_STATE, 0);
        port.write_bytes(cmd.as_bytes(), 1).unwrap();
        assert_eq!(port.exchange_byte(FILLER, 1).unwrap(), FILLER);
        assert_eq!(port.commands_seen(frame::GO_IDLE_STATE), 1);
    }

    #[test]
    fn test_argument_capture() {
        let mut port = SimPort::new(CardModel::StandardV2);
        let cmd = CommandFrame::encode(frame::SEND_IF_COND, frame::IF_COND_ARG);
        port.write_bytes(cmd.as_bytes(), 1).unwrap();
        assert_eq!(port.last_argument(frame::SEND_IF_COND), Some(frame::IF_COND_ARG));
        assert_eq!(port.last_argument(frame::READ_OCR), None);
    }
}
