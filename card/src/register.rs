//! Card identification and card-specific data registers.
//!
//! Both are 128-bit blocks fetched through the register-read transfer and
//! bit-decoded here. Wire order is most significant register byte first;
//! `raw[0]` holds bits 127:120 and the final byte carries the register's
//! internal checksum, which the transfer layer has already consumed past.

use bitflags::bitflags;

use crate::error::{CardError, CardResult};
use crate::REGISTER_LEN;

// ============================================================================
// Card identification (CID)
// ============================================================================

/// Decoded card identification register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidRegister {
    /// Manufacturer id assigned by the card association
    pub manufacturer_id: u8,
    /// Two-character OEM/application id
    pub oem_id: [u8; 2],
    /// Five-character product name
    pub product_name: [u8; 5],
    /// Product revision, binary-coded decimal major.minor
    pub product_revision: u8,
    /// Product serial number
    pub serial_number: u32,
    /// Manufacture year
    pub manufacture_year: u16,
    /// Manufacture month, 1-12
    pub manufacture_month: u8,
}

impl CidRegister {
    /// Decode a register block.
    pub fn decode(raw: &[u8; REGISTER_LEN]) -> Self {
        let mut oem_id = [0u8; 2];
        oem_id.copy_from_slice(&raw[1..3]);
        let mut product_name = [0u8; 5];
        product_name.copy_from_slice(&raw[3..8]);

        Self {
            manufacturer_id: raw[0],
            oem_id,
            product_name,
            product_revision: raw[8],
            serial_number: u32::from_be_bytes([raw[9], raw[10], raw[11], raw[12]]),
            manufacture_year: 2000 + (((raw[13] & 0x0F) as u16) << 4 | (raw[14] >> 4) as u16),
            manufacture_month: raw[14] & 0x0F,
        }
    }

    /// Product name as a string, when it is valid ASCII
    pub fn product_name_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.product_name).ok()
    }
}

// ============================================================================
// Card-specific data (CSD)
// ============================================================================

/// CSD structure version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsdVersion {
    /// Version 1.0, standard capacity
    V1,
    /// Version 2.0, high and extended capacity
    V2,
}

bitflags! {
    /// Access capability flags from the CSD.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CsdFlags: u8 {
        /// Partial-block reads allowed
        const READ_BL_PARTIAL = 1 << 3;
        /// Writes may cross physical block boundaries
        const WRITE_BLK_MISALIGN = 1 << 2;
        /// Reads may cross physical block boundaries
        const READ_BLK_MISALIGN = 1 << 1;
        /// Driver stage register implemented
        const DSR_IMP = 1 << 0;
    }
}

/// Decoded card-specific data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdRegister {
    /// Structure version; selects the device-size encoding
    pub version: CsdVersion,
    /// Data read access time, mantissa/exponent coded
    pub taac: u8,
    /// Additional read access time in clock cycles (units of 100)
    pub nsac: u8,
    /// Maximum data transfer rate, mantissa/exponent coded
    pub tran_speed: u8,
    /// Supported command-class bitmap, twelve bits
    pub command_classes: u16,
    /// Maximum read block length as a power of two
    pub read_bl_len: u8,
    /// Access capability flags
    pub flags: CsdFlags,
    /// Device size field; 12 bits for v1, 22 bits for v2
    pub c_size: u32,
    /// Device size multiplier exponent; v1 only, zero for v2
    pub c_size_mult: u8,
}

impl CsdRegister {
    /// Decode a register block.
    ///
    /// Rejects structure versions this engine does not know how to size.
    pub fn decode(raw: &[u8; REGISTER_LEN]) -> CardResult<Self> {
        let version = match raw[0] >> 6 {
            0 => CsdVersion::V1,
            1 => CsdVersion::V2,
            _ => return Err(CardError::GenericCard),
        };

        let (c_size, c_size_mult) = match version {
            CsdVersion::V1 => {
                let c_size = ((raw[6] & 0x03) as u32) << 10
                    | (raw[7] as u32) << 2
                    | (raw[8] >> 6) as u32;
                let c_size_mult = (raw[9] & 0x03) << 1 | raw[10] >> 7;
                (c_size, c_size_mult)
            }
            CsdVersion::V2 => {
                let c_size =
                    ((raw[7] & 0x3F) as u32) << 16 | (raw[8] as u32) << 8 | raw[9] as u32;
                (c_size, 0)
            }
        };

        Ok(Self {
            version,
            taac: raw[1],
            nsac: raw[2],
            tran_speed: raw[3],
            command_classes: (raw[4] as u16) << 4 | (raw[5] >> 4) as u16,
            read_bl_len: raw[5] & 0x0F,
            flags: CsdFlags::from_bits_truncate(raw[6] >> 4),
            c_size,
            c_size_mult,
        })
    }

    /// Device capacity in bytes, derived per structure version.
    pub fn capacity_bytes(&self) -> u64 {
        match self.version {
            CsdVersion::V1 => {
                (self.c_size as u64 + 1)
                    << (self.c_size_mult + 2)
                    << self.read_bl_len
            }
            CsdVersion::V2 => (self.c_size as u64 + 1) * 512 * 1024,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_decode() {
        // Manufacturer 0x03, OEM "SD", name "CARD5", rev 1.0,
        // serial 0xDEADBEEF, manufactured 2019-11.
        let raw: [u8; 16] = [
            0x03, b'S', b'D', b'C', b'A', b'R', b'D', b'5', 0x10, 0xDE, 0xAD, 0xBE, 0xEF, 0x01,
            0x3B, 0xFF,
        ];
        let cid = CidRegister::decode(&raw);
        assert_eq!(cid.manufacturer_id, 0x03);
        assert_eq!(&cid.oem_id, b"SD");
        assert_eq!(cid.product_name_str(), Some("CARD5"));
        assert_eq!(cid.product_revision, 0x10);
        assert_eq!(cid.serial_number, 0xDEAD_BEEF);
        assert_eq!(cid.manufacture_year, 2019);
        assert_eq!(cid.manufacture_month, 11);
    }

    #[test]
    fn test_csd_v1_decode() {
        // c_size 2047, c_size_mult 7, read_bl_len 9: 512 MiB.
        let mut raw = [0u8; 16];
        raw[0] = 0x00; // structure v1
        raw[1] = 0x2E; // taac
        raw[2] = 0x00;
        raw[3] = 0x32; // 25 MHz
        raw[4] = 0x5B; // command classes 0x5B5
        raw[5] = 0x59; // ccc low nibble, read_bl_len 9
        raw[6] = 0x81; // read_bl_partial, c_size[11:10] = 0b01
        raw[7] = 0xFF; // c_size[9:2]
        raw[8] = 0xC0; // c_size[1:0] = 0b11
        raw[9] = 0x03; // c_size_mult[2:1] = 0b11
        raw[10] = 0x80; // c_size_mult[0] = 1

        let csd = CsdRegister::decode(&raw).unwrap();
        assert_eq!(csd.version, CsdVersion::V1);
        assert_eq!(csd.c_size, 2047);
        assert_eq!(csd.c_size_mult, 7);
        assert_eq!(csd.read_bl_len, 9);
        assert_eq!(csd.command_classes, 0x5B5);
        assert!(csd.flags.contains(CsdFlags::READ_BL_PARTIAL));
        assert_eq!(csd.capacity_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_csd_v2_decode() {
        // c_size 16383: an 8 GiB card.
        let mut raw = [0u8; 16];
        raw[0] = 0x40; // structure v2
        raw[1] = 0x0E;
        raw[3] = 0x5A; // 50 MHz
        raw[4] = 0x5B;
        raw[5] = 0x59;
        raw[7] = 0x00;
        raw[8] = 0x3F;
        raw[9] = 0xFF;

        let csd = CsdRegister::decode(&raw).unwrap();
        assert_eq!(csd.version, CsdVersion::V2);
        assert_eq!(csd.c_size, 16383);
        assert_eq!(csd.c_size_mult, 0);
        assert_eq!(csd.capacity_bytes(), 8 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_csd_unknown_version_rejected() {
        let mut raw = [0u8; 16];
        raw[0] = 0x80; // structure field 2: reserved
        assert_eq!(CsdRegister::decode(&raw), Err(CardError::GenericCard));
    }
}
