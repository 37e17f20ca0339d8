//! CRC-15 computation and validation for VAN frames
//!
//! The CRC covers the header word, the length byte and the data bytes. On
//! the wire it occupies 16 bits: the 15-bit CRC shifted left by one, so the
//! last bit of the field is always 0.

use crc::{Algorithm, Crc};

use crate::error::FrameError;
use crate::van;

/// VAN CRC-15: x^15 + x^11 + x^10 + x^9 + x^8 + x^7 + x^4 + x^3 + x^2 + 1
pub const VAN_CRC15: Algorithm<u16> = Algorithm {
    width: 15,
    poly: 0x0F9D,
    init: 0x7FFF,
    refin: false,
    refout: false,
    xorout: 0x7FFF,
    check: 0x6B39,
    residue: 0x4B15,
};

/// Computes and checks frame CRCs
pub struct CrcValidator {
    crc: Crc<u16>,
}

impl CrcValidator {
    /// Create a validator for the given CRC parameters
    pub fn new(algorithm: &'static Algorithm<u16>) -> Self {
        CrcValidator {
            crc: Crc::<u16>::new(algorithm),
        }
    }

    /// 15-bit CRC over `covered` (header word, length and data bytes)
    pub fn compute(&self, covered: &[u8]) -> u16 {
        self.crc.checksum(covered)
    }

    /// CRC as it appears in the 16-bit wire field
    pub fn field(&self, covered: &[u8]) -> u16 {
        self.compute(covered) << 1
    }

    /// Check a complete raw frame (covered bytes followed by the CRC field)
    pub fn verify(&self, raw: &[u8]) -> Result<(), FrameError> {
        // Too short to hold a header and a CRC field
        if raw.len() < van::MIN_FRAME_BYTES {
            return Err(FrameError::CrcMismatch {
                computed: 0,
                received: 0,
            });
        }

        let (covered, field) = raw.split_at(raw.len() - van::CRC_FIELD_BYTES);
        let received = u16::from_be_bytes([field[0], field[1]]);
        let computed = self.field(covered);
        if computed != received {
            return Err(FrameError::CrcMismatch { computed, received });
        }
        Ok(())
    }

    /// Try to fix a single flipped bit anywhere in a raw frame
    ///
    /// Returns the index of the repaired bit, counted from the first
    /// transmitted bit, or `None` if no single-bit change validates.
    /// The frame is left untouched when no repair is found.
    pub fn repair_single_bit(&self, raw: &mut [u8]) -> Option<usize> {
        if self.verify(raw).is_ok() {
            return None;
        }

        for index in 0..raw.len() * 8 {
            let mask = 0x80u8 >> (index % 8);
            raw[index / 8] ^= mask;
            if self.verify(raw).is_ok() {
                return Some(index);
            }
            raw[index / 8] ^= mask;
        }
        None
    }
}

impl std::fmt::Debug for CrcValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrcValidator")
            .field("algorithm", self.crc.algorithm)
            .finish()
    }
}

impl Default for CrcValidator {
    fn default() -> Self {
        Self::new(&VAN_CRC15)
    }
}
