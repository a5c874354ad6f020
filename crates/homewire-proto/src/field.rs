//! Field addressing inside a frame.
//!
//! Device descriptions address fields with real numbers: the integer part of an
//! index picks a byte and the first decimal picks a bit inside it, so `10.3` is
//! bit 3 of byte 10. Sizes use the same convention (`1.0` is eight bits, `0.3`
//! is three bits, `2.0` is sixteen bits). Indices below
//! [`HEADER_FIELD_BYTES`](crate::constants::HEADER_FIELD_BYTES) address the
//! frame header, the rest address the payload.
//!
//! Internally a field is a [`FieldPos`]; [`FieldPos::from_index_size`] is the
//! only place the real-number convention is interpreted.

use crate::error::ProtoError;

/// Largest size whose bit width still fits a `u16`.
const MAX_SIZE: f64 = u16::MAX as f64 / 8.0;

/// Masks for the low `n` bits, indexed by `n`. Index 0 maps to a full byte.
pub(crate) const BIT_MASK: [u8; 9] = [0xFF, 0x01, 0x03, 0x07, 0x0F, 0x1F, 0x3F, 0x7F, 0xFF];

/// Resolved position of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPos {
    /// Frame byte, header bytes first.
    pub byte: u32,
    /// Bit offset inside `byte`, 0..=7.
    pub bit: u8,
    /// Width of the field in bits, at least 1.
    pub width: u16,
}

impl FieldPos {
    pub fn new(byte: u32, bit: u8, width: u16) -> Result<Self, ProtoError> {
        if bit > 7 || width == 0 || (bit != 0 && width > 8) {
            return Err(ProtoError::BadFieldAddress {
                index: f64::from(byte) + f64::from(bit) / 10.0,
                size: f64::from(width) / 8.0,
            });
        }
        Ok(Self { byte, bit, width })
    }

    /// Interpret a real-number index and size.
    ///
    /// Tenths are taken as `round(x * 10) % 10` with halves rounded away from
    /// zero, which is how stored device descriptions have always been read.
    pub fn from_index_size(index: f64, size: f64) -> Result<Self, ProtoError> {
        let bad = || ProtoError::BadFieldAddress { index, size };
        if !(0.0..=f64::from(u32::MAX)).contains(&index) || !(0.0..=MAX_SIZE).contains(&size) {
            return Err(bad());
        }

        let byte = index.trunc() as u32;
        let bit = ((index * 10.0).round() as u64 % 10) as u8;
        let tenths = (size * 10.0).round() as u64;

        let width = if bit != 0 || size < 0.8 {
            if size > 1.0 {
                return Err(bad());
            }
            match tenths {
                0 | 8.. => 8,
                n => n as u16,
            }
        } else {
            let bytes = size.ceil() as u64;
            let first = match tenths % 10 {
                0 | 8.. => 8,
                n => n,
            };
            let width = (bytes.max(1) - 1) * 8 + first;
            u16::try_from(width).map_err(|_| bad())?
        };

        Self::new(byte, bit, width).map_err(|_| bad())
    }

    /// Number of bytes a read of this field produces.
    #[inline]
    pub fn byte_len(self) -> usize {
        if self.bit != 0 {
            1
        } else {
            usize::from(self.width).div_ceil(8)
        }
    }

    /// Bits kept from the first (most significant) byte.
    #[inline]
    pub(crate) fn first_byte_bits(self) -> u8 {
        if self.bit != 0 {
            self.width.min(8) as u8
        } else {
            match self.width % 8 {
                0 => 8,
                n => n as u8,
            }
        }
    }

    /// Sub-byte fields, read by shifting and masking a single byte.
    #[inline]
    pub(crate) fn is_partial(self) -> bool {
        self.bit != 0 || self.width < 8
    }
}
