//! Block2 option descriptor
//!
//! A block descriptor carries the block number (NUM), the more flag (M) and the
//! size exponent (SZX). On the wire it is the unsigned integer
//! `NUM << 4 | M << 3 | SZX`; the block size is `2^(SZX + 4)` bytes.

use core::fmt;
use core::str::FromStr;

use crate::errors::BlockError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

const SZX_BITS: u32 = 3;
const M_BITS: u32 = 1;
const SZX_OFFSET: u32 = 4;

/// Largest size exponent accepted over datagram transports (1024 bytes)
pub const LARGEST_SZX: u8 = 6;

/// Largest block number a three-byte Block2 option can carry
pub const MAX_BLOCK_NUM: u32 = (1 << 20) - 1;

// ----------------------------------------------------------------------------
// Block
// ----------------------------------------------------------------------------

/// Block-wise transfer descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Block {
    /// Block number, relative to the block size below
    pub num: u32,
    /// Whether more blocks follow this one
    pub more: bool,
    /// Size exponent
    pub szx: u8,
}

impl Block {
    pub fn new(num: u32, more: bool, szx: u8) -> Result<Self, BlockError> {
        if szx > LARGEST_SZX {
            return Err(BlockError::InvalidSzx {
                szx,
                max: LARGEST_SZX,
            });
        }
        if num > MAX_BLOCK_NUM {
            return Err(BlockError::NumOutOfRange {
                num,
                max: MAX_BLOCK_NUM,
            });
        }
        Ok(Self { num, more, szx })
    }

    /// Descriptor of the following block at the same size
    pub fn next(&self) -> Result<Self, BlockError> {
        Self::new(self.num.saturating_add(1), self.more, self.szx)
    }

    /// Decode the integer option value
    pub fn from_value(value: u32) -> Result<Self, BlockError> {
        let num = value >> (SZX_BITS + M_BITS);
        let more = (value >> SZX_BITS) & 1 == 1;
        let szx = (value & 0b111) as u8;
        Self::new(num, more, szx)
    }

    /// Encode as the integer option value
    pub fn to_value(&self) -> u32 {
        (self.num << (SZX_BITS + M_BITS)) | (u32::from(self.more) << SZX_BITS) | u32::from(self.szx)
    }

    /// Block size in bytes
    pub fn size(&self) -> usize {
        1usize << (u32::from(self.szx) + SZX_OFFSET)
    }

    /// Byte offset of this block within the whole representation
    pub fn offset(&self) -> usize {
        self.num as usize * self.size()
    }

    pub fn is_first(&self) -> bool {
        self.num == 0
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.num, u8::from(self.more), self.size())
    }
}

impl FromStr for Block {
    type Err = BlockError;

    /// Parse the `NUM/M/SIZE` form, e.g. `2/1/256`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BlockError::Malformed {
            value: s.to_string(),
        };

        let parts: Vec<&str> = s.split('/').collect();
        let [num, more, size] = parts.as_slice() else {
            return Err(malformed());
        };

        let num: u32 = num.trim().parse().map_err(|_| malformed())?;
        let more = match more.trim() {
            "0" => false,
            "1" => true,
            _ => return Err(malformed()),
        };
        let size: usize = size.trim().parse().map_err(|_| malformed())?;
        if !size.is_power_of_two() || size < 16 {
            return Err(malformed());
        }
        let szx = (size.trailing_zeros() - SZX_OFFSET) as u8;

        Block::new(num, more, szx)
    }
}
