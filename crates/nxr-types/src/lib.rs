#![forbid(unsafe_code)]
//! Shared vocabulary for the nxread workspace.
//!
//! Unit-carrying newtypes (blocks, object identifiers, transaction ids, byte
//! offsets), the container format constants every parser agrees on, the
//! parse-layer error type, and bounds-checked little-endian readers.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── Container format constants ──────────────────────────────────────────────

/// `NXSB` read as a little-endian u32.
pub const NX_SUPERBLOCK_MAGIC: u32 = 0x4253_584E;
/// Bytes of the fixed container superblock layout this crate decodes.
pub const NX_SUPERBLOCK_SIZE: usize = 1408;
/// Number of volume object identifier slots in the container superblock.
pub const NX_MAX_FILE_SYSTEMS: usize = 100;
pub const NX_MIN_BLOCK_SIZE: u32 = 4096;
pub const NX_MAX_BLOCK_SIZE: u32 = 65536;

/// Size of the header shared by every on-disk object.
pub const OBJECT_HEADER_SIZE: usize = 32;

/// Size of the object map header.
pub const OBJECT_MAP_SIZE: usize = 88;

/// Size of the checkpoint (ephemeral object) map header.
pub const CHECKPOINT_MAP_HEADER_SIZE: usize = 40;
/// Size of one checkpoint map entry.
pub const CHECKPOINT_MAPPING_SIZE: usize = 40;
/// Largest entry count a checkpoint map may declare.
///
/// A 4 KiB block holds the 40-byte header plus at most 101 40-byte entries.
pub const CHECKPOINT_MAP_MAX_ENTRIES: u32 = 101;

pub const FILE_EXTENT_KEY_SIZE: usize = 16;
pub const FILE_EXTENT_VALUE_SIZE: usize = 24;

// ── Object type encoding ────────────────────────────────────────────────────

/// Low 16 bits of `o_type` name the object kind.
pub const OBJECT_TYPE_MASK: u32 = 0x0000_FFFF;
/// High 16 bits of `o_type` carry storage class and flags.
pub const OBJECT_TYPE_FLAGS_MASK: u32 = 0xFFFF_0000;
pub const OBJ_STORAGETYPE_MASK: u32 = 0xC000_0000;

pub const OBJ_VIRTUAL: u32 = 0x0000_0000;
pub const OBJ_EPHEMERAL: u32 = 0x8000_0000;
pub const OBJ_PHYSICAL: u32 = 0x4000_0000;

pub const OBJECT_TYPE_NX_SUPERBLOCK: u32 = 0x0001;
pub const OBJECT_TYPE_OMAP: u32 = 0x000B;
pub const OBJECT_TYPE_CHECKPOINT_MAP: u32 = 0x000C;

/// Full `o_type` of a container superblock (ephemeral superblock).
pub const NX_SUPERBLOCK_OBJECT_TYPE: u32 = OBJ_EPHEMERAL | OBJECT_TYPE_NX_SUPERBLOCK;
/// Full `o_type` of a container object map (physical omap).
pub const OBJECT_MAP_OBJECT_TYPE: u32 = OBJ_PHYSICAL | OBJECT_TYPE_OMAP;
/// Full `o_type` of a checkpoint map (physical checkpoint map).
pub const CHECKPOINT_MAP_OBJECT_TYPE: u32 = OBJ_PHYSICAL | OBJECT_TYPE_CHECKPOINT_MAP;

/// Set on the last checkpoint map of a checkpoint.
pub const CHECKPOINT_MAP_LAST: u32 = 0x0000_0001;

// ── File-system record encoding ─────────────────────────────────────────────

pub const OBJ_ID_MASK: u64 = 0x0FFF_FFFF_FFFF_FFFF;
pub const OBJ_TYPE_SHIFT: u32 = 60;
/// Record kind of a file extent key (`APFS_TYPE_FILE_EXTENT`).
pub const RECORD_TYPE_FILE_EXTENT: u8 = 8;

pub const FILE_EXTENT_LEN_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;
pub const FILE_EXTENT_FLAG_SHIFT: u32 = 56;

// ── Newtypes ────────────────────────────────────────────────────────────────

/// Physical block address within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// Object identifier (virtual, ephemeral, or physical depending on context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// Transaction identifier stamped into every object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

/// Validated container block size (power of two in 4096..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [4096, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(NX_MIN_BLOCK_SIZE..=NX_MAX_BLOCK_SIZE).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 4096..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of bits to shift to convert between bytes and blocks.
    #[must_use]
    pub fn shift(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Convert a byte offset to a block number (truncating).
    #[must_use]
    pub fn byte_to_block(self, byte_offset: u64) -> BlockNumber {
        BlockNumber(byte_offset >> u64::from(self.shift()))
    }
}

/// Byte offset on a `ByteDevice` (pread semantics).
///
/// This is a unit-carrying wrapper to prevent mixing bytes and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Narrow to `usize`, returning `ParseError::IntegerConversion` on overflow.
    pub fn to_usize(self) -> Result<usize, ParseError> {
        usize::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "byte_offset",
        })
    }
}

impl BlockNumber {
    /// Convert this block number to its byte offset using the given block size.
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub fn to_byte_offset(self, block_size: BlockSize) -> Option<ByteOffset> {
        self.0
            .checked_mul(u64::from(block_size.get()))
            .map(ByteOffset)
    }
}

impl ObjectId {
    /// Identifier zero never names a real object.
    pub const INVALID: Self = Self(0);

    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid object type: expected {expected:#010x}, got {actual:#010x}")]
    InvalidObjectType { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field} out of bounds: {value} exceeds limit {limit}")]
    OutOfBounds {
        field: &'static str,
        value: u64,
        limit: u64,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
    #[error("{field} already set")]
    AlreadySet { field: &'static str },
    #[error("unable to allocate {field}")]
    AllocationFailed { field: &'static str },
}

/// Largest buffer length a parser accepts (the platform's signed-size maximum).
pub const MAX_DATA_SIZE: usize = isize::MAX.unsigned_abs();

fn len_as_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// Check a buffer length against a structural minimum and the signed-size maximum.
pub fn check_data_size(len: usize, minimum: usize) -> Result<(), ParseError> {
    if len > MAX_DATA_SIZE {
        return Err(ParseError::OutOfBounds {
            field: "data_size",
            value: len_as_u64(len),
            limit: len_as_u64(MAX_DATA_SIZE),
        });
    }
    if len < minimum {
        return Err(ParseError::InsufficientData {
            needed: minimum,
            offset: 0,
            actual: len,
        });
    }
    Ok(())
}

/// Like [`check_data_size`], but the record size is exact: trailing bytes are rejected.
pub fn check_record_size(len: usize, size: usize) -> Result<(), ParseError> {
    check_data_size(len, size)?;
    if len != size {
        return Err(ParseError::OutOfBounds {
            field: "record_size",
            value: len_as_u64(len),
            limit: len_as_u64(size),
        });
    }
    Ok(())
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Forward-only reader over a byte slice.
///
/// Every `take` is checked against the remaining bytes, so a run of
/// fixed-size records can be walked without manual offset arithmetic.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Start a cursor at `pos`, which must not be past the end of `data`.
    pub fn at(data: &'a [u8], pos: usize) -> Result<Self, ParseError> {
        if pos > data.len() {
            return Err(ParseError::InsufficientData {
                needed: pos,
                offset: 0,
                actual: data.len(),
            });
        }
        Ok(Self { data, pos })
    }

    /// Consume exactly `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let bytes = ensure_slice(self.data, self.pos, len)?;
        self.pos += len;
        Ok(bytes)
    }
}
