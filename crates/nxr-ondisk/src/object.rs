//! Common object header and the Fletcher-64 object checksum.

use nxr_types::{
    OBJ_EPHEMERAL, OBJ_PHYSICAL, OBJ_STORAGETYPE_MASK, OBJ_VIRTUAL, OBJECT_HEADER_SIZE,
    OBJECT_TYPE_FLAGS_MASK, OBJECT_TYPE_MASK, ObjectId, ParseError, TransactionId, read_le_u32,
    read_le_u64,
};
use serde::{Deserialize, Serialize};

/// Bytes covered by the stored checksum itself.
const CHECKSUM_SIZE: usize = 8;

/// Header shared by every on-disk object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub checksum: u64,
    pub object_id: ObjectId,
    pub transaction_id: TransactionId,
    pub object_type: u32,
    pub object_subtype: u32,
}

/// How an object identifier is resolved to a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageClass {
    /// Resolved through the object map tree.
    Virtual,
    /// Resolved through the checkpoint map of the current checkpoint.
    Ephemeral,
    /// The identifier is the block address.
    Physical,
    /// Both storage bits set; not a valid on-disk combination.
    Reserved,
}

impl StorageClass {
    #[must_use]
    pub fn from_object_type(object_type: u32) -> Self {
        match object_type & OBJ_STORAGETYPE_MASK {
            OBJ_VIRTUAL => Self::Virtual,
            OBJ_EPHEMERAL => Self::Ephemeral,
            OBJ_PHYSICAL => Self::Physical,
            _ => Self::Reserved,
        }
    }
}

impl ObjectHeader {
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < OBJECT_HEADER_SIZE {
            return Err(ParseError::InsufficientData {
                needed: OBJECT_HEADER_SIZE,
                offset: 0,
                actual: data.len(),
            });
        }

        Ok(Self {
            checksum: read_le_u64(data, 0x00)?,
            object_id: ObjectId(read_le_u64(data, 0x08)?),
            transaction_id: TransactionId(read_le_u64(data, 0x10)?),
            object_type: read_le_u32(data, 0x18)?,
            object_subtype: read_le_u32(data, 0x1C)?,
        })
    }

    /// Object kind with storage class and flags stripped.
    #[must_use]
    pub fn kind(&self) -> u32 {
        self.object_type & OBJECT_TYPE_MASK
    }

    #[must_use]
    pub fn type_flags(&self) -> u32 {
        self.object_type & OBJECT_TYPE_FLAGS_MASK
    }

    #[must_use]
    pub fn storage_class(&self) -> StorageClass {
        StorageClass::from_object_type(self.object_type)
    }

    /// Require the full object type (kind plus storage class) to equal `expected`.
    pub fn expect_type(&self, expected: u32) -> Result<(), ParseError> {
        if self.object_type != expected {
            return Err(ParseError::InvalidObjectType {
                expected,
                actual: self.object_type,
            });
        }
        Ok(())
    }
}

/// Compute the Fletcher-64 checksum of an object block.
///
/// Covers every byte after the stored checksum, read as little-endian
/// 32-bit words. The block length must leave a whole number of words.
pub fn compute_object_checksum(block: &[u8]) -> Result<u64, ParseError> {
    if block.len() < OBJECT_HEADER_SIZE {
        return Err(ParseError::InsufficientData {
            needed: OBJECT_HEADER_SIZE,
            offset: 0,
            actual: block.len(),
        });
    }
    let payload = &block[CHECKSUM_SIZE..];
    if payload.len() % 4 != 0 {
        return Err(ParseError::InvalidField {
            field: "object_length",
            reason: "checksummed region is not a multiple of 4 bytes",
        });
    }

    let modulus = u64::from(u32::MAX);
    let mut sum1 = 0_u64;
    let mut sum2 = 0_u64;
    for word in payload.chunks_exact(4) {
        let value = u64::from(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        sum1 = (sum1 + value) % modulus;
        sum2 = (sum2 + sum1) % modulus;
    }

    let check1 = modulus - ((sum1 + sum2) % modulus);
    let check2 = modulus - ((sum1 + check1) % modulus);
    Ok((check2 << 32) | check1)
}

/// Compare the stored checksum of `block` with its computed Fletcher-64.
///
/// Returns the computed value on mismatch so callers can report both.
pub fn verify_object_checksum(block: &[u8]) -> Result<Result<(), u64>, ParseError> {
    let stored = read_le_u64(block, 0)?;
    let computed = compute_object_checksum(block)?;
    if stored == computed {
        Ok(Ok(()))
    } else {
        Ok(Err(computed))
    }
}
