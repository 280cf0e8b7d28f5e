//! File extent records (`j_file_extent_key_t` / `j_file_extent_val_t`).
//!
//! The key and value of a tree record arrive as separate slices, so a
//! [`FileExtent`] is filled in two phases that may run in either order.

use nxr_types::{
    BlockNumber, BlockSize, ByteOffset, FILE_EXTENT_FLAG_SHIFT, FILE_EXTENT_KEY_SIZE,
    FILE_EXTENT_LEN_MASK, FILE_EXTENT_VALUE_SIZE, OBJ_ID_MASK, OBJ_TYPE_SHIFT, ObjectId,
    ParseError, RECORD_TYPE_FILE_EXTENT, check_data_size, read_le_u64,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExtentKey {
    /// Owning file object identifier (low 60 bits of `obj_id_and_type`).
    pub object_id: ObjectId,
    pub logical_offset: u64,
}

impl FileExtentKey {
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        check_data_size(data.len(), FILE_EXTENT_KEY_SIZE)?;

        let obj_id_and_type = read_le_u64(data, 0)?;
        let kind = obj_id_and_type >> OBJ_TYPE_SHIFT;
        if kind != u64::from(RECORD_TYPE_FILE_EXTENT) {
            return Err(ParseError::InvalidField {
                field: "obj_id_and_type",
                reason: "record kind is not a file extent",
            });
        }

        Ok(Self {
            object_id: ObjectId(obj_id_and_type & OBJ_ID_MASK),
            logical_offset: read_le_u64(data, 8)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExtentValue {
    /// Extent length in bytes (low 56 bits of `len_and_flags`).
    pub data_size: u64,
    pub flags: u8,
    /// First physical block; zero marks a sparse extent.
    pub block_number: BlockNumber,
    pub crypto_id: u64,
}

impl FileExtentValue {
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        check_data_size(data.len(), FILE_EXTENT_VALUE_SIZE)?;

        let len_and_flags = read_le_u64(data, 0)?;
        let flags = u8::try_from(len_and_flags >> FILE_EXTENT_FLAG_SHIFT)
            .map_err(|_| ParseError::IntegerConversion { field: "flags" })?;

        Ok(Self {
            data_size: len_and_flags & FILE_EXTENT_LEN_MASK,
            flags,
            block_number: BlockNumber(read_le_u64(data, 8)?),
            crypto_id: read_le_u64(data, 16)?,
        })
    }
}

/// A file extent assembled from its key and value halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExtent {
    key: Option<FileExtentKey>,
    value: Option<FileExtentValue>,
}

impl FileExtent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode both halves of a record at once.
    pub fn from_record(key: &[u8], value: &[u8]) -> Result<Self, ParseError> {
        let mut extent = Self::new();
        extent.read_key_data(key)?;
        extent.read_value_data(value)?;
        Ok(extent)
    }

    /// Populate the key half. Fails with `AlreadySet` on a second call.
    pub fn read_key_data(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if self.key.is_some() {
            return Err(ParseError::AlreadySet { field: "extent key" });
        }
        self.key = Some(FileExtentKey::parse_from_bytes(data)?);
        Ok(())
    }

    /// Populate the value half. Fails with `AlreadySet` on a second call.
    pub fn read_value_data(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if self.value.is_some() {
            return Err(ParseError::AlreadySet {
                field: "extent value",
            });
        }
        self.value = Some(FileExtentValue::parse_from_bytes(data)?);
        Ok(())
    }

    #[must_use]
    pub fn key(&self) -> Option<&FileExtentKey> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn value(&self) -> Option<&FileExtentValue> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn object_id(&self) -> Option<ObjectId> {
        self.key.map(|k| k.object_id)
    }

    #[must_use]
    pub fn logical_offset(&self) -> Option<u64> {
        self.key.map(|k| k.logical_offset)
    }

    #[must_use]
    pub fn data_size(&self) -> Option<u64> {
        self.value.map(|v| v.data_size)
    }

    #[must_use]
    pub fn block_number(&self) -> Option<BlockNumber> {
        self.value.map(|v| v.block_number)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.key.is_some() && self.value.is_some()
    }

    /// The resolved mapping, once both halves are present.
    #[must_use]
    pub fn into_mapping(self) -> Option<ExtentMapping> {
        let key = self.key?;
        let value = self.value?;
        Some(ExtentMapping {
            object_id: key.object_id,
            logical_offset: key.logical_offset,
            block_number: value.block_number,
            data_size: value.data_size,
        })
    }
}

/// Logical file range → physical blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentMapping {
    pub object_id: ObjectId,
    pub logical_offset: u64,
    pub block_number: BlockNumber,
    pub data_size: u64,
}

impl ExtentMapping {
    /// Sparse extents have no backing blocks and read as zeros.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.block_number.0 == 0
    }

    #[must_use]
    pub fn contains_logical(&self, offset: u64) -> bool {
        offset >= self.logical_offset && offset - self.logical_offset < self.data_size
    }

    /// Physical byte range `[start, end)` covered by this extent.
    ///
    /// `None` for sparse extents or if the range overflows.
    #[must_use]
    pub fn physical_range(&self, block_size: BlockSize) -> Option<(ByteOffset, ByteOffset)> {
        if self.is_sparse() {
            return None;
        }
        let start = self.block_number.to_byte_offset(block_size)?;
        let end = start.checked_add(self.data_size)?;
        Some((start, end))
    }

    /// Physical block holding logical byte `offset`, if inside a non-sparse extent.
    #[must_use]
    pub fn physical_block_for(&self, offset: u64, block_size: BlockSize) -> Option<BlockNumber> {
        if self.is_sparse() || !self.contains_logical(offset) {
            return None;
        }
        let delta = block_size.byte_to_block(offset - self.logical_offset);
        self.block_number.0.checked_add(delta.0).map(BlockNumber)
    }
}
