use crate::object::ObjectHeader;
use nxr_types::{
    BlockNumber, BlockSize, NX_MAX_FILE_SYSTEMS, NX_SUPERBLOCK_MAGIC, NX_SUPERBLOCK_OBJECT_TYPE,
    NX_SUPERBLOCK_SIZE, ObjectId, ParseError, TransactionId, check_data_size, read_fixed,
    read_le_u32, read_le_u64,
};
use serde::{Deserialize, Serialize};

const NX_FS_OID_OFFSET: usize = 0xB8;
/// High bit of the checkpoint area block counts: area is not contiguous.
const NX_CHECKPOINT_AREA_NONCONTIGUOUS: u32 = 0x8000_0000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSuperblock {
    pub header: ObjectHeader,
    pub magic: u32,
    pub block_size: u32,
    pub number_of_blocks: u64,
    pub features: u64,
    pub readonly_compatible_features: u64,
    pub incompatible_features: u64,
    pub uuid: [u8; 16],
    pub next_object_id: ObjectId,
    pub next_transaction_id: TransactionId,
    /// Raw descriptor-area block count; the high bit marks a non-contiguous area.
    pub checkpoint_descriptor_blocks: u32,
    pub checkpoint_data_blocks: u32,
    pub checkpoint_descriptor_base: u64,
    pub checkpoint_data_base: u64,
    pub checkpoint_descriptor_next: u32,
    pub checkpoint_data_next: u32,
    pub checkpoint_descriptor_index: u32,
    pub checkpoint_descriptor_length: u32,
    pub checkpoint_data_index: u32,
    pub checkpoint_data_length: u32,
    pub space_manager_object_id: ObjectId,
    pub object_map_block_number: BlockNumber,
    pub reaper_object_id: ObjectId,
    pub max_file_systems: u32,
    /// Non-zero volume superblock identifiers, in slot order.
    pub volume_object_ids: Vec<ObjectId>,
}

impl ContainerSuperblock {
    /// Parse the container superblock from the start of `data`.
    ///
    /// The object type and magic are checked before any other field is
    /// trusted. Geometry is not validated here; see [`Self::validate`].
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        check_data_size(data.len(), NX_SUPERBLOCK_SIZE)?;

        let header = ObjectHeader::parse_from_bytes(data)?;
        header.expect_type(NX_SUPERBLOCK_OBJECT_TYPE)?;

        let magic = read_le_u32(data, 0x20)?;
        if magic != NX_SUPERBLOCK_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(NX_SUPERBLOCK_MAGIC),
                actual: u64::from(magic),
            });
        }

        let mut volume_object_ids = Vec::new();
        for slot in 0..NX_MAX_FILE_SYSTEMS {
            let oid = ObjectId(read_le_u64(data, NX_FS_OID_OFFSET + slot * 8)?);
            if oid.is_valid() {
                volume_object_ids.push(oid);
            }
        }

        Ok(Self {
            header,
            magic,
            block_size: read_le_u32(data, 0x24)?,
            number_of_blocks: read_le_u64(data, 0x28)?,
            features: read_le_u64(data, 0x30)?,
            readonly_compatible_features: read_le_u64(data, 0x38)?,
            incompatible_features: read_le_u64(data, 0x40)?,
            uuid: read_fixed::<16>(data, 0x48)?,
            next_object_id: ObjectId(read_le_u64(data, 0x58)?),
            next_transaction_id: TransactionId(read_le_u64(data, 0x60)?),
            checkpoint_descriptor_blocks: read_le_u32(data, 0x68)?,
            checkpoint_data_blocks: read_le_u32(data, 0x6C)?,
            checkpoint_descriptor_base: read_le_u64(data, 0x70)?,
            checkpoint_data_base: read_le_u64(data, 0x78)?,
            checkpoint_descriptor_next: read_le_u32(data, 0x80)?,
            checkpoint_data_next: read_le_u32(data, 0x84)?,
            checkpoint_descriptor_index: read_le_u32(data, 0x88)?,
            checkpoint_descriptor_length: read_le_u32(data, 0x8C)?,
            checkpoint_data_index: read_le_u32(data, 0x90)?,
            checkpoint_data_length: read_le_u32(data, 0x94)?,
            space_manager_object_id: ObjectId(read_le_u64(data, 0x98)?),
            object_map_block_number: BlockNumber(read_le_u64(data, 0xA0)?),
            reaper_object_id: ObjectId(read_le_u64(data, 0xA8)?),
            max_file_systems: read_le_u32(data, 0xB4)?,
            volume_object_ids,
        })
    }

    /// Validated block size.
    pub fn block_size(&self) -> Result<BlockSize, ParseError> {
        BlockSize::new(self.block_size)
    }

    #[must_use]
    pub fn checkpoint_descriptor_area_is_contiguous(&self) -> bool {
        self.checkpoint_descriptor_blocks & NX_CHECKPOINT_AREA_NONCONTIGUOUS == 0
    }

    /// Descriptor-area block count with the contiguity bit masked off.
    #[must_use]
    pub fn checkpoint_descriptor_block_count(&self) -> u32 {
        self.checkpoint_descriptor_blocks & !NX_CHECKPOINT_AREA_NONCONTIGUOUS
    }

    /// Validate container geometry.
    ///
    /// Checks:
    /// - block size is a power of two in 4096..=65536.
    /// - the container has at least one block.
    /// - the object map block lies inside the container.
    /// - a contiguous checkpoint descriptor area lies inside the container.
    /// - `max_file_systems` does not exceed the slot array.
    pub fn validate(&self) -> Result<(), ParseError> {
        self.block_size()?;

        if self.number_of_blocks == 0 {
            return Err(ParseError::InvalidField {
                field: "number_of_blocks",
                reason: "container has no blocks",
            });
        }

        if self.object_map_block_number.0 >= self.number_of_blocks {
            return Err(ParseError::InvalidField {
                field: "object_map_block_number",
                reason: "beyond container block count",
            });
        }

        if self.checkpoint_descriptor_area_is_contiguous() {
            let end = self
                .checkpoint_descriptor_base
                .checked_add(u64::from(self.checkpoint_descriptor_block_count()))
                .ok_or(ParseError::InvalidField {
                    field: "checkpoint_descriptor_base",
                    reason: "descriptor area overflows",
                })?;
            if end > self.number_of_blocks {
                return Err(ParseError::InvalidField {
                    field: "checkpoint_descriptor_base",
                    reason: "descriptor area extends past container",
                });
            }
        }

        let max_file_systems = usize::try_from(self.max_file_systems).map_err(|_| {
            ParseError::IntegerConversion {
                field: "max_file_systems",
            }
        })?;
        if max_file_systems > NX_MAX_FILE_SYSTEMS {
            return Err(ParseError::InvalidField {
                field: "max_file_systems",
                reason: "exceeds volume slot array",
            });
        }

        Ok(())
    }
}
