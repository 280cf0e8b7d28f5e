use crate::object::ObjectHeader;
use nxr_types::{
    BlockNumber, OBJECT_MAP_OBJECT_TYPE, OBJECT_MAP_SIZE, ParseError, TransactionId,
    check_data_size, read_le_u32, read_le_u64,
};
use serde::{Deserialize, Serialize};

/// Container object map header (`omap_phys_t`).
///
/// Only locates the tree; walking it is the tree engine's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerObjectMap {
    pub header: ObjectHeader,
    pub flags: u32,
    pub snapshot_count: u32,
    pub tree_type: u32,
    pub snapshot_tree_type: u32,
    /// Root node of the tree mapping virtual object identifiers to blocks.
    pub object_map_btree_block_number: BlockNumber,
    pub snapshot_tree_block_number: BlockNumber,
    pub most_recent_snapshot: TransactionId,
    pub pending_revert_min: TransactionId,
    pub pending_revert_max: TransactionId,
}

impl ContainerObjectMap {
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        check_data_size(data.len(), OBJECT_MAP_SIZE)?;

        let header = ObjectHeader::parse_from_bytes(data)?;
        header.expect_type(OBJECT_MAP_OBJECT_TYPE)?;

        Ok(Self {
            header,
            flags: read_le_u32(data, 0x20)?,
            snapshot_count: read_le_u32(data, 0x24)?,
            tree_type: read_le_u32(data, 0x28)?,
            snapshot_tree_type: read_le_u32(data, 0x2C)?,
            object_map_btree_block_number: BlockNumber(read_le_u64(data, 0x30)?),
            snapshot_tree_block_number: BlockNumber(read_le_u64(data, 0x38)?),
            most_recent_snapshot: TransactionId(read_le_u64(data, 0x40)?),
            pending_revert_min: TransactionId(read_le_u64(data, 0x48)?),
            pending_revert_max: TransactionId(read_le_u64(data, 0x50)?),
        })
    }

    #[must_use]
    pub fn has_snapshots(&self) -> bool {
        self.snapshot_count != 0
    }
}
