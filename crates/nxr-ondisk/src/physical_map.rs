//! Checkpoint (ephemeral object) map.
//!
//! Ephemeral objects such as the space manager and reaper have to be located
//! before the object map tree can be trusted. Each checkpoint therefore
//! carries a flat map binding ephemeral identifiers straight to block
//! addresses.

use crate::object::{ObjectHeader, StorageClass};
use nxr_types::{
    BlockNumber, ByteCursor, CHECKPOINT_MAP_HEADER_SIZE, CHECKPOINT_MAP_LAST,
    CHECKPOINT_MAP_MAX_ENTRIES, CHECKPOINT_MAP_OBJECT_TYPE, CHECKPOINT_MAPPING_SIZE, ObjectId,
    ParseError, check_data_size, check_record_size, read_le_u32, read_le_u64,
};
use serde::{Deserialize, Serialize};

/// One ephemeral object binding (`checkpoint_mapping_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPhysicalMapEntry {
    pub object_type: u32,
    pub object_subtype: u32,
    /// Size of the mapped object in bytes.
    pub object_size: u32,
    /// Owning volume superblock, zero for container-level objects.
    pub file_system_object_identifier: ObjectId,
    pub object_identifier: ObjectId,
    pub physical_address: BlockNumber,
}

impl ContainerPhysicalMapEntry {
    /// Decode one entry from exactly [`CHECKPOINT_MAPPING_SIZE`] bytes.
    pub fn parse_from_bytes(record: &[u8]) -> Result<Self, ParseError> {
        check_record_size(record.len(), CHECKPOINT_MAPPING_SIZE)?;

        Ok(Self {
            object_type: read_le_u32(record, 0x00)?,
            object_subtype: read_le_u32(record, 0x04)?,
            object_size: read_le_u32(record, 0x08)?,
            // 0x0C: padding
            file_system_object_identifier: ObjectId(read_le_u64(record, 0x10)?),
            object_identifier: ObjectId(read_le_u64(record, 0x18)?),
            physical_address: BlockNumber(read_le_u64(record, 0x20)?),
        })
    }

    #[must_use]
    pub fn storage_class(&self) -> StorageClass {
        StorageClass::from_object_type(self.object_type)
    }
}

/// A parsed checkpoint map: header plus entries in on-disk order.
///
/// Entries are neither sorted nor deduplicated. Deserialization enforces the
/// same entry ceiling as [`ContainerPhysicalMap::parse_from_bytes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PhysicalMapFields")]
pub struct ContainerPhysicalMap {
    pub header: ObjectHeader,
    pub flags: u32,
    entries: Vec<ContainerPhysicalMapEntry>,
}

#[derive(Deserialize)]
struct PhysicalMapFields {
    header: ObjectHeader,
    flags: u32,
    entries: Vec<ContainerPhysicalMapEntry>,
}

impl TryFrom<PhysicalMapFields> for ContainerPhysicalMap {
    type Error = ParseError;

    fn try_from(fields: PhysicalMapFields) -> Result<Self, Self::Error> {
        check_entry_count(fields.entries.len())?;
        Ok(Self {
            header: fields.header,
            flags: fields.flags,
            entries: fields.entries,
        })
    }
}

fn check_entry_count(count: usize) -> Result<(), ParseError> {
    let value = u64::try_from(count).unwrap_or(u64::MAX);
    if value > u64::from(CHECKPOINT_MAP_MAX_ENTRIES) {
        return Err(ParseError::OutOfBounds {
            field: "number_of_entries",
            value,
            limit: u64::from(CHECKPOINT_MAP_MAX_ENTRIES),
        });
    }
    Ok(())
}

impl ContainerPhysicalMap {
    /// Parse a checkpoint map block.
    ///
    /// `data` must hold the 40-byte header followed by every declared entry;
    /// a whole block is the usual input. The parse is all-or-nothing: any
    /// failing entry discards the entries decoded before it.
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        check_data_size(data.len(), CHECKPOINT_MAP_HEADER_SIZE)?;

        let header = ObjectHeader::parse_from_bytes(data)?;
        header.expect_type(CHECKPOINT_MAP_OBJECT_TYPE)?;

        let flags = read_le_u32(data, 0x20)?;
        let number_of_entries = read_le_u32(data, 0x24)?;
        let count = usize::try_from(number_of_entries).map_err(|_| {
            ParseError::IntegerConversion {
                field: "number_of_entries",
            }
        })?;
        check_entry_count(count)?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(count)
            .map_err(|_| ParseError::AllocationFailed {
                field: "physical map entries",
            })?;

        let mut cursor = ByteCursor::at(data, CHECKPOINT_MAP_HEADER_SIZE)?;
        for _ in 0..count {
            let record = cursor.take(CHECKPOINT_MAPPING_SIZE)?;
            entries.push(ContainerPhysicalMapEntry::parse_from_bytes(record)?);
        }

        Ok(Self {
            header,
            flags,
            entries,
        })
    }

    #[must_use]
    pub fn entries(&self) -> &[ContainerPhysicalMapEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this is the final checkpoint map of its checkpoint.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags & CHECKPOINT_MAP_LAST != 0
    }

    /// First entry (in on-disk order) for `object_identifier`.
    #[must_use]
    pub fn entry_for(&self, object_identifier: ObjectId) -> Option<&ContainerPhysicalMapEntry> {
        self.entries
            .iter()
            .find(|entry| entry.object_identifier == object_identifier)
    }

    /// Resolve an ephemeral object identifier to its block address.
    ///
    /// Linear scan; when an identifier repeats the first on-disk entry wins.
    #[must_use]
    pub fn physical_address_of(&self, object_identifier: ObjectId) -> Option<BlockNumber> {
        self.entry_for(object_identifier)
            .map(|entry| entry.physical_address)
    }
}
