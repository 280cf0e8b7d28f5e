#![forbid(unsafe_code)]
//! Opened-container facade.
//!
//! `OpenContainer` bootstraps from the container superblock and exposes the
//! address-resolution steps that precede any tree walk: the object map
//! header (root of the virtual-object tree) and the checkpoint map that
//! resolves ephemeral object identifiers to blocks.

use nxr_block::{BlockBuf, BlockDevice, ByteBlockDevice, ByteDevice, FileByteDevice};
use nxr_error::{NxError, Result};
use nxr_ondisk::{
    ContainerObjectMap, ContainerPhysicalMap, ContainerSuperblock, FileExtent,
    verify_object_checksum,
};
use nxr_types::{BlockNumber, BlockSize, ObjectId, ParseError, read_le_u64};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Options controlling how a container image is opened.
///
/// By default, superblock geometry is validated and object checksums are
/// reported but not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Skip superblock geometry validation.
    ///
    /// The block size must still be usable for I/O. Use for recovery or
    /// diagnostics only.
    pub skip_validation: bool,
    /// Reject superblock, object map, and checkpoint map blocks whose
    /// Fletcher-64 checksum does not match.
    pub verify_checksums: bool,
    /// Block holding the superblock copy to bootstrap from.
    ///
    /// Block zero is always read first to learn the block size.
    pub superblock_block: BlockNumber,
}

#[allow(clippy::derivable_impls)]
impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            verify_checksums: false,
            superblock_block: BlockNumber(0),
        }
    }
}

/// An opened container image.
///
/// Holds the parsed superblock and a block-addressed view of the device.
/// Nothing is cached; every read goes to the device.
///
/// ```ignore
/// let container = OpenContainer::open("/path/to/image.apfs")?;
/// let map = container.read_physical_map(BlockNumber(1))?;
/// let spaceman = container.resolve_ephemeral(&map, container.superblock().space_manager_object_id)?;
/// ```
pub struct OpenContainer {
    superblock: ContainerSuperblock,
    block_size: BlockSize,
    options: OpenOptions,
    dev: ByteBlockDevice<Box<dyn ByteDevice>>,
}

impl std::fmt::Debug for OpenContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenContainer")
            .field("superblock", &self.superblock)
            .field("block_size", &self.block_size)
            .field("options", &self.options)
            .field("dev_len", &self.dev.inner().len_bytes())
            .finish_non_exhaustive()
    }
}

impl OpenContainer {
    /// Open a container image at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &OpenOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(Box::new(dev), options)
    }

    /// Open a container from an already-opened device.
    pub fn from_device(dev: Box<dyn ByteDevice>, options: &OpenOptions) -> Result<Self> {
        let region = nxr_block::read_container_superblock_region(&*dev)?;
        let primary =
            ContainerSuperblock::parse_from_bytes(&region).map_err(|e| parse_error_to_nx(&e, 0))?;
        let block_size = primary.block_size().map_err(|e| parse_error_to_nx(&e, 0))?;

        let mut container = Self {
            superblock: primary,
            block_size,
            options: options.clone(),
            dev: ByteBlockDevice::new(dev, block_size),
        };

        let target = options.superblock_block;
        if target.0 != 0 || options.verify_checksums {
            container.superblock = container.read_superblock_copy(target)?;
            let copy_block_size = container
                .superblock
                .block_size()
                .map_err(|e| parse_error_to_nx(&e, target.0))?;
            if copy_block_size != block_size {
                return Err(NxError::Corruption {
                    block: target.0,
                    detail: format!(
                        "superblock copy block size {copy_block_size} differs from primary {block_size}"
                    ),
                });
            }
        }

        if !options.skip_validation {
            container
                .superblock
                .validate()
                .map_err(|e| parse_error_to_nx(&e, target.0))?;
        }

        debug!(
            block_size = block_size.get(),
            block_count = container.superblock.number_of_blocks,
            superblock_block = target.0,
            transaction_id = container.superblock.header.transaction_id.0,
            object_map_block = container.superblock.object_map_block_number.0,
            "container_open"
        );
        Ok(container)
    }

    #[must_use]
    pub fn superblock(&self) -> &ContainerSuperblock {
        &self.superblock
    }

    #[must_use]
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// The byte device backing this container.
    #[must_use]
    pub fn device(&self) -> &dyn ByteDevice {
        &**self.dev.inner()
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    /// Container size in blocks, as declared by the superblock.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.superblock.number_of_blocks
    }

    /// Blocks of the checkpoint descriptor area.
    ///
    /// `None` when the area is not contiguous; its base is then the
    /// identifier of a tree that lists the blocks.
    #[must_use]
    pub fn checkpoint_descriptor_blocks(&self) -> Option<Range<u64>> {
        if !self.superblock.checkpoint_descriptor_area_is_contiguous() {
            return None;
        }
        let start = self.superblock.checkpoint_descriptor_base;
        let count = u64::from(self.superblock.checkpoint_descriptor_block_count());
        Some(start..start.saturating_add(count))
    }

    fn check_in_container(&self, block: BlockNumber) -> Result<()> {
        if block.0 >= self.block_count() {
            return Err(NxError::OutOfRange {
                block: block.0,
                block_count: self.block_count(),
            });
        }
        Ok(())
    }

    /// Read one full container block.
    ///
    /// A block inside the container that the device is too short to hold is
    /// a short read and fails with `Io(UnexpectedEof)`.
    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        self.check_in_container(block)?;
        if block.0 >= self.dev.block_count() {
            return Err(NxError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "short read: block {} past device end ({} blocks)",
                    block.0,
                    self.dev.block_count()
                ),
            )));
        }
        self.dev.read_block(block)
    }

    /// Compare an object block's stored checksum with its contents.
    ///
    /// A mismatch fails only when checksum verification is enabled.
    fn check_object_checksum(&self, block: BlockNumber, bytes: &[u8]) -> Result<()> {
        let verdict = verify_object_checksum(bytes).map_err(|e| parse_error_to_nx(&e, block.0))?;
        let Err(computed) = verdict else {
            return Ok(());
        };
        let stored = read_le_u64(bytes, 0).map_err(|e| parse_error_to_nx(&e, block.0))?;
        if self.options.verify_checksums {
            return Err(NxError::ChecksumMismatch {
                block: block.0,
                expected: stored,
                computed,
            });
        }
        warn!(
            block = block.0,
            stored,
            computed,
            "object_checksum_mismatch_ignored"
        );
        Ok(())
    }

    fn read_object_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let buf = self.read_block(block)?;
        self.check_object_checksum(block, buf.as_slice())?;
        Ok(buf)
    }

    /// Parse a superblock copy stored at `block`, such as a checkpoint
    /// descriptor-area entry.
    pub fn read_superblock_copy(&self, block: BlockNumber) -> Result<ContainerSuperblock> {
        // The primary may not be trusted yet, so bound by the device only.
        let buf = self.dev.read_block(block)?;
        self.check_object_checksum(block, buf.as_slice())?;
        ContainerSuperblock::parse_from_bytes(buf.as_slice())
            .map_err(|e| parse_error_to_nx(&e, block.0))
    }

    /// Read the container object map header named by the superblock.
    ///
    /// The returned header locates the object map tree root; walking the
    /// tree is left to the caller's tree engine.
    pub fn read_object_map(&self) -> Result<ContainerObjectMap> {
        let block = self.superblock.object_map_block_number;
        let buf = self.read_object_block(block)?;
        let omap = ContainerObjectMap::parse_from_bytes(buf.as_slice())
            .map_err(|e| parse_error_to_nx(&e, block.0))?;
        debug!(
            block = block.0,
            tree_block = omap.object_map_btree_block_number.0,
            snapshots = omap.snapshot_count,
            "object_map_read"
        );
        Ok(omap)
    }

    /// Read and decode the checkpoint map stored at `block`.
    pub fn read_physical_map(&self, block: BlockNumber) -> Result<ContainerPhysicalMap> {
        let buf = self.read_object_block(block)?;
        let map = ContainerPhysicalMap::parse_from_bytes(buf.as_slice())
            .map_err(|e| parse_error_to_nx(&e, block.0))?;
        debug!(
            block = block.0,
            entries = map.len(),
            last = map.is_last(),
            "physical_map_read"
        );
        Ok(map)
    }

    /// Resolve an ephemeral object identifier through `map`.
    ///
    /// `Ok(None)` if the map has no entry for `oid`. A resolved block past
    /// the end of the container is reported as `OutOfRange`.
    pub fn resolve_ephemeral(
        &self,
        map: &ContainerPhysicalMap,
        oid: ObjectId,
    ) -> Result<Option<BlockNumber>> {
        let resolved = map.physical_address_of(oid);
        trace!(
            oid = oid.0,
            block = resolved.map(|b| b.0),
            "resolve_ephemeral"
        );
        if let Some(block) = resolved {
            self.check_in_container(block)?;
        }
        Ok(resolved)
    }

    /// Assemble a file extent from the key and value halves of a tree record.
    pub fn read_file_extent(&self, key: &[u8], value: &[u8]) -> Result<FileExtent> {
        let extent = FileExtent::from_record(key, value).map_err(|e| parse_error_to_nx(&e, 0))?;
        if let Some(block) = extent.block_number().filter(|b| b.0 != 0) {
            self.check_in_container(block)?;
        }
        Ok(extent)
    }
}

/// Convert a `ParseError` into the caller-facing `NxError`.
///
/// `block` names the block being decoded, or 0 when unknown.
#[must_use]
pub fn parse_error_to_nx(e: &ParseError, block: u64) -> NxError {
    match e {
        ParseError::InsufficientData { .. } | ParseError::OutOfBounds { .. } => {
            NxError::SizeOutOfBounds(e.to_string())
        }
        ParseError::InvalidMagic { .. } | ParseError::InvalidObjectType { .. } => {
            NxError::UnsupportedFormat(e.to_string())
        }
        ParseError::AlreadySet { .. } => NxError::InvalidArgument(e.to_string()),
        ParseError::AllocationFailed { .. } => NxError::Allocation(e.to_string()),
        ParseError::InvalidField { .. } | ParseError::IntegerConversion { .. } => {
            NxError::Corruption {
                block,
                detail: e.to_string(),
            }
        }
    }
}
