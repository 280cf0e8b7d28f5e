#![forbid(unsafe_code)]
//! Read-only device access for container images.
//!
//! Provides the `ByteDevice` trait (positional reads, no shared seek
//! cursor), a file-backed and an in-memory implementation, and
//! `ByteBlockDevice` for block-addressed reads once the container block
//! size is known.

use nxr_error::{NxError, Result};
use nxr_types::{BlockNumber, BlockSize, ByteOffset, NX_SUPERBLOCK_SIZE};
use std::fs::File;
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Owned block buffer.
///
/// Invariant: length == device block size for the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed device for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;
}

impl<D: ByteDevice + ?Sized> ByteDevice for Box<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// A read that would run past the end of the device is a short read and is
/// reported as `Io(UnexpectedEof)`, the same error `pread` gives at EOF.
fn check_read_range(offset: ByteOffset, len: usize, device_len: u64) -> Result<()> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len));
    match end {
        Some(end) if end.0 <= device_len => Ok(()),
        _ => Err(NxError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("short read: offset={offset} len={len} device_len={device_len}"),
        ))),
    }
}

/// File-backed byte device using `pread`.
///
/// The file is opened read-only. `FileExt::read_exact_at` does not share a
/// seek position, so one device may serve concurrent readers.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_read_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset.0)?;
        Ok(())
    }
}

/// Byte device over an owned in-memory image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryByteDevice {
    bytes: Vec<u8>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_read_range(offset, buf.len(), self.len_bytes())?;
        let start = offset
            .to_usize()
            .map_err(|_| NxError::SizeOutOfBounds("offset does not fit usize".to_owned()))?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

/// Block-addressed read interface.
pub trait BlockDevice: Send + Sync {
    /// Read a block by number.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Device block size.
    fn block_size(&self) -> BlockSize;

    /// Total number of blocks.
    fn block_count(&self) -> u64;
}

#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: BlockSize,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    /// Wrap `inner` with the given block size.
    ///
    /// Trailing bytes past the last whole block are not addressable.
    #[must_use]
    pub fn new(inner: D, block_size: BlockSize) -> Self {
        let block_count = inner.len_bytes() / u64::from(block_size.get());
        Self {
            inner,
            block_size,
            block_count,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn block_offset(&self, block: BlockNumber) -> Result<ByteOffset> {
        if block.0 >= self.block_count {
            return Err(NxError::OutOfRange {
                block: block.0,
                block_count: self.block_count,
            });
        }
        block
            .to_byte_offset(self.block_size)
            .ok_or_else(|| NxError::SizeOutOfBounds("block offset overflow".to_owned()))
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let offset = self.block_offset(block)?;
        let len = usize::try_from(self.block_size.get())
            .map_err(|_| NxError::SizeOutOfBounds("block_size does not fit usize".to_owned()))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| NxError::Allocation(format!("block buffer of {len} bytes")))?;
        buf.resize(len, 0);
        self.inner.read_exact_at(offset, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    fn block_size(&self) -> BlockSize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

/// Read the fixed container superblock region at the start of block zero.
///
/// The block size is not known until this region is parsed, so only the
/// decoded layout is read.
pub fn read_container_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; NX_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; NX_SUPERBLOCK_SIZE];
    dev.read_exact_at(ByteOffset::ZERO, &mut buf)?;
    Ok(buf)
}
