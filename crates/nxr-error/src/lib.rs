#![forbid(unsafe_code)]
//! Error types for nxread.
//!
//! # Error Taxonomy
//!
//! nxread uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `nxr-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `NxError` | `nxr-error` (this crate) | Caller-facing errors for container opening and address resolution |
//!
//! ## Mapping Policy: ParseError → NxError
//!
//! `nxr-error` does not depend on `nxr-types` or `nxr-ondisk`. The conversion
//! from `ParseError` to `NxError` lives in `nxr-core`, which depends on both.
//!
//! | ParseError Variant | NxError Variant |
//! |--------------------|-----------------|
//! | `InsufficientData` | `SizeOutOfBounds` |
//! | `OutOfBounds` | `SizeOutOfBounds` |
//! | `InvalidMagic` | `UnsupportedFormat` |
//! | `InvalidObjectType` | `UnsupportedFormat` |
//! | `AlreadySet` | `InvalidArgument` |
//! | `AllocationFailed` | `Allocation` |
//! | `InvalidField` | `Corruption { block, detail }` |
//! | `IntegerConversion` | `Corruption { block, detail }` |
//!
//! ## Retry Policy
//!
//! Nothing at this layer is retried. Only `Io` may be transient
//! ([`NxError::is_transient`]); every other variant describes the bytes on
//! disk and will fail the same way again. Callers scanning checkpoint
//! candidates treat a failed superblock or physical map as "try the next
//! candidate".
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `InvalidArgument` | `EINVAL` |
//! | `SizeOutOfBounds` | `EINVAL` |
//! | `UnsupportedFormat` | `EINVAL` |
//! | `Allocation` | `ENOMEM` |
//! | `Corruption` | `EIO` |
//! | `ChecksumMismatch` | `EIO` |
//! | `OutOfRange` | `ERANGE` |

use thiserror::Error;

/// Unified error type for nxread operations.
#[derive(Debug, Error)]
pub enum NxError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller passed an argument the operation cannot accept, such as a
    /// target that is already populated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A declared or supplied size violates a structural minimum, the
    /// platform maximum, or a format-derived ceiling.
    #[error("size out of bounds: {0}")]
    SizeOutOfBounds(String),

    /// An object type tag or magic did not match: either a format this build
    /// does not understand or a misdirected read.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Memory for a decoded structure could not be obtained.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Structurally invalid metadata at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// Object checksum did not match the block contents.
    #[error("checksum mismatch at block {block}: stored {expected:#018x}, computed {computed:#018x}")]
    ChecksumMismatch {
        block: u64,
        expected: u64,
        computed: u64,
    },

    /// A block address points outside the container.
    #[error("block {block} out of range (container has {block_count} blocks)")]
    OutOfRange { block: u64, block_count: u64 },
}

impl NxError {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive; a new variant is a compile error until its
    /// errno is assigned.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::InvalidArgument(_) | Self::SizeOutOfBounds(_) | Self::UnsupportedFormat(_) => {
                libc::EINVAL
            }
            Self::Allocation(_) => libc::ENOMEM,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } => libc::EIO,
            Self::OutOfRange { .. } => libc::ERANGE,
        }
    }

    /// Whether retrying the same operation could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result alias using `NxError`.
pub type Result<T> = std::result::Result<T, NxError>;
