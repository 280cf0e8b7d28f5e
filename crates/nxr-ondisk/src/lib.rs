#![forbid(unsafe_code)]
//! On-disk format parsing for container metadata.
//!
//! Pure parsing crate with no I/O and no side effects. Parses byte slices into
//! typed Rust structures representing the common object header, the
//! container superblock, the object map header, the checkpoint (physical)
//! map, and file extent records.

pub mod file_extent;
pub mod object;
pub mod object_map;
pub mod physical_map;
pub mod superblock;

pub use file_extent::{ExtentMapping, FileExtent, FileExtentKey, FileExtentValue};
pub use object::{ObjectHeader, StorageClass, compute_object_checksum, verify_object_checksum};
pub use object_map::ContainerObjectMap;
pub use physical_map::{ContainerPhysicalMap, ContainerPhysicalMapEntry};
pub use superblock::ContainerSuperblock;
