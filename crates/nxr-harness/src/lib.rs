#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use nxr_block::MemoryByteDevice;
use nxr_core::{OpenContainer, OpenOptions};
use nxr_ondisk::{
    ContainerObjectMap, ContainerPhysicalMap, ContainerPhysicalMapEntry, ContainerSuperblock,
    FileExtent,
};
use nxr_types::BlockSize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

/// Materialize a sparse JSON fixture: a zeroed buffer of `size` bytes with
/// each hex payload written at its offset.
pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;

    let mut bytes = vec![0_u8; fixture.size];
    for write in fixture.writes {
        let payload = hex::decode(write.hex)
            .with_context(|| format!("invalid hex at offset {}", write.offset))?;

        let end = write
            .offset
            .checked_add(payload.len())
            .context("fixture offset overflow")?;
        if end > bytes.len() {
            bail!(
                "fixture write out of bounds: offset={} payload={} size={}",
                write.offset,
                payload.len(),
                bytes.len()
            );
        }

        bytes[write.offset..end].copy_from_slice(&payload);
    }

    Ok(bytes)
}

pub fn validate_superblock_fixture(path: &Path) -> Result<ContainerSuperblock> {
    let data = load_sparse_fixture(path)?;
    let sb = ContainerSuperblock::parse_from_bytes(&data)
        .with_context(|| format!("failed superblock parse for fixture {}", path.display()))?;
    sb.validate()
        .with_context(|| format!("superblock geometry invalid in fixture {}", path.display()))?;
    Ok(sb)
}

pub fn validate_object_map_fixture(path: &Path) -> Result<ContainerObjectMap> {
    let data = load_sparse_fixture(path)?;
    ContainerObjectMap::parse_from_bytes(&data)
        .with_context(|| format!("failed object map parse for fixture {}", path.display()))
}

pub fn validate_physical_map_fixture(path: &Path) -> Result<ContainerPhysicalMap> {
    let data = load_sparse_fixture(path)?;
    ContainerPhysicalMap::parse_from_bytes(&data)
        .with_context(|| format!("failed physical map parse for fixture {}", path.display()))
}

pub fn validate_physical_map_entry_fixture(path: &Path) -> Result<ContainerPhysicalMapEntry> {
    let data = load_sparse_fixture(path)?;
    ContainerPhysicalMapEntry::parse_from_bytes(&data).with_context(|| {
        format!(
            "failed physical map entry parse for fixture {}",
            path.display()
        )
    })
}

pub fn validate_file_extent_fixture(key_path: &Path, value_path: &Path) -> Result<FileExtent> {
    let key = load_sparse_fixture(key_path)?;
    let value = load_sparse_fixture(value_path)?;
    FileExtent::from_record(&key, &value).with_context(|| {
        format!(
            "failed file extent parse for fixtures {} + {}",
            key_path.display(),
            value_path.display()
        )
    })
}

/// Lay block-sized fixtures out at the given block numbers of a zeroed
/// image and open it as a container.
pub fn open_fixture_container(
    block_size: BlockSize,
    block_count: usize,
    blocks: &[(usize, &Path)],
    options: &OpenOptions,
) -> Result<OpenContainer> {
    let bs = usize::try_from(block_size.get()).context("block size does not fit usize")?;
    let len = bs
        .checked_mul(block_count)
        .context("fixture image size overflow")?;
    let mut image = vec![0_u8; len];

    for (block, path) in blocks {
        let data = load_sparse_fixture(path)?;
        if data.len() > bs {
            bail!(
                "fixture {} is larger than one block ({} > {bs})",
                path.display(),
                data.len()
            );
        }
        if *block >= block_count {
            bail!("fixture block {block} outside image of {block_count} blocks");
        }
        let start = block * bs;
        image[start..start + data.len()].copy_from_slice(&data);
    }

    OpenContainer::from_device(Box::new(MemoryByteDevice::new(image)), options)
        .context("failed to open fixture container")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nxr_types::{BlockNumber, ObjectId};
    use std::io::Write;

    fn fixture_path(rel: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .and_then(Path::parent)
            .expect("workspace root")
            .join("conformance")
            .join("fixtures")
            .join(rel)
    }

    fn write_temp_fixture(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(json.as_bytes()).expect("write fixture");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn sample_entry_fixture_parses() {
        let entry = validate_physical_map_entry_fixture(&fixture_path(
            "checkpoint_map_entry_sample.json",
        ))
        .expect("entry fixture parse");
        assert_eq!(entry.object_type, 0x8000_0005);
        assert_eq!(entry.object_size, 0x1000);
        assert_eq!(entry.object_identifier, ObjectId(0x400));
        assert_eq!(entry.physical_address, BlockNumber(9));
    }

    #[test]
    fn superblock_fixture_parses() {
        let sb = validate_superblock_fixture(&fixture_path("nx_superblock_sparse.json"))
            .expect("superblock fixture parse");
        assert_eq!(sb.block_size, 4096);
        assert_eq!(sb.number_of_blocks, 1024);
        assert_eq!(sb.object_map_block_number, BlockNumber(100));
    }

    #[test]
    fn out_of_bounds_write_is_rejected() {
        let scratch = write_temp_fixture(r#"{"size": 4, "writes": [{"offset": 2, "hex": "aabbcc"}]}"#);
        let err = load_sparse_fixture(scratch.path()).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn invalid_hex_is_rejected() {
        let scratch = write_temp_fixture(r#"{"size": 8, "writes": [{"offset": 0, "hex": "zz"}]}"#);
        let err = load_sparse_fixture(scratch.path()).unwrap_err();
        assert!(err.to_string().contains("invalid hex"));
    }

    #[test]
    fn writes_land_at_offsets() {
        let scratch = write_temp_fixture(
            r#"{"size": 6, "writes": [{"offset": 1, "hex": "0102"}, {"offset": 5, "hex": "ff"}]}"#,
        );
        let bytes = load_sparse_fixture(scratch.path()).expect("load");
        assert_eq!(bytes, vec![0, 1, 2, 0, 0, 0xFF]);
    }
}
