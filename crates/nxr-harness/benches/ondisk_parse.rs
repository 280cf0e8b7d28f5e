#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use nxr_harness::load_sparse_fixture;
use nxr_ondisk::{
    ContainerObjectMap, ContainerPhysicalMap, ContainerSuperblock, FileExtent,
    compute_object_checksum,
};
use nxr_types::ObjectId;
use std::path::Path;

fn fixture_path(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("workspace root")
        .join("conformance/fixtures")
        .join(name)
}

fn bench_superblock_parse(c: &mut Criterion) {
    let data = load_sparse_fixture(&fixture_path("nx_superblock_sparse.json"))
        .expect("load superblock fixture");

    c.bench_function("nx_superblock_parse", |b| {
        b.iter(|| ContainerSuperblock::parse_from_bytes(black_box(&data)).expect("sb parse"));
    });
}

fn bench_object_map_parse(c: &mut Criterion) {
    let data = load_sparse_fixture(&fixture_path("object_map_sparse.json"))
        .expect("load object map fixture");

    c.bench_function("object_map_parse", |b| {
        b.iter(|| ContainerObjectMap::parse_from_bytes(black_box(&data)).expect("omap parse"));
    });
}

fn bench_physical_map_parse(c: &mut Criterion) {
    let data = load_sparse_fixture(&fixture_path("checkpoint_map_sparse.json"))
        .expect("load checkpoint map fixture");

    c.bench_function("physical_map_parse", |b| {
        b.iter(|| {
            let map = ContainerPhysicalMap::parse_from_bytes(black_box(&data)).expect("map parse");
            black_box(map);
        });
    });
}

fn bench_physical_map_full_lookup(c: &mut Criterion) {
    // Largest map a 4 KiB block can hold; lookup of the last entry is the worst case.
    let mut data = vec![0_u8; 4096];
    data[0x18..0x1C].copy_from_slice(&0x4000_000C_u32.to_le_bytes());
    data[0x24..0x28].copy_from_slice(&101_u32.to_le_bytes());
    for i in 0..101_u64 {
        let off = 40 + usize::try_from(i).expect("index") * 40;
        data[off + 24..off + 32].copy_from_slice(&(0x400 + i).to_le_bytes());
        data[off + 32..off + 40].copy_from_slice(&(1000 + i).to_le_bytes());
    }
    let map = ContainerPhysicalMap::parse_from_bytes(&data).expect("full map");

    c.bench_function("physical_map_lookup_last_of_101", |b| {
        b.iter(|| black_box(map.physical_address_of(black_box(ObjectId(0x464)))));
    });
}

fn bench_file_extent_parse(c: &mut Criterion) {
    let key = load_sparse_fixture(&fixture_path("file_extent_key.json")).expect("load key");
    let value = load_sparse_fixture(&fixture_path("file_extent_value.json")).expect("load value");

    c.bench_function("file_extent_parse", |b| {
        b.iter(|| {
            FileExtent::from_record(black_box(&key), black_box(&value)).expect("extent parse")
        });
    });
}

fn bench_object_checksum(c: &mut Criterion) {
    let data = load_sparse_fixture(&fixture_path("checkpoint_map_sparse.json"))
        .expect("load checkpoint map fixture");

    c.bench_function("fletcher64_4k_block", |b| {
        b.iter(|| compute_object_checksum(black_box(&data)).expect("checksum"));
    });
}

criterion_group!(
    ondisk,
    bench_superblock_parse,
    bench_object_map_parse,
    bench_physical_map_parse,
    bench_physical_map_full_lookup,
    bench_file_extent_parse,
    bench_object_checksum,
);
criterion_main!(ondisk);
