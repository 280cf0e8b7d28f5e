#![forbid(unsafe_code)]

use nxr_ondisk::{
    ContainerObjectMap, ContainerPhysicalMap, ContainerPhysicalMapEntry, ContainerSuperblock,
    FileExtent, FileExtentKey, FileExtentValue, ObjectHeader, compute_object_checksum,
    verify_object_checksum,
};
use nxr_types::{
    CHECKPOINT_MAP_OBJECT_TYPE, NX_SUPERBLOCK_MAGIC, NX_SUPERBLOCK_OBJECT_TYPE,
    OBJECT_MAP_OBJECT_TYPE, ParseError,
};
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Default)]
struct ErrorCoverage {
    insufficient_data: u32,
    invalid_magic: u32,
    invalid_object_type: u32,
    invalid_field: u32,
    out_of_bounds: u32,
    integer_conversion: u32,
    already_set: u32,
    allocation_failed: u32,
}

impl ErrorCoverage {
    fn observe(&mut self, err: &ParseError) {
        match err {
            ParseError::InsufficientData { .. } => self.insufficient_data += 1,
            ParseError::InvalidMagic { .. } => self.invalid_magic += 1,
            ParseError::InvalidObjectType { .. } => self.invalid_object_type += 1,
            ParseError::InvalidField { .. } => self.invalid_field += 1,
            ParseError::OutOfBounds { .. } => self.out_of_bounds += 1,
            ParseError::IntegerConversion { .. } => self.integer_conversion += 1,
            ParseError::AlreadySet { .. } => self.already_set += 1,
            ParseError::AllocationFailed { .. } => self.allocation_failed += 1,
        }
    }

    fn total(&self) -> u32 {
        self.insufficient_data
            + self.invalid_magic
            + self.invalid_object_type
            + self.invalid_field
            + self.out_of_bounds
            + self.integer_conversion
            + self.already_set
            + self.allocation_failed
    }
}

/// xorshift64* with a fixed seed so failures reproduce.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, bound: usize) -> usize {
        let bound = u64::try_from(bound).expect("bound fits u64");
        usize::try_from(self.next() % bound).expect("value fits usize")
    }
}

fn valid_physical_map() -> Vec<u8> {
    let mut block = vec![0_u8; 4096];
    block[0x18..0x1C].copy_from_slice(&CHECKPOINT_MAP_OBJECT_TYPE.to_le_bytes());
    block[0x20..0x24].copy_from_slice(&1_u32.to_le_bytes());
    block[0x24..0x28].copy_from_slice(&3_u32.to_le_bytes());
    for i in 0..3_u64 {
        let off = 40 + usize::try_from(i).expect("index") * 40;
        block[off..off + 4].copy_from_slice(&0x8000_0005_u32.to_le_bytes());
        block[off + 8..off + 12].copy_from_slice(&4096_u32.to_le_bytes());
        block[off + 24..off + 32].copy_from_slice(&(0x400 + i).to_le_bytes());
        block[off + 32..off + 40].copy_from_slice(&(9 + i).to_le_bytes());
    }
    block
}

fn valid_superblock() -> Vec<u8> {
    let mut block = vec![0_u8; 4096];
    block[0x18..0x1C].copy_from_slice(&NX_SUPERBLOCK_OBJECT_TYPE.to_le_bytes());
    block[0x20..0x24].copy_from_slice(&NX_SUPERBLOCK_MAGIC.to_le_bytes());
    block[0x24..0x28].copy_from_slice(&4096_u32.to_le_bytes());
    block[0x28..0x30].copy_from_slice(&64_u64.to_le_bytes());
    block[0xA0..0xA8].copy_from_slice(&2_u64.to_le_bytes());
    block
}

fn valid_object_map() -> Vec<u8> {
    let mut block = vec![0_u8; 4096];
    block[0x18..0x1C].copy_from_slice(&OBJECT_MAP_OBJECT_TYPE.to_le_bytes());
    block[0x30..0x38].copy_from_slice(&3_u64.to_le_bytes());
    block
}

/// Seeds plus truncated, bit-flipped, and random variants of each.
fn build_corpus() -> Vec<(String, Vec<u8>)> {
    let seeds = [
        ("physical_map", valid_physical_map()),
        ("superblock", valid_superblock()),
        ("object_map", valid_object_map()),
    ];
    let mut out = Vec::new();
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);

    for (seed_name, seed) in &seeds {
        for cut in [0_usize, 1, 31, 32, 39, 40, 79, 87, 88, 120, 1407, 1408] {
            out.push((format!("{seed_name}_truncated_{cut}"), seed[..cut].to_vec()));
        }
        for round in 0..24 {
            let mut sample = seed.clone();
            for _ in 0..=rng.below(8) {
                // bias flips towards the header and first records
                let pos = rng.below(256);
                sample[pos] ^= 1 << rng.below(8);
            }
            out.push((format!("{seed_name}_flip_{round}"), sample));
        }
        let mut wrong_tag = seed.clone();
        wrong_tag[0x18..0x1C].copy_from_slice(&0x0000_000D_u32.to_le_bytes());
        out.push((format!("{seed_name}_wrong_tag"), wrong_tag));
    }

    for round in 0..32 {
        let len = rng.below(4097);
        let sample = (0..len)
            .map(|_| rng.next().to_le_bytes()[0])
            .collect::<Vec<_>>();
        out.push((format!("random_{round}_{len}"), sample));
    }

    let mut count_overflow = valid_physical_map();
    count_overflow[0x24..0x28].copy_from_slice(&u32::MAX.to_le_bytes());
    out.push(("physical_map_count_max".to_owned(), count_overflow));

    let mut bad_magic = valid_superblock();
    bad_magic[0x20..0x24].copy_from_slice(b"BSXN");
    out.push(("superblock_bad_magic".to_owned(), bad_magic));

    out
}

fn run_parser<T, F>(
    sample_name: &str,
    parser_name: &'static str,
    parser_hits: &mut BTreeMap<&'static str, u32>,
    coverage: &mut ErrorCoverage,
    parser: F,
) -> bool
where
    F: FnOnce() -> Result<T, ParseError>,
{
    *parser_hits.entry(parser_name).or_default() += 1;
    match catch_unwind(AssertUnwindSafe(parser)) {
        Ok(Ok(_)) => false,
        Ok(Err(err)) => {
            coverage.observe(&err);
            true
        }
        Err(panic_payload) => {
            let _ = panic_payload;
            panic!("parser `{parser_name}` panicked on sample `{sample_name}`");
        }
    }
}

#[test]
#[allow(clippy::too_many_lines)]
fn adversarial_corpus_is_panic_free_and_exercises_parse_error_variants() {
    let samples = build_corpus();
    let mut parser_hits = BTreeMap::new();
    let mut coverage = ErrorCoverage::default();

    for (name, bytes) in &samples {
        let mut sample_had_error = false;

        sample_had_error |= run_parser(
            name,
            "object_header_parse",
            &mut parser_hits,
            &mut coverage,
            || ObjectHeader::parse_from_bytes(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "object_checksum_verify",
            &mut parser_hits,
            &mut coverage,
            || verify_object_checksum(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "superblock_parse",
            &mut parser_hits,
            &mut coverage,
            || ContainerSuperblock::parse_from_bytes(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "superblock_validate",
            &mut parser_hits,
            &mut coverage,
            || ContainerSuperblock::parse_from_bytes(bytes)?.validate(),
        );
        sample_had_error |= run_parser(
            name,
            "object_map_parse",
            &mut parser_hits,
            &mut coverage,
            || ContainerObjectMap::parse_from_bytes(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "physical_map_parse",
            &mut parser_hits,
            &mut coverage,
            || ContainerPhysicalMap::parse_from_bytes(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "physical_map_entry_parse",
            &mut parser_hits,
            &mut coverage,
            || ContainerPhysicalMapEntry::parse_from_bytes(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "file_extent_key_parse",
            &mut parser_hits,
            &mut coverage,
            || FileExtentKey::parse_from_bytes(bytes),
        );
        sample_had_error |= run_parser(
            name,
            "file_extent_value_parse",
            &mut parser_hits,
            &mut coverage,
            || FileExtentValue::parse_from_bytes(bytes),
        );

        assert!(
            sample_had_error,
            "sample `{name}` produced no parser errors across the adversarial harness"
        );
    }

    // Phase reuse is not reachable from a single buffer; force it.
    let mut key = [0_u8; 16];
    key[..8].copy_from_slice(&(8_u64 << 60).to_le_bytes());
    let mut extent = FileExtent::new();
    extent.read_key_data(&key).expect("first key");
    let err = extent
        .read_key_data(&key)
        .expect_err("second key must be rejected");
    coverage.observe(&err);

    // Sizes a slice cannot have are still rejected by the size guard.
    let err = nxr_types::check_data_size(usize::MAX, 40).expect_err("oversized");
    coverage.observe(&err);

    let err = compute_object_checksum(&[0_u8; 33]).expect_err("ragged length");
    coverage.observe(&err);

    assert!(
        coverage.insufficient_data > 0,
        "expected InsufficientData coverage from adversarial corpus"
    );
    assert!(
        coverage.invalid_magic > 0,
        "expected InvalidMagic coverage from adversarial corpus"
    );
    assert!(
        coverage.invalid_object_type > 0,
        "expected InvalidObjectType coverage from adversarial corpus"
    );
    assert!(
        coverage.invalid_field > 0,
        "expected InvalidField coverage from adversarial corpus"
    );
    assert!(
        coverage.out_of_bounds > 0,
        "expected OutOfBounds coverage from adversarial corpus"
    );
    assert!(coverage.already_set > 0, "expected AlreadySet coverage");
    assert!(
        coverage.total() as usize >= samples.len(),
        "every sample should have produced at least one error"
    );

    assert!(
        parser_hits.len() >= 9,
        "expected broad parser coverage, got only {} parser entry points",
        parser_hits.len()
    );
}
