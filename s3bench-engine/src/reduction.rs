//! Synthetic payloads with controllable compressibility and duplication.
//!
//! A buffer is split into consecutive *dedup units*. Within each unit, blocks of
//! `block_size` bytes are either *unique* or exact copies of a unique block. A unique block
//! starts with a run of random bytes, sized by the compression percentage, followed by a run
//! of a constant fill byte. Storage that compresses and deduplicates at block granularity
//! therefore sees approximately the configured ratios.
//!
//! Ratios apply per dedup unit. Buffers spanning several units with a short trailing unit only
//! approximate the configured percentages in aggregate.

use rand::RngCore;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The byte used for the compressible part of each block.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPolicy {
    /// Pad with `0x00`.
    #[default]
    Zeros,
    /// Pad with the ASCII character `'A'`.
    Letters,
}

impl FillPolicy {
    /// Returns the byte written for this policy.
    pub fn byte(self) -> u8 {
        match self {
            FillPolicy::Zeros => 0,
            FillPolicy::Letters => b'A',
        }
    }
}

/// Errors rejecting generator parameters.
#[derive(Debug, Error, PartialEq)]
pub enum GenerateError {
    /// The reduction block size is zero.
    #[error("reduction block size cannot be less than 1")]
    InvalidBlockSize,

    /// The dedup unit is empty or not a multiple of the reduction block size.
    #[error("dedup unit size {unit} must be a non-zero multiple of reduction block size {block}")]
    InvalidDedupUnit {
        /// The configured dedup unit size.
        unit: usize,
        /// The configured reduction block size.
        block: usize,
    },

    /// A percentage is outside of `[0, 100]`.
    #[error("{name} must be in range [0, 100], got {value}")]
    PercentOutOfRange {
        /// Name of the offending parameter.
        name: &'static str,
        /// The configured value.
        value: f64,
    },

    /// A pattern without any bytes cannot be tiled.
    #[error("pattern is empty")]
    EmptyPattern,
}

/// Parameters of a reduction buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionParams {
    /// Total length of the buffer in bytes.
    pub size: usize,
    /// Granularity of compression and dedup decisions.
    pub block_size: usize,
    /// Window within which blocks are duplicated.
    pub dedup_unit_size: usize,
    /// Share of each unique block that is random, in percent.
    pub compression_percent: f64,
    /// Share of blocks within a unit that are unique, in percent.
    pub dedup_percent: f64,
    /// The byte used for padding.
    pub fill: FillPolicy,
}

impl ReductionParams {
    /// Checks the invariants the generator relies on.
    pub fn validate(&self) -> Result<(), GenerateError> {
        check_percent("compression percentage", self.compression_percent)?;
        check_percent("dedup percentage", self.dedup_percent)?;

        if self.block_size == 0 {
            return Err(GenerateError::InvalidBlockSize);
        }
        if self.dedup_unit_size == 0 || self.dedup_unit_size % self.block_size != 0 {
            return Err(GenerateError::InvalidDedupUnit {
                unit: self.dedup_unit_size,
                block: self.block_size,
            });
        }

        Ok(())
    }
}

fn check_percent(name: &'static str, value: f64) -> Result<(), GenerateError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(GenerateError::PercentOutOfRange { name, value })
    }
}

/// Generates a buffer using the thread-local cryptographically secure RNG.
pub fn generate(params: &ReductionParams) -> Result<Vec<u8>, GenerateError> {
    generate_with(params, &mut rand::rng())
}

/// Generates a buffer drawing all randomness from `rng`.
pub fn generate_with<R>(params: &ReductionParams, rng: &mut R) -> Result<Vec<u8>, GenerateError>
where
    R: RngCore + ?Sized,
{
    params.validate()?;
    let mut buf = vec![0; params.size];
    fill_buffer(&mut buf, params, rng);
    Ok(buf)
}

/// Fills `buf` unit by unit. The length of `buf` takes precedence over `params.size`.
pub fn fill_buffer<R>(buf: &mut [u8], params: &ReductionParams, rng: &mut R)
where
    R: RngCore + ?Sized,
{
    for unit in buf.chunks_mut(params.dedup_unit_size) {
        fill_unit(unit, params, rng);
    }
}

/// Fills a single dedup unit and returns the block permutation that was used.
///
/// The block at `perm[i]` is unique for ranks `i < unique_count`, and a copy of the block at
/// `perm[i % unique_count]` otherwise.
pub(crate) fn fill_unit<R>(unit: &mut [u8], params: &ReductionParams, rng: &mut R) -> Vec<usize>
where
    R: RngCore + ?Sized,
{
    let len = unit.len();
    let block_size = params.block_size;
    let fill = params.fill.byte();

    let blocks = len.div_ceil(block_size);
    let unique = unique_count(blocks, params.dedup_percent);

    let mut perm: Vec<usize> = (0..blocks).collect();
    perm.shuffle(rng);

    let block_len = |index: usize| block_size.min(len - index * block_size);

    for (rank, &index) in perm.iter().enumerate() {
        let offset = index * block_size;
        let size = block_len(index);

        if rank < unique {
            let random = random_len(size, params.compression_percent);
            rng.fill_bytes(&mut unit[offset..offset + random]);
            unit[offset + random..offset + size].fill(fill);
        } else {
            let source = perm[rank % unique];
            let source_offset = source * block_size;
            let copied = size.min(block_len(source));
            unit.copy_within(source_offset..source_offset + copied, offset);
            unit[offset + copied..offset + size].fill(fill);
        }
    }

    perm
}

/// Number of unique blocks in a unit of `blocks` blocks. There is always at least one.
pub(crate) fn unique_count(blocks: usize, dedup_percent: f64) -> usize {
    let unique = (blocks as f64 * dedup_percent / 100.0).round() as usize;
    unique.clamp(1, blocks.max(1))
}

/// Number of leading random bytes in a unique block of `size` bytes.
pub(crate) fn random_len(size: usize, compression_percent: f64) -> usize {
    let random = (size as f64 * compression_percent / 100.0).round() as usize;
    random.min(size)
}

/// Builds a buffer of `size` bytes by repeating `pattern` and truncating the last copy.
pub fn tile_pattern(size: usize, pattern: &[u8]) -> Result<Vec<u8>, GenerateError> {
    if pattern.is_empty() {
        return Err(GenerateError::EmptyPattern);
    }

    Ok(pattern.iter().copied().cycle().take(size).collect())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    const MIB: usize = 1024 * 1024;

    fn params(size: usize, compression: f64, dedup: f64) -> ReductionParams {
        ReductionParams {
            size,
            block_size: 4096,
            dedup_unit_size: MIB,
            compression_percent: compression,
            dedup_percent: dedup,
            fill: FillPolicy::Zeros,
        }
    }

    fn distinct_blocks(buf: &[u8], block_size: usize) -> usize {
        buf.chunks(block_size).collect::<HashSet<_>>().len()
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let mut p = params(MIB, 100.0, 0.0);
        p.compression_percent = 100.5;
        assert!(matches!(
            p.validate(),
            Err(GenerateError::PercentOutOfRange { .. })
        ));

        let mut p = params(MIB, 100.0, 0.0);
        p.dedup_percent = -1.0;
        assert!(p.validate().is_err());

        let mut p = params(MIB, 100.0, 0.0);
        p.block_size = 0;
        assert_eq!(p.validate(), Err(GenerateError::InvalidBlockSize));

        let mut p = params(MIB, 100.0, 0.0);
        p.dedup_unit_size = 4096 * 3 + 1;
        assert!(matches!(
            p.validate(),
            Err(GenerateError::InvalidDedupUnit { .. })
        ));
    }

    #[test]
    fn unique_count_is_clamped() {
        assert_eq!(unique_count(256, 0.0), 1);
        assert_eq!(unique_count(256, 100.0), 256);
        assert_eq!(unique_count(256, 50.0), 128);
        assert_eq!(unique_count(3, 50.0), 2);
        assert_eq!(unique_count(1, 0.0), 1);
    }

    #[test]
    fn size_is_exact() {
        let mut rng = SmallRng::seed_from_u64(1);
        for size in [0, 1, 4095, 4097, MIB - 1, MIB + 1, 3 * MIB + 12345] {
            let buf = generate_with(&params(size, 50.0, 50.0), &mut rng).unwrap();
            assert_eq!(buf.len(), size);
        }

        let mut p = params(10_000, 30.0, 60.0);
        p.dedup_unit_size = 8192;
        assert_eq!(generate_with(&p, &mut rng).unwrap().len(), 10_000);
    }

    #[test]
    fn duplicates_equal_their_source() {
        let mut rng = SmallRng::seed_from_u64(7);
        let p = ReductionParams {
            size: 0,
            block_size: 100,
            dedup_unit_size: 1000,
            compression_percent: 100.0,
            dedup_percent: 30.0,
            fill: FillPolicy::Letters,
        };

        // 950 bytes: the last block is truncated to 50 bytes.
        let mut unit = vec![0; 950];
        let perm = fill_unit(&mut unit, &p, &mut rng);
        let unique = unique_count(perm.len(), p.dedup_percent);
        assert_eq!(unique, 3);

        let block = |index: usize| &unit[index * 100..(index * 100 + 100).min(unit.len())];
        for rank in unique..perm.len() {
            let copy = block(perm[rank]);
            let source = block(perm[rank % unique]);
            let shared = copy.len().min(source.len());
            assert_eq!(&copy[..shared], &source[..shared], "rank {rank}");
            assert!(copy[shared..].iter().all(|&b| b == b'A'));
        }
    }

    #[test]
    fn fill_byte_follows_random_prefix() {
        let mut rng = SmallRng::seed_from_u64(3);
        for fill in [FillPolicy::Zeros, FillPolicy::Letters] {
            let mut p = params(2 * MIB, 25.0, 40.0);
            p.fill = fill;
            let buf = generate_with(&p, &mut rng).unwrap();

            let random = random_len(4096, 25.0);
            for block in buf.chunks(4096) {
                assert!(block[random..].iter().all(|&b| b == fill.byte()));
            }
        }
    }

    #[test]
    fn dedup_is_monotonic() {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut previous = 0;
        for dedup in [0.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0] {
            let buf = generate_with(&params(MIB, 100.0, dedup), &mut rng).unwrap();
            let distinct = distinct_blocks(&buf, 4096);
            assert!(distinct >= previous, "{dedup}%: {distinct} < {previous}");
            assert_eq!(distinct, unique_count(256, dedup));
            previous = distinct;
        }
    }

    #[test]
    fn incompressible_fully_duplicated() {
        let buf = generate_with(&params(MIB, 100.0, 0.0), &mut SmallRng::seed_from_u64(5)).unwrap();

        let first = &buf[..4096];
        assert!(buf.chunks(4096).all(|block| block == first));

        let byte_values: HashSet<u8> = first.iter().copied().collect();
        assert!(byte_values.len() > 200);
    }

    #[test]
    fn fully_compressible_all_unique() {
        let buf = generate_with(&params(MIB, 0.0, 100.0), &mut SmallRng::seed_from_u64(5)).unwrap();
        assert_eq!(buf.len(), MIB);
        assert!(buf.iter().all(|&b| b == 0));

        let p = params(MIB, 0.0, 100.0);
        let mut unit = vec![0xff; MIB];
        let perm = fill_unit(&mut unit, &p, &mut SmallRng::seed_from_u64(5));

        assert_eq!(perm.len(), 256);
        assert_eq!(unique_count(perm.len(), p.dedup_percent), 256);
        let mut sorted = perm.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..256).collect::<Vec<_>>());
        // Every block was written as a unique block, none is left untouched.
        assert!(unit.iter().all(|&b| b == 0));
    }

    #[test]
    fn units_are_independent() {
        let mut p = params(4 * 8192, 100.0, 0.0);
        p.dedup_unit_size = 8192;
        let buf = generate_with(&p, &mut SmallRng::seed_from_u64(9)).unwrap();

        // Each unit collapses to one block, but units do not share content.
        assert_eq!(distinct_blocks(&buf, 4096), 4);
        for unit in buf.chunks(8192) {
            assert_eq!(unit[..4096], unit[4096..]);
        }
    }

    #[test]
    fn tiling() {
        let pattern = b"0123456789";
        assert_eq!(tile_pattern(4, pattern).unwrap(), b"0123");
        assert_eq!(tile_pattern(10, pattern).unwrap(), pattern);
        assert_eq!(tile_pattern(25, pattern).unwrap(), b"0123456789012345678901234");
        assert_eq!(tile_pattern(0, pattern).unwrap(), b"");
        assert_eq!(tile_pattern(5, b""), Err(GenerateError::EmptyPattern));
    }
}
