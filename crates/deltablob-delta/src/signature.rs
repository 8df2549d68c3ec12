//! Basis signatures: per-block weak + strong checksums
//!
//! The basis is cut into consecutive `block_size` blocks; only the last one
//! may be shorter. Blocks partition `[0, basis_length)` in offset order.

use std::io::{self, Read};

use deltablob_core::{DeltaBlobError, DeltaBlobResult};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::rolling::weak_checksum;
use crate::strong::{digest, StrongChecksum};

/// Largest accepted block size; the signature encoding stores it as a u32
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize;

/// Basis slices at least this large are hashed across the rayon pool
const PARALLEL_THRESHOLD: usize = 256 * 1024;

/// Checksums of one basis block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Ordinal position in the basis
    pub index: usize,
    /// Byte offset in the basis
    pub offset: u64,
    /// Block length; equals the signature's block size except possibly for the last block
    pub length: usize,
    pub weak: u32,
    pub strong: StrongChecksum,
}

/// Signature of one basis version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    block_size: usize,
    basis_length: u64,
    blocks: Vec<Block>,
}

impl Signature {
    /// Assemble a signature from per-block checksums listed in index order.
    ///
    /// Offsets and lengths follow from `block_size` and `basis_length`.
    pub fn from_checksums(
        block_size: usize,
        basis_length: u64,
        checksums: impl IntoIterator<Item = (u32, StrongChecksum)>,
    ) -> DeltaBlobResult<Self> {
        check_block_size(block_size)?;
        let expected = block_count(basis_length, block_size);

        let mut blocks = Vec::with_capacity(expected.min(1 << 20));
        for (index, (weak, strong)) in checksums.into_iter().enumerate() {
            let offset = index as u64 * block_size as u64;
            if offset >= basis_length {
                return Err(DeltaBlobError::InvalidArgument(format!(
                    "signature has more blocks than a {basis_length}-byte basis allows"
                )));
            }
            let length = (basis_length - offset).min(block_size as u64) as usize;
            blocks.push(Block {
                index,
                offset,
                length,
                weak,
                strong,
            });
        }

        if blocks.len() != expected {
            return Err(DeltaBlobError::InvalidArgument(format!(
                "signature has {} blocks, expected {expected}",
                blocks.len()
            )));
        }

        Ok(Self {
            block_size,
            basis_length,
            blocks,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn basis_length(&self) -> u64 {
        self.basis_length
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// True when the basis was empty
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The block starting exactly at `offset`, if any.
    pub fn block_at(&self, offset: u64) -> Option<&Block> {
        if offset % self.block_size as u64 != 0 {
            return None;
        }
        self.blocks.get((offset / self.block_size as u64) as usize)
    }
}

/// Builds a [`Signature`] from a basis.
#[derive(Debug, Clone)]
pub struct SignatureBuilder {
    block_size: usize,
    cancel: Option<CancellationToken>,
}

impl SignatureBuilder {
    /// Fails `InvalidArgument` for 0 or anything above `MAX_BLOCK_SIZE`.
    pub fn new(block_size: usize) -> DeltaBlobResult<Self> {
        check_block_size(block_size)?;
        Ok(Self {
            block_size,
            cancel: None,
        })
    }

    /// Abort with `Cancelled` once `token` fires (checked per block).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read the basis once, sequentially, holding one block in memory.
    pub fn build<R: Read>(&self, mut basis: R) -> DeltaBlobResult<Signature> {
        let mut buf = Vec::new();
        let mut blocks = Vec::new();
        let mut offset = 0u64;

        loop {
            self.check_cancelled()?;
            let n = read_block(&mut basis, self.block_size, &mut buf)?;
            if n == 0 {
                break;
            }
            let block = &buf[..n];
            blocks.push(Block {
                index: blocks.len(),
                offset,
                length: n,
                weak: weak_checksum(block),
                strong: digest(block),
            });
            offset += n as u64;
            if n < self.block_size {
                break;
            }
        }

        debug!(
            block_size = self.block_size,
            basis_length = offset,
            blocks = blocks.len(),
            "signature built"
        );

        Ok(Signature {
            block_size: self.block_size,
            basis_length: offset,
            blocks,
        })
    }

    /// Signature of an in-memory basis. Large inputs are hashed in parallel;
    /// the result is identical to [`build`](Self::build).
    pub fn build_slice(&self, basis: &[u8]) -> DeltaBlobResult<Signature> {
        if basis.len() < PARALLEL_THRESHOLD {
            return self.build(basis);
        }

        let bs = self.block_size;
        let blocks = basis
            .par_chunks(bs)
            .enumerate()
            .map(|(index, block)| {
                self.check_cancelled()?;
                Ok(Block {
                    index,
                    offset: (index * bs) as u64,
                    length: block.len(),
                    weak: weak_checksum(block),
                    strong: digest(block),
                })
            })
            .collect::<DeltaBlobResult<Vec<_>>>()?;

        debug!(
            block_size = bs,
            basis_length = basis.len(),
            blocks = blocks.len(),
            "signature built (parallel)"
        );

        Ok(Signature {
            block_size: bs,
            basis_length: basis.len() as u64,
            blocks,
        })
    }

    fn check_cancelled(&self) -> DeltaBlobResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(DeltaBlobError::Cancelled),
            _ => Ok(()),
        }
    }
}

pub(crate) fn check_block_size(block_size: usize) -> DeltaBlobResult<()> {
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(DeltaBlobError::InvalidArgument(format!(
            "block size must be between 1 and {MAX_BLOCK_SIZE}, got {block_size}"
        )));
    }
    Ok(())
}

/// Number of blocks covering `basis_length` bytes.
pub(crate) fn block_count(basis_length: u64, block_size: usize) -> usize {
    basis_length.div_ceil(block_size as u64) as usize
}

/// Replace `buf` with the next `block_size` bytes of `reader`; short only at
/// end of input. `buf` grows with the bytes actually read.
fn read_block<R: Read>(
    reader: &mut R,
    block_size: usize,
    buf: &mut Vec<u8>,
) -> io::Result<usize> {
    buf.clear();
    reader.by_ref().take(block_size as u64).read_to_end(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_block_size_is_invalid() {
        let err = SignatureBuilder::new(0).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
        assert!(SignatureBuilder::new(MAX_BLOCK_SIZE).is_ok());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn block_size_beyond_u32_is_invalid() {
        let err = SignatureBuilder::new(MAX_BLOCK_SIZE + 1).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn huge_block_size_over_small_basis() {
        let sig = SignatureBuilder::new(MAX_BLOCK_SIZE)
            .unwrap()
            .build(&b"ABC"[..])
            .unwrap();
        assert_eq!(sig.blocks().len(), 1);
        assert_eq!(sig.blocks()[0].length, 3);
        assert_eq!(sig.blocks()[0].strong, digest(b"ABC"));
    }

    #[test]
    fn blocks_partition_basis() {
        let sig = SignatureBuilder::new(4).unwrap().build(&b"ABCDEFGHIJ"[..]).unwrap();

        assert_eq!(sig.basis_length(), 10);
        assert_eq!(sig.blocks().len(), 3);
        let spans: Vec<(u64, usize)> = sig.blocks().iter().map(|b| (b.offset, b.length)).collect();
        assert_eq!(spans, vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(sig.blocks()[2].strong, digest(b"IJ"));
        assert_eq!(sig.blocks()[1].weak, weak_checksum(b"EFGH"));
    }

    #[test]
    fn empty_basis_has_no_blocks() {
        let sig = SignatureBuilder::new(16).unwrap().build(&b""[..]).unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig.basis_length(), 0);
    }

    #[test]
    fn block_at_requires_alignment() {
        let sig = SignatureBuilder::new(4).unwrap().build(&b"ABCDEFGH"[..]).unwrap();
        assert_eq!(sig.block_at(4).map(|b| b.index), Some(1));
        assert!(sig.block_at(2).is_none());
        assert!(sig.block_at(8).is_none());
    }

    #[test]
    fn parallel_matches_streaming() {
        let basis: Vec<u8> = (0u32..600_123).map(|i| (i.wrapping_mul(31) >> 3) as u8).collect();
        let builder = SignatureBuilder::new(1000).unwrap();
        let streamed = builder.build(basis.as_slice()).unwrap();
        let parallel = builder.build_slice(&basis).unwrap();
        assert_eq!(streamed, parallel);
        assert_eq!(parallel.blocks().len(), 601);
        assert_eq!(parallel.blocks().last().unwrap().length, 123);
    }

    #[test]
    fn from_checksums_rejects_wrong_count() {
        let sig = SignatureBuilder::new(4).unwrap().build(&b"ABCDEFGHI"[..]).unwrap();
        let sums: Vec<_> = sig.blocks().iter().map(|b| (b.weak, b.strong)).collect();

        let rebuilt = Signature::from_checksums(4, 9, sums.clone()).unwrap();
        assert_eq!(rebuilt, sig);

        assert!(Signature::from_checksums(4, 8, sums.clone()).is_err());
        assert!(Signature::from_checksums(4, 13, sums).is_err());
    }

    #[test]
    fn cancelled_build_returns_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let builder = SignatureBuilder::new(4).unwrap().with_cancellation(token);

        let err = builder.build(&b"ABCDEFGH"[..]).unwrap_err();
        assert_eq!(err.code(), "Cancelled");

        let big = vec![7u8; PARALLEL_THRESHOLD * 2];
        assert_eq!(builder.build_slice(&big).unwrap_err().code(), "Cancelled");
    }

    proptest! {
        #[test]
        fn signature_is_deterministic(
            data in proptest::collection::vec(any::<u8>(), 0..=8192),
            block_size in 1usize..=512,
        ) {
            let builder = SignatureBuilder::new(block_size).unwrap();
            let a = builder.build(data.as_slice()).unwrap();
            let b = builder.build(data.as_slice()).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn blocks_cover_basis(
            data in proptest::collection::vec(any::<u8>(), 0..=8192),
            block_size in 1usize..=512,
        ) {
            let sig = SignatureBuilder::new(block_size).unwrap().build(data.as_slice()).unwrap();
            let mut expected_offset = 0u64;
            for (i, block) in sig.blocks().iter().enumerate() {
                prop_assert_eq!(block.index, i);
                prop_assert_eq!(block.offset, expected_offset);
                if i + 1 < sig.blocks().len() {
                    prop_assert_eq!(block.length, block_size);
                }
                expected_offset += block.length as u64;
            }
            prop_assert_eq!(expected_offset, data.len() as u64);
        }
    }
}
