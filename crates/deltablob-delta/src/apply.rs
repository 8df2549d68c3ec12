//! Reconstructs a target from its basis and a delta script
//!
//! The whole script is validated against the basis length before any byte
//! is read. Copies stream through a fixed buffer; the output length is
//! checked against the script header at the end.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use deltablob_core::{DeltaBlobError, DeltaBlobResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::delta::{DeltaInstruction, DeltaScript};
use crate::signature::Signature;
use crate::strong::StrongHasher;

const COPY_CHUNK: usize = 64 * 1024;

/// Executes delta scripts against a basis.
#[derive(Debug, Clone, Default)]
pub struct DeltaApplier<'s> {
    verify_against: Option<&'s Signature>,
    cancel: Option<CancellationToken>,
}

impl<'s> DeltaApplier<'s> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check every copied block against `signature` and fail `BasisMismatch`
    /// when the live basis differs.
    pub fn with_verification(mut self, signature: &'s Signature) -> Self {
        self.verify_against = Some(signature);
        self
    }

    /// Abort with `Cancelled` once `token` fires (checked per instruction).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Apply `script` to `basis`, writing the target to `out`.
    ///
    /// `basis_length` is the length the script is checked against; a basis
    /// stream that ends early fails `DeltaApplicationFailed`. On error `out`
    /// may hold a partial target; use [`apply_slice`](Self::apply_slice) for
    /// all-or-nothing results.
    pub fn apply<B, W>(
        &self,
        mut basis: B,
        basis_length: u64,
        script: &DeltaScript,
        mut out: W,
    ) -> DeltaBlobResult<u64>
    where
        B: Read + Seek,
        W: Write,
    {
        self.validate(basis_length, script)?;

        let mut buf = vec![0u8; COPY_CHUNK];
        let mut position: Option<u64> = None;
        let mut written = 0u64;

        for instruction in script.instructions() {
            self.check_cancelled()?;
            match instruction {
                DeltaInstruction::CopyBlock {
                    basis_offset,
                    length,
                } => {
                    let (offset, length) = (*basis_offset, *length);
                    if position != Some(offset) {
                        basis.seek(SeekFrom::Start(offset))?;
                    }

                    let mut hasher = self.verify_against.map(|_| StrongHasher::new());
                    let mut remaining = length;
                    while remaining > 0 {
                        let want = remaining.min(COPY_CHUNK as u64) as usize;
                        let n = read_some(&mut basis, &mut buf[..want])?;
                        if n == 0 {
                            return Err(DeltaBlobError::DeltaApplicationFailed(format!(
                                "basis ended {remaining} bytes short of copy at offset {offset}"
                            )));
                        }
                        if let Some(h) = hasher.as_mut() {
                            h.update(&buf[..n]);
                        }
                        out.write_all(&buf[..n])?;
                        remaining -= n as u64;
                    }

                    if let (Some(h), Some(sig)) = (hasher, self.verify_against) {
                        let matches = sig
                            .block_at(offset)
                            .is_some_and(|block| block.strong == h.finalize());
                        if !matches {
                            warn!(offset, length, "basis block does not match signature");
                            return Err(DeltaBlobError::BasisMismatch {
                                offset,
                                reason: "strong checksum differs from signature".into(),
                            });
                        }
                    }

                    position = Some(offset + length);
                    written += length;
                }
                DeltaInstruction::InsertData { bytes } => {
                    out.write_all(bytes)?;
                    written += bytes.len() as u64;
                }
            }
        }
        out.flush()?;

        if written != script.expected_output_length() {
            return Err(DeltaBlobError::DeltaApplicationFailed(format!(
                "produced {written} bytes, delta expects {}",
                script.expected_output_length()
            )));
        }

        debug!(
            basis_length,
            output_length = written,
            instructions = script.instructions().len(),
            "delta applied"
        );
        Ok(written)
    }

    /// Apply against an in-memory basis; returns the target only on success.
    pub fn apply_slice(&self, basis: &[u8], script: &DeltaScript) -> DeltaBlobResult<Vec<u8>> {
        // The header length is untrusted; size the buffer from bytes already in hand.
        let in_hand = basis.len() as u64 + script.stats().inserted_bytes;
        let capacity = script.expected_output_length().min(in_hand) as usize;
        let mut out = Vec::with_capacity(capacity);
        self.apply(Cursor::new(basis), basis.len() as u64, script, &mut out)?;
        Ok(out)
    }

    /// Reject scripts that reference bytes outside the basis, or blocks the
    /// verification signature does not have.
    fn validate(&self, basis_length: u64, script: &DeltaScript) -> DeltaBlobResult<()> {
        if let Some(sig) = self.verify_against {
            if sig.basis_length() != basis_length {
                return Err(DeltaBlobError::BasisMismatch {
                    offset: 0,
                    reason: format!(
                        "basis is {basis_length} bytes, signature describes {}",
                        sig.basis_length()
                    ),
                });
            }
        }

        for instruction in script.instructions() {
            let DeltaInstruction::CopyBlock {
                basis_offset,
                length,
            } = instruction
            else {
                continue;
            };

            let end = basis_offset.checked_add(*length).ok_or_else(|| {
                DeltaBlobError::InvalidDelta(format!(
                    "copy at offset {basis_offset} with length {length} overflows"
                ))
            })?;
            if end > basis_length {
                return Err(DeltaBlobError::InvalidDelta(format!(
                    "copy of {length} bytes at offset {basis_offset} exceeds basis length {basis_length}"
                )));
            }

            if let Some(sig) = self.verify_against {
                let aligned = sig
                    .block_at(*basis_offset)
                    .is_some_and(|block| block.length as u64 == *length);
                if !aligned {
                    return Err(DeltaBlobError::InvalidDelta(format!(
                        "copy at offset {basis_offset} does not cover a whole signature block"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_cancelled(&self) -> DeltaBlobResult<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(DeltaBlobError::Cancelled),
            _ => Ok(()),
        }
    }
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaBuilder;
    use crate::signature::SignatureBuilder;
    use proptest::prelude::*;

    fn signature(basis: &[u8], block_size: usize) -> Signature {
        SignatureBuilder::new(block_size).unwrap().build(basis).unwrap()
    }

    fn script_for(basis: &[u8], target: &[u8], block_size: usize) -> DeltaScript {
        let sig = signature(basis, block_size);
        DeltaBuilder::new(&sig).unwrap().build(target).unwrap()
    }

    fn copy(basis_offset: u64, length: u64) -> DeltaInstruction {
        DeltaInstruction::CopyBlock {
            basis_offset,
            length,
        }
    }

    #[test]
    fn reconstructs_inserted_byte() {
        let script = script_for(b"ABCDEFGH", b"ABCDXEFGH", 4);
        let out = DeltaApplier::new().apply_slice(b"ABCDEFGH", &script).unwrap();
        assert_eq!(out, b"ABCDXEFGH");
    }

    #[test]
    fn out_of_range_copy_is_invalid_delta() {
        let mut script = DeltaScript::new(4);
        script.push(copy(6, 4));

        let mut out = Vec::new();
        let err = DeltaApplier::new()
            .apply(Cursor::new(b"ABCDEFGH"), 8, &script, &mut out)
            .unwrap_err();
        assert_eq!(err.code(), "InvalidDelta");
        assert!(out.is_empty(), "nothing is written before validation passes");
    }

    #[test]
    fn overflowing_copy_is_invalid_delta() {
        let mut script = DeltaScript::new(1);
        script.push(copy(u64::MAX, 1));
        let err = DeltaApplier::new().apply_slice(b"A", &script).unwrap_err();
        assert_eq!(err.code(), "InvalidDelta");
    }

    #[test]
    fn truncated_basis_fails_application() {
        let basis = b"ABCDEFGHIJKL";
        let script = script_for(basis, b"ABCDEFGHIJKL!", 4);

        let err = DeltaApplier::new()
            .apply(Cursor::new(&basis[..6]), basis.len() as u64, &script, Vec::new())
            .unwrap_err();
        assert_eq!(err.code(), "DeltaApplicationFailed");
    }

    #[test]
    fn output_length_mismatch_fails_application() {
        let mut script = DeltaScript::new(10);
        script.push(DeltaInstruction::InsertData {
            bytes: b"abc".to_vec(),
        });
        let err = DeltaApplier::new().apply_slice(b"", &script).unwrap_err();
        assert_eq!(err.code(), "DeltaApplicationFailed");
    }

    #[test]
    fn verification_accepts_matching_basis() {
        let basis = b"0123456789abcdef";
        let sig = signature(basis, 4);
        let script = DeltaBuilder::new(&sig).unwrap().build(&b"4567zz0123"[..]).unwrap();

        let out = DeltaApplier::new()
            .with_verification(&sig)
            .apply_slice(basis, &script)
            .unwrap();
        assert_eq!(out, b"4567zz0123");
    }

    #[test]
    fn verification_detects_changed_basis() {
        let basis = b"0123456789abcdef";
        let sig = signature(basis, 4);
        let script = DeltaBuilder::new(&sig).unwrap().build(&b"89ab"[..]).unwrap();

        let corrupted = b"01234567XXabcdef";
        let err = DeltaApplier::new()
            .with_verification(&sig)
            .apply_slice(corrupted, &script)
            .unwrap_err();
        assert!(
            matches!(err, DeltaBlobError::BasisMismatch { offset: 8, .. }),
            "got {err:?}"
        );

        // Without verification the wrong bytes go through unnoticed
        let out = DeltaApplier::new().apply_slice(corrupted, &script).unwrap();
        assert_eq!(out, b"XXab");
    }

    #[test]
    fn verification_rejects_wrong_length_basis() {
        let sig = signature(b"0123456789abcdef", 4);
        let script = DeltaScript::new(0);
        let err = DeltaApplier::new()
            .with_verification(&sig)
            .apply_slice(b"0123", &script)
            .unwrap_err();
        assert_eq!(err.code(), "BasisMismatch");
    }

    #[test]
    fn verification_rejects_unaligned_copy() {
        let basis = b"0123456789abcdef";
        let sig = signature(basis, 4);
        let mut script = DeltaScript::new(4);
        script.push(copy(2, 4));
        let err = DeltaApplier::new()
            .with_verification(&sig)
            .apply_slice(basis, &script)
            .unwrap_err();
        assert_eq!(err.code(), "InvalidDelta");
    }

    #[test]
    fn cancelled_apply_fails() {
        let script = script_for(b"ABCDEFGH", b"ABCDEFGH", 4);
        let token = CancellationToken::new();
        token.cancel();
        let err = DeltaApplier::new()
            .with_cancellation(token)
            .apply_slice(b"ABCDEFGH", &script)
            .unwrap_err();
        assert_eq!(err.code(), "Cancelled");
    }

    #[test]
    fn large_copies_cross_buffer_boundaries() {
        let basis: Vec<u8> = (0u32..300_000).map(|i| (i ^ (i >> 7)) as u8).collect();
        let mut target = basis[100_000..].to_vec();
        target.extend_from_slice(&basis[..100_000]);

        let script = script_for(&basis, &target, 128 * 1024);
        let out = DeltaApplier::new().apply_slice(&basis, &script).unwrap();
        assert_eq!(out, target);
    }

    #[test]
    fn block_size_above_one_mebibyte_roundtrips() {
        let block_size = 2 * 1024 * 1024 + 1;
        let basis: Vec<u8> = (0u32..5_000_000).map(|i| (i.wrapping_mul(31) >> 5) as u8).collect();
        let mut target = b"prefix".to_vec();
        target.extend_from_slice(&basis);

        let sig = SignatureBuilder::new(block_size).unwrap().build_slice(&basis).unwrap();
        assert_eq!(sig.blocks().len(), 3);
        let script = DeltaBuilder::new(&sig).unwrap().build(target.as_slice()).unwrap();
        assert_eq!(script.stats().inserted_bytes, 6);

        let out = DeltaApplier::new()
            .with_verification(&sig)
            .apply_slice(&basis, &script)
            .unwrap();
        assert_eq!(out, target);
    }

    #[test]
    fn oversized_header_length_fails_without_output() {
        let mut script = DeltaScript::new(u64::MAX);
        script.push(DeltaInstruction::InsertData {
            bytes: b"tiny".to_vec(),
        });

        let err = DeltaApplier::new().apply_slice(b"", &script).unwrap_err();
        assert_eq!(err.code(), "DeltaApplicationFailed");
    }

    proptest! {
        #[test]
        fn roundtrip_reproduces_target(
            basis in proptest::collection::vec(any::<u8>(), 0..=4096),
            edits in proptest::collection::vec((any::<u16>(), any::<u8>()), 0..=16),
            tail in proptest::collection::vec(any::<u8>(), 0..=64),
            block_size in 1usize..=300,
        ) {
            let mut target = basis.clone();
            for (pos, byte) in edits {
                if target.is_empty() {
                    target.push(byte);
                } else {
                    let at = pos as usize % target.len();
                    target.insert(at, byte);
                }
            }
            target.extend_from_slice(&tail);

            let sig = signature(&basis, block_size);
            let script = DeltaBuilder::new(&sig).unwrap().build(target.as_slice()).unwrap();
            let out = DeltaApplier::new()
                .with_verification(&sig)
                .apply_slice(&basis, &script)
                .unwrap();
            prop_assert_eq!(out, target);
        }
    }
}
