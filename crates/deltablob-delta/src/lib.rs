//! deltablob-delta: rolling-checksum signatures, delta scripts, and patch application
//!
//! # Overview
//! - `rolling`: weak rsync-style checksum with O(1) slide
//! - `strong`: BLAKE3 block digest confirming weak matches
//! - `signature`: per-block checksums of a basis version
//! - `delta`: greedy matcher producing copy/insert scripts
//! - `apply`: validates and replays a script against a basis
//! - `wire`: big-endian binary encodings of signatures and scripts

pub mod apply;
pub mod delta;
pub mod rolling;
pub mod signature;
pub mod strong;
pub mod wire;

// Convenience re-exports for the most common operations
pub use apply::DeltaApplier;
pub use delta::{DeltaBuilder, DeltaInstruction, DeltaScript, DeltaStats};
pub use rolling::{weak_checksum, RollingChecksum};
pub use signature::{Block, Signature, SignatureBuilder, MAX_BLOCK_SIZE};
pub use strong::{digest, StrongChecksum, StrongHasher};
pub use wire::{decode_delta, decode_signature, encode_delta, encode_signature};
